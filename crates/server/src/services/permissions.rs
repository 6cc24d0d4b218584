//! Access decisions. Pure functions of requester, owner and privacy; they
//! must run before any private data is loaded into a response.

use super::identity::Owner;

/// Self-context: the requester owns the namespace, directly or through
/// organization membership.
pub fn has_view_access(requester: Option<i64>, owner: &Owner) -> bool {
    let Some(user_id) = requester else {
        return false;
    };

    match owner {
        Owner::User(user) => user.id == user_id,
        Owner::Organization(org) => org.member_ids.contains(&user_id),
    }
}

/// Creating projects, initializing them and triggering syncs.
pub fn can_manage(requester: i64, owner: &Owner) -> bool {
    has_view_access(Some(requester), owner)
}
