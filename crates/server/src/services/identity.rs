//! Owner resolution: a name in a URL may belong to a user or an organization.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    db::models::{Organization, OwnerKind, User},
    error::{is_unique_violation, AppError, Result},
};

/// The resolved owner of a namespace.
#[derive(Debug, Clone)]
pub enum Owner {
    User(User),
    Organization(Organization),
}

impl Owner {
    pub fn kind(&self) -> OwnerKind {
        match self {
            Owner::User(_) => OwnerKind::User,
            Owner::Organization(_) => OwnerKind::Organization,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Owner::User(user) => user.id,
            Owner::Organization(org) => org.id,
        }
    }
}

pub async fn find_user_by_login(pool: &SqlitePool, login: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE login = ?")
        .bind(login)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_user_by_github_id(pool: &SqlitePool, github_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE github_id = ?")
        .bind(github_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Links a GitHub account to `user_id`. One account maps to at most one user.
pub async fn link_github_id(pool: &SqlitePool, user_id: i64, github_id: i64) -> Result<User> {
    if find_user_by_github_id(pool, github_id)
        .await?
        .is_some_and(|other| other.id != user_id)
    {
        return Err(AppError::Duplicate("GitHub account already linked".to_string()));
    }

    let mut tx = pool.begin().await?;
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET github_id = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(github_id)
    .bind(Utc::now())
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Duplicate("GitHub account already linked".to_string())
        } else {
            AppError::Database(e)
        }
    })?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    tx.commit().await?;

    tracing::info!(user_id, github_id, "github account linked");
    Ok(user)
}

/// Lookup used by sign-in, which accepts either identifier.
pub async fn find_user_by_login_or_email(
    pool: &SqlitePool,
    login_or_email: &str,
) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE login = ? OR email = ?")
        .bind(login_or_email)
        .bind(login_or_email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn find_organization_by_login(
    pool: &SqlitePool,
    login: &str,
) -> Result<Option<Organization>> {
    let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE login = ?")
        .bind(login)
        .fetch_optional(pool)
        .await?;

    let Some(mut org) = org else {
        return Ok(None);
    };

    org.member_ids = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM organization_members WHERE org_id = ? ORDER BY user_id",
    )
    .bind(org.id)
    .fetch_all(pool)
    .await?;

    Ok(Some(org))
}

/// Users and organizations share one namespace.
pub async fn login_taken(pool: &SqlitePool, login: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM logins WHERE login = ?")
        .bind(login)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Reserves `login` inside the caller's transaction. The `logins` primary
/// key decides between a user and an organization racing for one name.
pub async fn claim_login(conn: &mut SqliteConnection, login: &str, kind: OwnerKind) -> Result<()> {
    sqlx::query("INSERT INTO logins (login, owner_kind) VALUES (?, ?)")
        .bind(login)
        .bind(kind)
        .execute(conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Duplicate("Login already taken".to_string())
            } else {
                AppError::Database(e)
            }
        })?;
    Ok(())
}

/// Resolves `name` to a user, falling back to an organization.
pub async fn resolve_owner(pool: &SqlitePool, name: &str) -> Result<Owner> {
    if let Some(user) = find_user_by_login(pool, name).await? {
        return Ok(Owner::User(user));
    }
    if let Some(org) = find_organization_by_login(pool, name).await? {
        return Ok(Owner::Organization(org));
    }
    Err(AppError::NotFound("Owner not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_org, insert_user, TestDb};

    #[tokio::test]
    async fn resolves_users_before_organizations() {
        let db = TestDb::new().await;
        let alice = insert_user(&db.pool, "alice").await;

        let owner = resolve_owner(&db.pool, "alice").await.unwrap();
        assert_eq!(owner.kind(), OwnerKind::User);
        assert_eq!(owner.id(), alice.id);
    }

    #[tokio::test]
    async fn resolves_organizations_with_members() {
        let db = TestDb::new().await;
        let alice = insert_user(&db.pool, "alice").await;
        let org = insert_org(&db.pool, "acme", &[alice.id]).await;

        let owner = resolve_owner(&db.pool, "acme").await.unwrap();
        assert_eq!(owner.kind(), OwnerKind::Organization);
        assert_eq!(owner.id(), org.id);
        match owner {
            Owner::Organization(org) => assert_eq!(org.member_ids, vec![alice.id]),
            Owner::User(_) => panic!("expected organization"),
        }
    }

    #[tokio::test]
    async fn unknown_owner_is_not_found() {
        let db = TestDb::new().await;
        let err = resolve_owner(&db.pool, "nobody").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn claimed_login_cannot_be_claimed_again() {
        let db = TestDb::new().await;
        insert_user(&db.pool, "alice").await;

        let mut conn = db.pool.acquire().await.unwrap();
        let err = claim_login(&mut *conn, "alice", OwnerKind::Organization)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));

        claim_login(&mut *conn, "acme", OwnerKind::Organization)
            .await
            .unwrap();
        assert!(login_taken(&db.pool, "acme").await.unwrap());
    }

    #[tokio::test]
    async fn github_account_links_to_one_user() {
        let db = TestDb::new().await;
        let alice = insert_user(&db.pool, "alice").await;
        let bob = insert_user(&db.pool, "bob").await;

        let linked = link_github_id(&db.pool, alice.id, 42).await.unwrap();
        assert_eq!(linked.github_id, Some(42));
        let found = find_user_by_github_id(&db.pool, 42).await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);

        // Relinking the same account is a no-op
        link_github_id(&db.pool, alice.id, 42).await.unwrap();

        let err = link_github_id(&db.pool, bob.id, 42).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
        assert!(find_user_by_github_id(&db.pool, 7).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn inserted_users_are_visible_to_the_next_read() {
        let db = TestDb::new().await;
        for i in 0..100 {
            let login = format!("user{i}");
            let user = insert_user(&db.pool, &login).await;
            let owner = resolve_owner(&db.pool, &login).await.unwrap();
            assert_eq!(owner.id(), user.id);
        }
    }

    #[tokio::test]
    async fn login_namespace_is_shared() {
        let db = TestDb::new().await;
        insert_user(&db.pool, "alice").await;
        insert_org(&db.pool, "acme", &[]).await;

        assert!(login_taken(&db.pool, "alice").await.unwrap());
        assert!(login_taken(&db.pool, "acme").await.unwrap());
        assert!(!login_taken(&db.pool, "free").await.unwrap());
    }
}
