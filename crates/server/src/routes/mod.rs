pub mod auth;
pub mod languages;
pub mod orgs;
pub mod projects;
pub mod users;
