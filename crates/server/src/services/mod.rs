pub mod git;
pub mod identity;
pub mod languages;
pub mod permissions;
pub mod projects;
pub mod storage;
pub mod sync;
