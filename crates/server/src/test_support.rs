//! Fixtures shared by the unit tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;

use crate::{
    config::{Config, SyncSettings},
    db::{
        models::{Organization, OwnerKind, Project, User},
        Database,
    },
    routes::auth::create_token,
    services::{
        git::RepoSource,
        identity,
        projects::{self, NewProject},
        storage::CheckoutStore,
        sync::{SyncError, SyncService},
    },
    AppState,
};

const TEST_SECRET: &str = "test-secret";

/// A migrated SQLite database in a temporary directory. A file rather than
/// `sqlite::memory:` so that pooled connections share one database.
pub struct TestDb {
    pub pool: SqlitePool,
    pub dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        let db = Database::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        Self { pool: db.pool, dir }
    }
}

pub async fn insert_user(pool: &SqlitePool, login: &str) -> User {
    let now = Utc::now();
    let mut tx = pool.begin().await.unwrap();
    identity::claim_login(&mut *tx, login, OwnerKind::User)
        .await
        .unwrap();
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (login, name, email, password_hash, created_at, updated_at)
        VALUES (?, ?, ?, 'not-a-hash', ?, ?)
        RETURNING *
        "#,
    )
    .bind(login)
    .bind(login)
    .bind(format!("{login}@example.com"))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .unwrap();
    tx.commit().await.unwrap();
    user
}

pub async fn insert_org(pool: &SqlitePool, login: &str, members: &[i64]) -> Organization {
    let now = Utc::now();
    let mut tx = pool.begin().await.unwrap();
    identity::claim_login(&mut *tx, login, OwnerKind::Organization)
        .await
        .unwrap();
    let mut org = sqlx::query_as::<_, Organization>(
        r#"
        INSERT INTO organizations (login, name, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(login)
    .bind(login)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .unwrap();

    for user_id in members {
        sqlx::query("INSERT INTO organization_members (org_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(org.id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
    org.member_ids = members.to_vec();
    org
}

pub fn sample_user(id: i64, login: &str) -> User {
    let now = Utc::now();
    User {
        id,
        login: login.to_string(),
        name: login.to_string(),
        email: format!("{login}@example.com"),
        avatar_url: String::new(),
        bio: String::new(),
        github_id: None,
        prefer_langs: String::new(),
        password_hash: String::new(),
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_org(id: i64, login: &str, member_ids: Vec<i64>) -> Organization {
    let now = Utc::now();
    Organization {
        id,
        login: login.to_string(),
        name: login.to_string(),
        description: String::new(),
        created_at: now,
        updated_at: now,
        member_ids,
    }
}

/// The `demo` project shape: English source, Chinese and French targets.
pub fn new_project(owner_id: i64, name: &str) -> NewProject {
    NewProject {
        owner_id,
        owner_kind: OwnerKind::User,
        name: name.to_string(),
        description: String::new(),
        is_private: false,
        is_git: false,
        git_url: String::new(),
        git_branch: String::new(),
        sync_time: 0,
        src_langs: "eng".to_string(),
        tgt_langs: "zho|fra".to_string(),
    }
}

/// A git-backed project syncing every minute.
pub async fn git_project(pool: &SqlitePool, owner_id: i64, name: &str) -> Project {
    let mut p = new_project(owner_id, name);
    p.is_git = true;
    p.git_url = "https://example.com/repo.git".to_string();
    p.git_branch = "main".to_string();
    p.sync_time = 60;
    projects::create(pool, p).await.unwrap()
}

#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Write these `(relative path, contents)` pairs into the checkout.
    Files(Vec<(String, String)>),
    Fail(String),
    /// Never finish.
    Hang,
}

pub struct FakeSource {
    behavior: Mutex<FakeBehavior>,
}

impl FakeSource {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
        })
    }

    pub fn set(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn current(&self) -> FakeBehavior {
        self.behavior.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoSource for FakeSource {
    async fn probe(&self, _url: &str, _branch: &str) -> Result<(), SyncError> {
        match self.current() {
            FakeBehavior::Fail(msg) => Err(SyncError::Unreachable(msg)),
            _ => Ok(()),
        }
    }

    async fn fetch(&self, _url: &str, _branch: &str, dest: &Path) -> Result<(), SyncError> {
        match self.current() {
            FakeBehavior::Files(files) => {
                for (rel, contents) in files {
                    let path = dest.join(rel);
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(path, contents).await?;
                }
                Ok(())
            }
            FakeBehavior::Fail(msg) => Err(SyncError::Fetch(msg)),
            FakeBehavior::Hang => std::future::pending().await,
        }
    }
}

pub fn test_state(db: &TestDb, source: Arc<FakeSource>) -> AppState {
    let config = Config {
        port: 0,
        database_url: String::new(),
        storage_path: db.dir.path().join("checkouts").display().to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        git_bin: "git".to_string(),
        git_verify_remote: true,
        sync: SyncSettings::default(),
    };
    let sync = SyncService::new(
        db.pool.clone(),
        source,
        CheckoutStore::new(&config.storage_path),
        config.sync.clone(),
    );

    AppState {
        db: Database {
            pool: db.pool.clone(),
        },
        config,
        sync,
    }
}

/// Router over `db` with a repo source serving a single empty `eng.json`.
pub fn test_app(db: &TestDb) -> Router {
    let source = FakeSource::new(FakeBehavior::Files(vec![(
        "eng.json".to_string(),
        "{}".to_string(),
    )]));
    crate::build_router(test_state(db, source))
}

pub fn token_for(user: &User) -> String {
    create_token(user.id, &user.login, TEST_SECRET).unwrap()
}

/// Sends one request and decodes the JSON reply (`Value::Null` when empty).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}
