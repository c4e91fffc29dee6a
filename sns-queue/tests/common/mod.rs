//! Shared setup for sns-queue integration tests

#![allow(dead_code)]

use assert_cmd::Command;
use libsnscast::{ContentRef, ContentType, Database, PostData, ScheduledPost, SocialAccount, SocialPlatform};
use std::fs;
use tempfile::TempDir;

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_path: String,
    pub db_path: String,
}

impl TestEnv {
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("sns-queue").unwrap();
        cmd.env("SNSCAST_CONFIG", &self.config_path);
        cmd
    }

    pub async fn db(&self) -> Database {
        Database::new(&self.db_path).await.unwrap()
    }
}

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// Config with Twitter and LinkedIn configured; Instagram and Facebook are not.
pub async fn setup_test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("snscast.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[scheduling]
max_retries = 3

[platforms.twitter]
client_id = "test-client"
client_secret = "test-secret"

[platforms.linkedin]
client_id = "test-client"
client_secret = "test-secret"
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    fs::write(&config_path, config_content).unwrap();

    let _db = Database::new(&db_path.to_string_lossy()).await.unwrap();

    TestEnv {
        temp_dir,
        config_path: config_path.to_string_lossy().to_string(),
        db_path: db_path.to_string_lossy().to_string(),
    }
}

pub async fn create_account(env: &TestEnv, platform: SocialPlatform, name: &str) -> String {
    let db = env.db().await;
    let account = SocialAccount::new(platform, name, "token", chrono::Utc::now().timestamp());
    db.create_account(&account).await.unwrap();
    account.id
}

/// Pending posts due 1h, 2h, 3h... from now
pub async fn create_pending_posts(env: &TestEnv, account_id: &str, count: usize) -> Vec<String> {
    let db = env.db().await;
    let account = db.get_account(account_id).await.unwrap().unwrap();
    let now = chrono::Utc::now().timestamp();

    let mut ids = Vec::new();
    for i in 0..count {
        let post = ScheduledPost::new_pending(
            ContentRef::new(ContentType::Posts, 1),
            &account,
            PostData {
                message: format!("Scheduled post {}", i + 1),
                ..Default::default()
            },
            now + (i as i64 + 1) * 3600,
            3,
            now,
        );
        db.create_scheduled_post(&post).await.unwrap();
        ids.push(post.id);
    }
    ids
}
