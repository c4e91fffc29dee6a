//! Integration tests for sns-queue schedule and status

mod common;

use common::{create_account, setup_test_env};
use libsnscast::{PostFilter, PostStatus, SocialPlatform};
use predicates::prelude::*;

#[tokio::test]
async fn test_schedule_fans_out_to_every_account() {
    let env = setup_test_env().await;
    let twitter = create_account(&env, SocialPlatform::Twitter, "@brand").await;
    let linkedin = create_account(&env, SocialPlatform::Linkedin, "Brand").await;

    let output = env
        .cmd()
        .args(["schedule", "courses:12", "--account", &twitter, "--account", &linkedin])
        .args(["--message", "Enrolment opens Monday", "--at", "2h", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["created"].as_array().unwrap().len(), 2);
    assert!(result["failed"].as_array().unwrap().is_empty());

    let posts = env.db().await.list_scheduled_posts(&PostFilter::default()).await.unwrap();
    assert_eq!(posts.len(), 2);
    let now = chrono::Utc::now().timestamp();
    for post in posts {
        assert_eq!(post.status, PostStatus::Pending);
        assert_eq!(post.content_ref().to_string(), "courses:12");
        assert!(post.scheduled_at > now + 3500);
    }
}

#[tokio::test]
async fn test_schedule_reports_rejected_accounts() {
    let env = setup_test_env().await;
    let twitter = create_account(&env, SocialPlatform::Twitter, "@brand").await;
    let instagram = create_account(&env, SocialPlatform::Instagram, "brand.ig").await;

    env.cmd()
        .args(["schedule", "posts:1", "--account", &twitter, "--account", &instagram])
        .args(["--message", "Text only"])
        .assert()
        .success()
        .stderr(predicate::str::contains(format!("rejected {}", instagram)));

    let posts = env.db().await.list_scheduled_posts(&PostFilter::default()).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].account_id, twitter);
}

#[tokio::test]
async fn test_schedule_with_no_valid_account_fails() {
    let env = setup_test_env().await;

    env.cmd()
        .args(["schedule", "posts:1", "--account", "missing", "--message", "hi"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("account not found"));
}

#[tokio::test]
async fn test_schedule_rejects_bad_content_reference() {
    let env = setup_test_env().await;
    let twitter = create_account(&env, SocialPlatform::Twitter, "@brand").await;

    env.cmd()
        .args(["schedule", "videos:1", "--account", &twitter, "--message", "hi"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid content type"));
}

#[tokio::test]
async fn test_schedule_rejects_bad_time() {
    let env = setup_test_env().await;
    let twitter = create_account(&env, SocialPlatform::Twitter, "@brand").await;

    env.cmd()
        .args(["schedule", "posts:1", "--account", &twitter, "--message", "hi"])
        .args(["--at", "someday maybe"])
        .assert()
        .code(3);
}

#[tokio::test]
async fn test_status_aggregates_content() {
    let env = setup_test_env().await;
    let a = create_account(&env, SocialPlatform::Twitter, "@one").await;
    let b = create_account(&env, SocialPlatform::Twitter, "@two").await;

    env.cmd()
        .args(["schedule", "works:3", "--account", &a, "--account", &b, "--message", "New work"])
        .args(["--at", "1h"])
        .assert()
        .success();

    let output = env
        .cmd()
        .args(["status", "works:3", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["stats"]["overall"]["pending"], 2);
    assert_eq!(status["posts"].as_array().unwrap().len(), 2);
}
