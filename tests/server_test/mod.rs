//! Webhook tests.
//!
//! These start the bot's webhook route with a `Context` pointing at a fake
//! GitHub, deliver signed `pull_request` events to it, and check the
//! response and the requests the bot made to GitHub.

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, StatusCode};
use axum::routing::post;
use branchbot::config::ConfigCache;
use branchbot::github;
use branchbot::handlers::{BranchCleaner, Context};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::{FakeGithub, FakeGithubHandle};

const SECRET: &str = "webhook-secret";
const CONFIG_PATH: &str = "/my-org/repo/main/branchbot.toml";
const DELETE_PATH: &str = "/repos/my-org/repo/git/refs/heads/my-feature";

struct Bot {
    url: String,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Bot {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn start_bot(gh: &FakeGithubHandle) -> Bot {
    let ctx = Arc::new(Context {
        github: gh.client(),
        config_cache: ConfigCache::new(),
        branch_cleaner: BranchCleaner::new("branch-cleaner"),
        webhook_secret: SECRET.to_string().into(),
    });
    let app = Router::new()
        .route("/github-hook", post(github::webhook))
        .with_state(ctx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/github-hook", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Bot { url, task }
}

fn sign(payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn payload(action: &str, merged: bool, head_repo: &str) -> String {
    format!(
        r#"{{
            "action": "{action}",
            "number": 1,
            "pull_request": {{
                "number": 1,
                "merged": {merged},
                "base": {{
                    "ref": "master",
                    "repo": {{ "name": "repo", "full_name": "my-org/repo", "owner": {{ "login": "my-org" }} }}
                }},
                "head": {{ "ref": "my-feature", "repo": {head_repo} }}
            }},
            "repository": {{
                "name": "repo",
                "full_name": "my-org/repo",
                "owner": {{ "login": "my-org" }},
                "default_branch": "main"
            }}
        }}"#
    )
}

const SAME_REPO: &str = r#"{ "name": "repo", "full_name": "my-org/repo", "owner": { "login": "my-org" } }"#;
const FORK: &str = r#"{ "name": "repo", "full_name": "different-org/repo", "owner": { "login": "different-org" } }"#;

async fn deliver(bot: &Bot, event: &str, payload: &str) -> (StatusCode, String) {
    let resp = reqwest::Client::new()
        .post(&bot.url)
        .header("X-GitHub-Event", event)
        .header("X-Hub-Signature-256", sign(payload))
        .body(payload.to_string())
        .send()
        .await
        .unwrap();
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
    (status, resp.text().await.unwrap())
}

#[tokio::test]
async fn merged_same_repo_deletes_branch() {
    let gh = FakeGithub::new()
        .config("[branch-cleaner]\n")
        .route(Method::DELETE, DELETE_PATH, StatusCode::NO_CONTENT, "")
        .start()
        .await;
    let bot = start_bot(&gh).await;
    let (status, body) = deliver(&bot, "pull_request", &payload("closed", true, SAME_REPO)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, "processed request");
    gh.assert_requests(&[(Method::GET, CONFIG_PATH), (Method::DELETE, DELETE_PATH)]);
}

#[tokio::test]
async fn fork_is_left_alone() {
    let gh = FakeGithub::new().config("[branch-cleaner]\n").start().await;
    let bot = start_bot(&gh).await;
    let (status, _) = deliver(&bot, "pull_request", &payload("closed", true, FORK)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = deliver(&bot, "pull_request", &payload("closed", true, "null")).await;
    assert_eq!(status, StatusCode::OK);
    // The second delivery is served from the config cache.
    gh.assert_requests(&[(Method::GET, CONFIG_PATH)]);
}

#[tokio::test]
async fn unmerged_and_open_are_left_alone() {
    let gh = FakeGithub::new().config("[branch-cleaner]\n").start().await;
    let bot = start_bot(&gh).await;
    deliver(&bot, "pull_request", &payload("closed", false, SAME_REPO)).await;
    deliver(&bot, "pull_request", &payload("opened", false, SAME_REPO)).await;
    deliver(&bot, "pull_request", &payload("reopened", false, SAME_REPO)).await;
    gh.assert_requests(&[(Method::GET, CONFIG_PATH)]);
}

#[tokio::test]
async fn not_enabled_without_config() {
    let gh = FakeGithub::new()
        .route(Method::DELETE, DELETE_PATH, StatusCode::NO_CONTENT, "")
        .start()
        .await;
    let bot = start_bot(&gh).await;
    let (status, body) = deliver(&bot, "pull_request", &payload("closed", true, SAME_REPO)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    gh.assert_requests(&[(Method::GET, CONFIG_PATH)]);
}

#[tokio::test]
async fn failed_deletion_is_reported() {
    let gh = FakeGithub::new()
        .config("[branch-cleaner]\n")
        .route(
            Method::DELETE,
            DELETE_PATH,
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Reference does not exist"}"#,
        )
        .start()
        .await;
    let bot = start_bot(&gh).await;
    let merged = payload("closed", true, SAME_REPO);
    let (status, _) = deliver(&bot, "pull_request", &merged).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    // A redelivery tries again; the bot keeps no memory of earlier events.
    let (status, _) = deliver(&bot, "pull_request", &merged).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    gh.assert_requests(&[
        (Method::GET, CONFIG_PATH),
        (Method::DELETE, DELETE_PATH),
        (Method::DELETE, DELETE_PATH),
    ]);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let gh = FakeGithub::new().config("[branch-cleaner]\n").start().await;
    let bot = start_bot(&gh).await;
    let resp = reqwest::Client::new()
        .post(&bot.url)
        .header("X-GitHub-Event", "pull_request")
        .header("X-Hub-Signature-256", sign("something else"))
        .body(payload("closed", true, SAME_REPO))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 403);
    gh.assert_requests(&[]);
}

#[tokio::test]
async fn other_events_are_ignored() {
    let gh = FakeGithub::new().start().await;
    let bot = start_bot(&gh).await;
    let (status, body) = deliver(&bot, "ping", r#"{"zen": "Keep it logically awesome."}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ignored request");
    let (_, body) = deliver(&bot, "issues", "{}").await;
    assert_eq!(body, "ignored request");
    gh.assert_requests(&[]);
}
