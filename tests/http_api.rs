//! HTTP API tests against a server bound to an ephemeral port.

mod common;

use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use common::{channel, video, FakeProcessor, Harness, DAY, NOW};
use tubecast::api::{self, AppState};
use tubecast::refresh::RunState;

struct Server {
    harness: Harness,
    base: String,
    client: reqwest::Client,
}

impl Server {
    async fn start(harness: Harness, token: Option<&str>) -> Self {
        let state = Arc::new(AppState {
            coordinator: harness.coordinator.clone(),
            base_url: Url::parse("https://pods.example.com/").unwrap(),
            api_token: token.map(|t| SecretString::from(t.to_string())),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(api::serve(listener, state));
        Self {
            harness,
            base,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn wait_for_idle(&self) -> Value {
        for _ in 0..200 {
            let status: Value = self
                .client
                .get(self.url("/api/refresh/status"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["running"] == json!(false) && status["state"] != json!("idle") {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run did not finish");
    }
}

#[tokio::test]
async fn test_health() {
    let server = Server::start(Harness::new().await, None).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_channel_crud_round_trip() {
    let server = Server::start(Harness::new().await, None).await;

    let created = server
        .client
        .post(server.url("/api/channels"))
        .json(&json!({
            "display_name": "Daily Science",
            "url": "https://www.youtube.com/@dailyscience",
            "max_episodes": 5
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body: Value = created.json().await.unwrap();
    assert_eq!(body["name"], "daily_science");
    assert_eq!(body["max_episodes"], 5);
    assert_eq!(body["episode_count"], 0);
    assert_eq!(body["due"], true);
    assert_eq!(body["feed_url"], "https://pods.example.com/feeds/daily_science");

    let updated = server
        .client
        .put(server.url("/api/channels/daily_science"))
        .json(&json!({ "refresh_interval_hours": 6 }))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let body: Value = updated.json().await.unwrap();
    assert_eq!(body["refresh_interval_hours"], 6);
    assert_eq!(body["max_episodes"], 5);

    let list: Value = server
        .client
        .get(server.url("/api/channels"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let deleted = server
        .client
        .delete(server.url("/api/channels/daily_science"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = server
        .client
        .get(server.url("/api/channels/daily_science"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_channel_returns_field_errors() {
    let server = Server::start(Harness::new().await, None).await;

    let resp = server
        .client
        .post(server.url("/api/channels"))
        .json(&json!({
            "display_name": "Bad",
            "url": "https://vimeo.com/someone",
            "quality": "4k"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["url", "quality"]);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = Server::start(Harness::new().await, None).await;
    let resp = server
        .client
        .post(server.url("/api/channels"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_feed_route_serves_rss() {
    let h = Harness::new().await;
    let alpha = channel("alpha", 10, 0);
    h.insert(&alpha).await;
    h.lister
        .set_videos(&alpha.url, vec![video("a1", NOW - 2 * DAY), video("a2", NOW - DAY)]);
    h.coordinator.trigger_global().await.unwrap().wait().await;
    let server = Server::start(h, None).await;

    let resp = server.client.get(server.url("/feeds/alpha")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"],
        "application/rss+xml; charset=utf-8"
    );
    let body = resp.text().await.unwrap();
    let feed = feed_rs::parser::parse(body.as_bytes()).unwrap();
    let ids: Vec<_> = feed.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["a2", "a1"]);
    assert!(body.contains("https://pods.example.com/podcasts/alpha/a2.mp4"));

    let with_ext = server
        .client
        .get(server.url("/feeds/alpha.xml"))
        .send()
        .await
        .unwrap();
    assert_eq!(with_ext.text().await.unwrap(), body);

    let missing = server.client.get(server.url("/feeds/ghost")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_media_files_are_served() {
    let h = Harness::new().await;
    let alpha = channel("alpha", 10, 0);
    h.insert(&alpha).await;
    h.lister.set_videos(&alpha.url, vec![video("a1", NOW - DAY)]);
    h.coordinator.trigger_global().await.unwrap().wait().await;
    let server = Server::start(h, None).await;

    let resp = server
        .client
        .get(server.url("/podcasts/alpha/a1.mp4"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"media");
}

#[tokio::test]
async fn test_refresh_trigger_and_status() {
    let h = Harness::new().await;
    let alpha = channel("alpha", 10, 0);
    h.insert(&alpha).await;
    h.lister.set_videos(&alpha.url, vec![video("a1", NOW - DAY)]);
    let server = Server::start(h, None).await;

    let resp = server.client.post(server.url("/api/refresh")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let status = server.wait_for_idle().await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["scope"]["kind"], "global");
    assert!(status["log"].as_array().is_some_and(|log| !log.is_empty()));

    let detail: Value = server
        .client
        .get(server.url("/api/channels/alpha"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["episode_count"], 1);
    assert_eq!(detail["episodes"][0]["external_id"], "a1");
    assert_eq!(detail["last_refresh_at"], NOW);
}

#[tokio::test]
async fn test_second_trigger_conflicts() {
    let h = Harness::with_processor(FakeProcessor::gated()).await;
    let alpha = channel("alpha", 10, 0);
    h.insert(&alpha).await;
    h.lister.set_videos(&alpha.url, vec![video("a1", NOW - DAY)]);
    let server = Server::start(h, None).await;

    let first = server.client.post(server.url("/api/refresh")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    server.harness.processor.entered.notified().await;

    let second = server
        .client
        .post(server.url("/api/channels/alpha/refresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["error"], "refresh already running");

    let status: Value = server
        .client
        .get(server.url("/api/refresh/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], true);
    assert_eq!(status["state"], "in_progress");

    server.harness.processor.release();
    let done = server.wait_for_idle().await;
    assert_eq!(done["state"], "completed");
    assert_eq!(server.harness.coordinator.status().state, RunState::Completed);
}

#[tokio::test]
async fn test_purge_route() {
    let h = Harness::new().await;
    let alpha = channel("alpha", 10, 0);
    h.insert(&alpha).await;
    h.lister.set_videos(&alpha.url, vec![video("a1", NOW - DAY)]);
    h.coordinator.trigger_global().await.unwrap().wait().await;
    let server = Server::start(h, None).await;

    let resp = server
        .client
        .post(server.url("/api/channels/alpha/purge"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], 1);
    assert!(server.harness.stored_ids("alpha").await.is_empty());
}

#[tokio::test]
async fn test_token_guards_mutating_routes_only() {
    let server = Server::start(Harness::new().await, Some("letmein")).await;
    let new_channel = json!({
        "display_name": "Guarded",
        "url": "https://www.youtube.com/@guarded"
    });

    let anonymous = server
        .client
        .post(server.url("/api/channels"))
        .json(&new_channel)
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = server
        .client
        .post(server.url("/api/channels"))
        .bearer_auth("guess")
        .json(&new_channel)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let reads = server.client.get(server.url("/api/channels")).send().await.unwrap();
    assert_eq!(reads.status(), StatusCode::OK);

    let authorized = server
        .client
        .post(server.url("/api/channels"))
        .bearer_auth("letmein")
        .json(&new_channel)
        .send()
        .await
        .unwrap();
    assert_eq!(authorized.status(), StatusCode::CREATED);
}
