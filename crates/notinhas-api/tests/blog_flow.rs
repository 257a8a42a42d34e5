//! End-to-end tests: the real router on a random port, driven over HTTP.
//! Each user gets its own client with a cookie store, so the session cookie
//! set at login is carried exactly like a browser would.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, multipart};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

use notinhas_api::routes::build_router;
use notinhas_api::token::TokenIssuer;
use notinhas_api::uploads::UploadStore;
use notinhas_api::{AppState, AppStateInner};
use notinhas_db::Database;

struct TestServer {
    base_url: String,
    _data_dir: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let data_dir = tempfile::tempdir().expect("Failed to create temp dir");

        let db = Database::open(&data_dir.path().join("notinhas.db")).expect("Failed to open DB");
        let uploads = UploadStore::new(data_dir.path().join("uploads"), 64 * 1024)
            .await
            .expect("Failed to create upload dir");

        let state: AppState = Arc::new(AppStateInner {
            db,
            tokens: TokenIssuer::new(b"test-secret", None),
            uploads,
            cookie_secure: false,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            _data_dir: data_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn client(&self) -> Client {
        Client::builder().cookie_store(true).build().unwrap()
    }

    /// Register and log in; the returned client carries the session cookie.
    async fn user(&self, username: &str, password: &str) -> (Client, String) {
        let client = self.client();

        let resp = client
            .post(self.url("/auth/register"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();

        (client, body["user_id"].as_str().unwrap().to_string())
    }

    async fn create_post(&self, client: &Client, title: &str) -> Value {
        let form = multipart::Form::new()
            .text("title", title.to_string())
            .text("summary", "a summary")
            .text("content", "<p>hello</p>")
            .part(
                "file",
                multipart::Part::bytes(b"fake image bytes".to_vec()).file_name("cover.png"),
            );

        let resp = client
            .post(self.url("/posts"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }

    async fn comment(&self, client: &Client, post_id: &str, content: &str) -> Value {
        let resp = client
            .post(self.url(&format!("/posts/{}/comments", post_id)))
            .json(&json!({ "content": content }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await;
    let resp = server.client().get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_only_author_deletes_post() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let (bob, _) = server.user("bob", "pw2").await;

    let post = server.create_post(&alice, "P1").await;
    let post_id = post["id"].as_str().unwrap();
    let post_url = server.url(&format!("/posts/{}", post_id));

    let resp = bob.delete(&post_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");

    let resp = alice.delete(&post_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server.client().get(&post_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_author_moderates_comments() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let (bob, _) = server.user("bob", "pw2").await;
    let (carol, _) = server.user("carol", "pw3").await;

    let post = server.create_post(&alice, "P1").await;
    let post_id = post["id"].as_str().unwrap();
    let comment = server.comment(&bob, post_id, "first!").await;
    let comment_url = server.url(&format!(
        "/posts/{}/comments/{}",
        post_id,
        comment["id"].as_str().unwrap()
    ));

    let resp = alice.delete(&comment_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Already gone: NotFound, not Forbidden, even for a stranger.
    let resp = carol.delete(&comment_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_comment_deletion_rights() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let (bob, _) = server.user("bob", "pw2").await;
    let (carol, _) = server.user("carol", "pw3").await;

    let post = server.create_post(&alice, "P1").await;
    let post_id = post["id"].as_str().unwrap();
    let first = server.comment(&bob, post_id, "one").await;
    let second = server.comment(&carol, post_id, "two").await;

    let url_of = |c: &Value| {
        server.url(&format!("/posts/{}/comments/{}", post_id, c["id"].as_str().unwrap()))
    };

    // Carol may not remove Bob's comment.
    let resp = carol.delete(url_of(&first)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Bob removes their own.
    let resp = bob.delete(url_of(&first)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let comments: Value = server
        .client()
        .get(server.url(&format!("/posts/{}/comments", post_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let comments = comments.as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["id"], second["id"]);
    assert_eq!(comments[0]["author"]["username"], "carol");
}

#[tokio::test]
async fn test_writes_require_a_session() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let post = server.create_post(&alice, "P1").await;
    let post_url = server.url(&format!("/posts/{}", post["id"].as_str().unwrap()));

    let anonymous = server.client();
    let resp = anonymous.delete(&post_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing session token");

    let resp = anonymous
        .delete(&post_url)
        .header("Cookie", "token=not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid session token");

    // Reads stay public.
    let resp = anonymous.get(&post_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let server = TestServer::start().await;
    server.user("alice", "pw1").await;
    let client = server.client();

    let wrong_password = client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "alice", "password": "nope" }))
        .send()
        .await
        .unwrap();
    let unknown_user = client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "mallory", "password": "pw1" }))
        .send()
        .await
        .unwrap();

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), wrong_password.status());
    let a: Value = wrong_password.json().await.unwrap();
    let b: Value = unknown_user.json().await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_duplicate_registration() {
    let server = TestServer::start().await;
    server.user("alice", "pw1").await;

    let resp = server
        .client()
        .post(server.url("/auth/register"))
        .json(&json!({ "username": "alice", "password": "other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "username already taken");
}

#[tokio::test]
async fn test_profile_and_logout() {
    let server = TestServer::start().await;
    let (alice, alice_id) = server.user("alice", "pw1").await;

    let resp = alice.get(server.url("/auth/profile")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user_id"], alice_id.as_str());
    assert_eq!(body["username"], "alice");

    let resp = alice.post(server.url("/auth/logout")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = alice.get(server.url("/auth/profile")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_update_is_partial_and_owner_only() {
    let server = TestServer::start().await;
    let (alice, alice_id) = server.user("alice", "pw1").await;
    let (bob, _) = server.user("bob", "pw2").await;

    let post = server.create_post(&alice, "Original").await;
    let post_url = server.url(&format!("/posts/{}", post["id"].as_str().unwrap()));
    let cover = post["cover"].as_str().unwrap().to_string();
    assert!(cover.starts_with("uploads/") && cover.ends_with(".png"));

    // The cover is served by the static route.
    let resp = server.client().get(server.url(&format!("/{}", cover))).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"fake image bytes");

    let resp = bob
        .put(&post_url)
        .multipart(multipart::Form::new().text("title", "Hijacked"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = alice
        .put(&post_url)
        .multipart(multipart::Form::new().text("title", "Edited"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["title"], "Edited");
    assert_eq!(updated["summary"], "a summary");
    assert_eq!(updated["cover"], cover.as_str());
    assert_eq!(updated["author"]["id"], alice_id.as_str());

    // A new file replaces the cover.
    let resp = alice
        .put(&post_url)
        .multipart(multipart::Form::new().part(
            "file",
            multipart::Part::bytes(b"new".to_vec()).file_name("second.jpg"),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert!(updated["cover"].as_str().unwrap().ends_with(".jpg"));
    assert_eq!(updated["title"], "Edited");

    let resp = alice
        .put(&post_url)
        .multipart(multipart::Form::new().text("title", "  "))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_resources_take_precedence_over_forbidden() {
    let server = TestServer::start().await;
    let (bob, _) = server.user("bob", "pw2").await;

    let ghost = server.url("/posts/00000000-0000-0000-0000-000000000042");
    let resp = bob.delete(&ghost).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = bob
        .put(&ghost)
        .multipart(multipart::Form::new().text("title", "x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = bob.delete(server.url("/posts/not-a-uuid")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = bob
        .post(format!("{}/comments", ghost))
        .json(&json!({ "content": "hello?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleted_post_leaves_no_comments() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let (bob, _) = server.user("bob", "pw2").await;

    let post = server.create_post(&alice, "P1").await;
    let post_id = post["id"].as_str().unwrap();
    for i in 0..3 {
        server.comment(&bob, post_id, &format!("comment {}", i)).await;
    }

    let detail: Value = server
        .client()
        .get(server.url(&format!("/posts/{}", post_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["comments"].as_array().unwrap().len(), 3);
    assert_eq!(detail["comment_count"], 3);

    let resp = alice
        .delete(server.url(&format!("/posts/{}", post_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client()
        .get(server.url(&format!("/posts/{}/comments", post_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listing_is_capped_and_newest_first() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;

    let mut last_title = String::new();
    for i in 0..22 {
        last_title = format!("post {}", i);
        server.create_post(&alice, &last_title).await;
    }

    let posts: Value = server
        .client()
        .get(server.url("/posts?limit=50"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 20);
    assert_eq!(posts[0]["title"], last_title.as_str());
    assert_eq!(posts[0]["author"]["username"], "alice");

    let stamps: Vec<DateTime<Utc>> = posts
        .iter()
        .map(|p| p["created_at"].as_str().unwrap().parse().unwrap())
        .collect();
    let mut sorted = stamps.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(stamps, sorted);

    // The next page picks up right after the last post shown.
    let last = &posts[19];
    let rest: Value = server
        .client()
        .get(server.url("/posts"))
        .query(&[
            ("before", last["created_at"].as_str().unwrap()),
            ("before_id", last["id"].as_str().unwrap()),
        ])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rest = rest.as_array().unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1]["title"], "post 0");
}

#[tokio::test]
async fn test_create_post_validation() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;

    let resp = alice
        .post(server.url("/posts"))
        .multipart(multipart::Form::new().text("title", "No body"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = alice
        .post(server.url("/posts"))
        .multipart(
            multipart::Form::new()
                .text("title", "t")
                .text("summary", "s")
                .text("content", "c")
                .part(
                    "file",
                    multipart::Part::bytes(b"x".to_vec()).file_name("weird.p%g"),
                ),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let posts: Value = server
        .client()
        .get(server.url("/posts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(posts.as_array().unwrap().is_empty());
}

async fn assert_validation_error(resp: reqwest::Response) {
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.expect("error body should be JSON");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_malformed_bodies_are_validation_errors() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let post = server.create_post(&alice, "P1").await;
    let comments_url = server.url(&format!("/posts/{}/comments", post["id"].as_str().unwrap()));
    let client = server.client();

    let resp = client
        .post(server.url("/auth/register"))
        .json(&json!({ "username": "bob" }))
        .send()
        .await
        .unwrap();
    assert_validation_error(resp).await;

    let resp = client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "alice", "password": "pw1", "admin": true }))
        .send()
        .await
        .unwrap();
    assert_validation_error(resp).await;

    let resp = alice.post(&comments_url).json(&json!({})).send().await.unwrap();
    assert_validation_error(resp).await;

    let resp = alice
        .post(&comments_url)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_validation_error(resp).await;

    let resp = client.get(server.url("/posts?limit=-1")).send().await.unwrap();
    assert_validation_error(resp).await;

    let resp = alice
        .post(server.url("/posts"))
        .json(&json!({ "title": "t", "summary": "s", "content": "c" }))
        .send()
        .await
        .unwrap();
    assert_validation_error(resp).await;
}

#[tokio::test]
async fn test_comment_text_is_kept_as_sent() {
    let server = TestServer::start().await;
    let (alice, _) = server.user("alice", "pw1").await;
    let post = server.create_post(&alice, "P1").await;
    let post_id = post["id"].as_str().unwrap();

    let created = server.comment(&alice, post_id, "  indented\n").await;
    assert_eq!(created["content"], "  indented\n");

    let listed: Value = server
        .client()
        .get(server.url(&format!("/posts/{}/comments", post_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["content"], "  indented\n");

    let resp = alice
        .post(server.url(&format!("/posts/{}/comments", post_id)))
        .json(&json!({ "content": " \t " }))
        .send()
        .await
        .unwrap();
    assert_validation_error(resp).await;
}
