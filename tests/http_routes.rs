use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use textswap::config::Config;
use textswap::state::AppState;
use textswap::{auth, db, routes};

struct TestApp {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("test.db"))
            .expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let state = AppState::new(pool, Config::default());
        Self {
            app: routes::app(state.clone()),
            state,
            _dir: dir,
        }
    }

    /// Create a user with a live session; returns the Cookie header value.
    fn login(&self, username: &str) -> String {
        let user = auth::ensure_user(&self.state.db, username).unwrap();
        let token = auth::create_session(&self.state.db, &user, 1).unwrap();
        format!("{}={}", self.state.config.auth.cookie_name, token)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String, Option<String>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap(), location)
    }

    async fn get(&self, cookie: &str, uri: &str) -> (StatusCode, String) {
        let request = Request::get(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let (status, body, _) = self.send(request).await;
        (status, body)
    }

    async fn post_form(
        &self,
        cookie: &str,
        uri: &str,
        form: &str,
    ) -> (StatusCode, String, Option<String>) {
        let request = Request::post(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        self.send(request).await
    }

    fn post_id(&self, title: &str) -> i64 {
        let conn = self.state.db.get().unwrap();
        conn.query_row("SELECT id FROM posts WHERE title = ?1", [title], |row| row.get(0))
            .unwrap()
    }

    async fn create_post(&self, cookie: &str, title: &str) -> i64 {
        let form = format!(
            "title={}&isbn=9780131469686&author=Stewart&description=Used&edition=5&price=40&post_type=Textbook",
            title
        );
        let (status, body, _) = self.post_form(cookie, "/posts", &form).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        self.post_id(title)
    }
}

#[tokio::test]
async fn requests_without_a_session_are_unauthorized() {
    let app = TestApp::new();
    let (status, _) = app.get("textswap_session=bogus", "/board").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::get("/").body(Body::empty()).unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn posts_show_on_other_users_tradeboard() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");

    app.create_post(&seller, "Calculus").await;

    let (status, body) = app.get(&buyer, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Signed in as bea"));
    assert!(body.contains("Calculus"));

    let (_, own_board) = app.get(&seller, "/board").await;
    assert!(!own_board.contains("<h2>Calculus</h2>"));

    let (_, selling) = app.get(&seller, "/board/selling").await;
    assert!(selling.contains("<h2>Calculus</h2>"));
}

#[tokio::test]
async fn invalid_post_form_returns_field_errors() {
    let app = TestApp::new();
    let seller = app.login("sam");

    let (status, body, _) = app
        .post_form(&seller, "/posts", "title=&isbn=12ab&author=Stewart&description=x&edition=5&price=999")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let fields: Vec<&str> = json["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["isbn", "price", "title"]);
}

#[tokio::test]
async fn unparseable_numbers_return_field_errors() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");

    let (status, body, _) = app
        .post_form(
            &seller,
            "/posts",
            "title=Calculus&isbn=9780131469686&author=Stewart&description=x&edition=5&price=abc",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["field"], "price");
    assert_eq!(errors[0]["code"], "malformed");

    let (status, body, _) = app
        .post_form(&buyer, "/board/search", "title=calculus&posted_since=yesterday")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["errors"][0]["field"], "posted_since");
}

#[tokio::test]
async fn only_the_seller_can_change_a_post() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");
    let id = app.create_post(&seller, "Calculus").await;

    let (status, _, _) = app.post_form(&buyer, &format!("/posts/{}/sold", id), "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body, _) = app.post_form(&seller, &format!("/posts/{}/sold", id), "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("post sold"));

    let request = Request::delete(format!("/posts/{}", id))
        .header(header::COOKIE, &seller)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app.post_form(&seller, &format!("/posts/{}/sold", id), "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bookmark_toggle_returns_json_state() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");
    let id = app.create_post(&seller, "Calculus").await;

    let uri = format!("/posts/{}/bookmark", id);
    let (status, body, _) = app.post_form(&buyer, &uri, "").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["bookmarked"], true);
    assert_eq!(json["post_id"], id);

    let (_, bookmarks) = app.get(&buyer, "/board/bookmarks").await;
    assert!(bookmarks.contains("Calculus"));

    let (_, body, _) = app.post_form(&buyer, &uri, "").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["bookmarked"], false);

    let (status, _, _) = app.post_form(&buyer, "/posts/9999/bookmark", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_returns_rendered_results_and_count() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");
    app.create_post(&seller, "Calculus").await;
    app.create_post(&seller, "Sociology").await;

    let (status, body, _) = app
        .post_form(&buyer, "/board/search", "title=calculus&isbn=&sort_by=relevance")
        .await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["count"], 1);
    let results = json["results"].as_str().unwrap();
    assert!(results.contains("Calculus"));
    assert!(!results.contains("Sociology"));

    let (status, _, _) = app.post_form(&buyer, "/board/search", "isbn=123").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn negotiation_over_http() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");
    let outsider = app.login("oli");
    let post = app.create_post(&seller, "Calculus").await;

    let (status, _, _) = app.post_form(&seller, &format!("/posts/{}/thread", post), "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, location) = app.post_form(&buyer, &format!("/posts/{}/thread", post), "").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    let thread_uri = location.unwrap();
    assert!(thread_uri.starts_with("/threads/"));

    let messages_uri = format!("{}/messages", thread_uri);
    let (status, _, _) = app.post_form(&buyer, &messages_uri, "content=&offer=20").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body, _) = app.post_form(&buyer, &messages_uri, "content=final+offer&offer=15").await;
    assert!(body.contains("Offer: $20 (retracted)"));
    assert!(body.contains("Offer: $15 (pending)"));

    let (status, _, _) = app.post_form(&buyer, &messages_uri, "content=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let latest: i64 = {
        let conn = app.state.db.get().unwrap();
        conn.query_row("SELECT MAX(id) FROM messages", [], |row| row.get(0))
            .unwrap()
    };

    let (status, _, _) = app
        .post_form(&buyer, &format!("/messages/{}/respond", latest), "accept=true")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body, _) = app
        .post_form(&seller, &format!("/messages/{}/respond", latest), "accept=true")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Offer: $15 (accepted)"));

    // Retracting a resolved offer changes nothing
    let (status, body, _) = app
        .post_form(&buyer, &format!("/messages/{}/retract", latest), "")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Offer: $15 (accepted)"));

    let (status, _) = app.get(&outsider, &thread_uri).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app.post_form(&buyer, &messages_uri, "content=thanks").await;
    assert_eq!(status, StatusCode::OK);
    let text_id: i64 = {
        let conn = app.state.db.get().unwrap();
        conn.query_row("SELECT MAX(id) FROM messages", [], |row| row.get(0))
            .unwrap()
    };
    let (status, _, _) = app
        .post_form(&buyer, &format!("/messages/{}/retract", text_id), "")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, tabs) = app.get(&seller, "/threads/selling").await;
    assert!(tabs.contains("bea"));
    let (_, tabs) = app.get(&buyer, "/threads/buying").await;
    assert!(tabs.contains("sam"));
}

#[tokio::test]
async fn refresh_is_empty_until_something_new_arrives() {
    let app = TestApp::new();
    let seller = app.login("sam");
    let buyer = app.login("bea");
    let post = app.create_post(&seller, "Calculus").await;
    let (_, _, location) = app.post_form(&buyer, &format!("/posts/{}/thread", post), "").await;
    let thread_uri = location.unwrap();

    app.post_form(&buyer, &format!("{}/messages", thread_uri), "content=hello")
        .await;

    let (status, body) = app
        .get(&seller, &format!("{}/refresh?since=2999-01-01T00:00:00Z", thread_uri))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let (status, body) = app
        .get(&seller, &format!("{}/refresh?since=2000-01-01T00:00:00Z", thread_uri))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("hello"));
}
