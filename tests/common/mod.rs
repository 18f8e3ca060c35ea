#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::response::Response as AxumResponse;
use chrono::{Duration, Utc};
use pinbin::commands::serve::router;
use pinbin::config::Config;
use pinbin::App;
use tempfile::TempDir;
use tower::ServiceExt;

/// An app backed by a fresh SQLite file. Keep the `TempDir` alive for the
/// duration of the test.
pub async fn setup() -> (App, TempDir) {
    let mut config = Config::default();
    config.ratelimit.enabled = false;
    setup_with(config).await
}

pub async fn setup_with(mut config: Config) -> (App, TempDir) {
    let dir = TempDir::new().unwrap();
    config.database.url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("test.db").display()
    );
    let app = App::new(config).await.unwrap();
    (app, dir)
}

/// Move a paste's expiry date into the past.
pub async fn expire_paste(app: &App, slug: &str) {
    sqlx::query("UPDATE paste SET exp_date = ? WHERE slug = ?")
        .bind(Utc::now() - Duration::days(1))
        .bind(slug)
        .execute(app.database.pool())
        .await
        .unwrap();
}

pub async fn count_rows(app: &App, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(app.database.pool())
        .await
        .unwrap()
}

pub async fn send(app: &App, request: Request<Body>) -> AxumResponse {
    router(app.clone()).oneshot(request).await.unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

pub async fn body_bytes<B>(response: Response<B>) -> Vec<u8>
where
    B: axum::body::HttpBody,
    B::Error: std::fmt::Debug,
{
    hyper::body::to_bytes(response.into_body())
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json<B>(response: Response<B>) -> serde_json::Value
where
    B: axum::body::HttpBody,
    B::Error: std::fmt::Debug,
{
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header_str<'a, B>(response: &'a Response<B>, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Slug a creation redirect points at.
pub fn redirect_slug<B>(response: &Response<B>) -> String {
    header_str(response, header::LOCATION)
        .trim_start_matches('/')
        .to_owned()
}

/// The removal token from a creation response's cookie.
pub fn removal_cookie<B>(response: &Response<B>) -> String {
    let cookie = header_str(response, header::SET_COOKIE);
    cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("removal="))
        .unwrap()
        .to_owned()
}
