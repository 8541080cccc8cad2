#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for HTTP integration tests.
//!
//! Each [`TestApp`] owns a temporary file store and builds the real router
//! and session layer on top of it.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_sessions::cookie::SameSite;

use formwork_kernel::config::Config;
use formwork_kernel::state::AppState;
use formwork_kernel::{routes, session};

/// Test application wrapper using the real routes and state.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = Config {
            port: 0,
            debug_developer: true,
            filestore_dir: dir.path().join("filestore"),
            temp_dir: dir.path().join("temp"),
            max_upload_bytes: 1024 * 1024,
            cookie_same_site: "strict".to_string(),
        };
        let state = AppState::new(&config).expect("failed to initialize AppState");

        // Must match main.rs, minus tracing and timeouts
        let router = routes::router()
            .layer(axum::extract::DefaultBodyLimit::max(config.max_upload_bytes))
            .layer(session::create_session_layer(SameSite::Strict))
            .with_state(state.clone());

        Self { router, state, dir }
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// Send a request with cookies from a previous response.
    pub async fn request_with_cookies(
        &self,
        mut request: Request<Body>,
        cookies: &str,
    ) -> Response {
        if !cookies.is_empty() {
            request.headers_mut().insert(
                header::COOKIE,
                cookies.parse().expect("Invalid cookie header"),
            );
        }
        self.request(request).await
    }

    /// Load a form page and return its session cookies and sesskey.
    pub async fn open_form(&self, uri: &str) -> (String, String) {
        let response = self
            .request(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        let cookies = extract_cookies(&response);
        let body = body_json(response).await;
        let sesskey = find_value(&body["form"], "sesskey")
            .and_then(|value| value.as_str().map(str::to_string))
            .expect("form has no sesskey field");
        (cookies, sesskey)
    }
}

/// Extract Set-Cookie headers from a response for use in subsequent requests.
pub fn extract_cookies(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            // Extract just the cookie name=value, ignoring attributes
            cookie.split(';').next()
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read a JSON response body.
pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("response is not JSON")
}

/// All rendered elements of a rendered form, groups flattened.
pub fn rendered_elements(form: &Value) -> Vec<&Value> {
    fn walk<'a>(elements: &'a Value, out: &mut Vec<&'a Value>) {
        for element in elements.as_array().into_iter().flatten() {
            out.push(element);
            if let Some(children) = element.get("children") {
                walk(children, out);
            }
        }
    }

    let mut out = Vec::new();
    for section in form["sections"].as_array().into_iter().flatten() {
        walk(&section["elements"], &mut out);
    }
    out
}

/// Value of the rendered element `name`.
pub fn find_value<'a>(form: &'a Value, name: &str) -> Option<&'a Value> {
    rendered_elements(form)
        .into_iter()
        .find(|element| element["name"] == name)
        .and_then(|element| element.get("value"))
}
