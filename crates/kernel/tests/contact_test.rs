#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Contact form over HTTP.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use common::{TestApp, body_json, find_value, rendered_elements};
use formwork_kernel::file::FileStore;
use formwork_kernel::form::DEFAULT_MAX_REPEATS;
use formwork_kernel::routes::contact::ATTACHMENT_COMPONENT;
use formwork_kernel::state::GUEST_USER_CONTEXT_ID;

fn post_form(body: String) -> Request<Body> {
    Request::post("/contact")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn contact_body(sesskey: &str, name: &str, message: &str) -> String {
    format!(
        "sesskey={sesskey}&_qf__contact_form=1&name={name}&email=ada%40example.com\
         &topic=support&message={message}&link_repeats=1&link%5B0%5D=https%3A%2F%2Fexample.com\
         &submitbutton=Send"
    )
}

#[tokio::test]
async fn test_get_renders_new_form() {
    let app = TestApp::new();
    let response = app
        .request(Request::get("/contact?name=Ada").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::SET_COOKIE));

    let body = body_json(response).await;
    assert_eq!(body["status"], "new");
    assert_eq!(body["form"]["id"], "mform_contact_form");
    assert_eq!(find_value(&body["form"], "_qf__contact_form"), Some(&json!(1)));
    assert_eq!(find_value(&body["form"], "topic"), Some(&json!("general")));
    // Query values are not a submission of a POST form
    assert_eq!(find_value(&body["form"], "name"), None);

    let names: Vec<&str> = rendered_elements(&body["form"])
        .into_iter()
        .filter_map(|element| element["name"].as_str())
        .collect();
    assert!(names.contains(&"link[0]"));
    assert!(names.contains(&"link_add_fields"));
    assert!(body["form"]["validation_script"]
        .as_str()
        .unwrap()
        .contains("validate_contact_form_name"));
}

#[tokio::test]
async fn test_short_name_is_rejected() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let response = app
        .request_with_cookies(
            post_form(contact_body(&sesskey, "ab", "Hello%2C+this+is+long+enough")),
            &cookies,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["status"], "invalid");
    assert_eq!(
        body["errors"]["name"],
        "You must enter at least 3 characters here."
    );
    assert_eq!(find_value(&body["form"], "name"), Some(&json!("ab")));
}

#[tokio::test]
async fn test_custom_validation_message() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let response = app
        .request_with_cookies(post_form(contact_body(&sesskey, "Ada", "Hi")), &cookies)
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errors"]["message"], "Please tell us a bit more.");
}

#[tokio::test]
async fn test_valid_submission_is_sent() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let response = app
        .request_with_cookies(
            post_form(contact_body(
                &sesskey,
                "Ada+Lovelace",
                "%3Cb%3EHello%3C%2Fb%3E+from+the+engine",
            )),
            &cookies,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "sent");
    assert_eq!(body["data"]["name"], "Ada Lovelace");
    assert_eq!(body["data"]["topic"], "support");
    assert_eq!(body["data"]["link"]["0"], "https://example.com");
    assert_eq!(body["data"]["copy"], "0");
    assert!(!body["data"]["message"].as_str().unwrap().contains('<'));
    assert!(body["data"].get("sesskey").is_none());
    assert!(body["attachment"].is_null());
}

#[tokio::test]
async fn test_wrong_sesskey_is_forbidden() {
    let app = TestApp::new();
    let (cookies, _) = app.open_form("/contact").await;

    let response = app
        .request_with_cookies(
            post_form(contact_body("forged", "Ada", "Hello there, world")),
            &cookies,
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_add_fields_rerenders() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let body = format!(
        "sesskey={sesskey}&_qf__contact_form=1&name=&link_repeats=1&link_add_fields=Add+1+fields+to+form"
    );
    let response = app.request_with_cookies(post_form(body), &cookies).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "updated");
    assert_eq!(find_value(&body["form"], "link_repeats"), Some(&json!(2)));
    assert!(find_value(&body["form"], "link[1]").is_none());
    assert!(
        rendered_elements(&body["form"])
            .iter()
            .any(|element| element["name"] == "link[1]")
    );
}

#[tokio::test]
async fn test_cancel() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let body = format!("sesskey={sesskey}&_qf__contact_form=1&cancel=Cancel");
    let response = app.request_with_cookies(post_form(body), &cookies).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "cancelled");
}

#[tokio::test]
async fn test_multipart_attachment_is_stored() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let boundary = "formworkboundary";
    let mut body = String::new();
    for (name, value) in [
        ("sesskey", sesskey.as_str()),
        ("_qf__contact_form", "1"),
        ("name", "Ada"),
        ("email", "ada@example.com"),
        ("message", "Please see the attached notes."),
        ("link_repeats", "1"),
        ("submitbutton", "Send"),
    ] {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"attachment\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nsee you there\r\n--{boundary}--\r\n"
    ));

    let request = Request::post("/contact")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.request_with_cookies(request, &cookies).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "sent");
    assert_eq!(body["attachment"]["filename"], "notes.txt");

    let item_id = body["attachment"]["item_id"].as_i64().unwrap();
    let stored = app
        .state
        .store()
        .area_files(GUEST_USER_CONTEXT_ID, ATTACHMENT_COMPONENT, "attachment", item_id)
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(app.state.store().content(&stored[0]).unwrap(), b"see you there");

    // Temporary uploads are removed once the request is done
    let leftovers = std::fs::read_dir(app.dir.path().join("temp").join("uploads"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_huge_repeat_counter_is_clamped() {
    let app = TestApp::new();
    let response = app
        .request(
            Request::get("/contact?link_repeats=9223372036854775807")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(
        find_value(&body["form"], "link_repeats"),
        Some(&json!(DEFAULT_MAX_REPEATS))
    );
}

#[tokio::test]
async fn test_malformed_multipart_leaves_no_uploads() {
    let app = TestApp::new();
    let (cookies, sesskey) = app.open_form("/contact").await;

    let boundary = "formworkboundary";
    // The trailing text part is never terminated
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"sesskey\"\r\n\r\n{sesskey}\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"attachment\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nsee you there\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"message\"\r\n\r\nunfinished"
    );

    let request = Request::post("/contact")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.request_with_cookies(request, &cookies).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let leftovers = std::fs::read_dir(app.dir.path().join("temp").join("uploads"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}
