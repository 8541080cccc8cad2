//! Contact form routes.
//!
//! GET renders the form as JSON. POST accepts url-encoded or multipart
//! submissions and answers with the exported data, or with the errors and
//! the re-rendered form.

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Multipart, RawQuery, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Map, Value, json};
use tower_sessions::Session;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::file::FileRecord;
use crate::form::csrf::session_sesskey;
use crate::form::{
    FormDefinition, FormElement, FormError, FormMethod, FormModel, FormOptions, FormSession,
    ParamType, RepeatControls, RepeatOptions, RepeatTemplate, RequestSnapshot, Rule, RunAt,
    SessKey, UploadedFile,
};
use crate::state::{AppState, GUEST_USER_CONTEXT_ID};

/// Component owning saved contact attachments.
pub const ATTACHMENT_COMPONENT: &str = "local_contact";

const MESSAGE_MIN_CHARS: usize = 10;

/// Create the contact router.
pub fn router() -> Router<AppState> {
    Router::new().route("/contact", get(show_contact).post(submit_contact))
}

/// The contact form.
#[derive(Debug, Default)]
pub struct ContactForm;

impl FormDefinition for ContactForm {
    fn identifier(&self) -> String {
        "contact_form".to_string()
    }

    fn definition(&self, form: &mut FormModel) -> Result<(), FormError> {
        form.add_element(FormElement::header("general", "Contact us"))?;

        form.add_element(FormElement::text("name").label("Your name").max_length(100))?;
        form.set_type("name", ParamType::Text);
        form.add_rule("name", None, Rule::Required, RunAt::Client)?;
        form.add_rule("name", None, Rule::min_length(3), RunAt::Client)?;

        form.add_element(FormElement::text("email").label("Email address"))?;
        form.set_type("email", ParamType::RawTrimmed);
        form.add_rule("email", None, Rule::Required, RunAt::Client)?;
        form.add_rule("email", Some("Invalid email address"), Rule::Email, RunAt::Server)?;

        form.add_element(
            FormElement::select(
                "topic",
                vec![
                    ("general".to_string(), "General question".to_string()),
                    ("support".to_string(), "Support".to_string()),
                    ("feedback".to_string(), "Feedback".to_string()),
                ],
            )
            .label("Topic"),
        )?;
        form.set_type("topic", ParamType::Alpha);
        form.set_default("topic", "general");

        form.add_element(FormElement::textarea("message", 8, 60).label("Message"))?;
        form.set_type("message", ParamType::NoTags);
        form.add_rule("message", None, Rule::Required, RunAt::Server)?;
        form.add_rule("message", None, Rule::max_length(2000), RunAt::Server)?;

        let links = RepeatTemplate::new(vec![FormElement::url("link").label("Link {no}")])
            .with_options("link", RepeatOptions::new().param_type(ParamType::Url));
        let controls = RepeatControls::new("link_repeats", "link_add_fields").add_count(1);
        form.repeat_elements(&links, 1, &controls)?;

        form.add_element(FormElement::header("extras", "Extras"))?;
        form.add_element(FormElement::file("attachment").label("Attachment"))?;
        form.add_element(
            FormElement::advcheckbox("copy")
                .label("Send me a copy")
                .checked_values("1", "0"),
        )?;
        form.set_type("copy", ParamType::Bool);
        form.set_advanced("copy", true);

        form.add_action_buttons(true, Some("Send"))
    }

    fn validation(
        &self,
        data: &Map<String, Value>,
        _files: &BTreeMap<String, PathBuf>,
    ) -> BTreeMap<String, String> {
        let mut errors = BTreeMap::new();
        let message = data.get("message").and_then(Value::as_str).unwrap_or("");
        if !message.is_empty() && message.trim().chars().count() < MESSAGE_MIN_CHARS {
            errors.insert(
                "message".to_string(),
                "Please tell us a bit more.".to_string(),
            );
        }
        errors
    }
}

/// Render the contact form.
///
/// GET /contact
async fn show_contact(
    State(state): State<AppState>,
    session: Session,
    RawQuery(query): RawQuery,
) -> AppResult<Response> {
    let sesskey = session_sesskey(&session).await?;
    let snapshot = RequestSnapshot::from_urlencoded(
        FormMethod::Get,
        query.as_deref().unwrap_or(""),
        "",
    );
    respond(state, snapshot, sesskey).await
}

/// Handle a contact form submission.
///
/// POST /contact
/// Content-Type: application/x-www-form-urlencoded or multipart/form-data
async fn submit_contact(
    State(state): State<AppState>,
    session: Session,
    RawQuery(query): RawQuery,
    request: Request,
) -> AppResult<Response> {
    let sesskey = session_sesskey(&session).await?;
    let query = query.unwrap_or_default();

    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let snapshot = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        read_multipart(&state, &query, multipart).await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let body = String::from_utf8_lossy(&body);
        RequestSnapshot::from_urlencoded(FormMethod::Post, &query, &body)
    };

    let uploads: Vec<PathBuf> = snapshot
        .files
        .values()
        .filter(|file| !file.tmp_path.as_os_str().is_empty())
        .map(|file| file.tmp_path.clone())
        .collect();

    let result = respond(state, snapshot, sesskey).await;
    remove_uploads(&uploads).await;
    result
}

/// Collect text fields into a url-encoded body and write file parts to the
/// upload directory. Files already written are removed if a later part fails.
async fn read_multipart(
    state: &AppState,
    query: &str,
    multipart: Multipart,
) -> AppResult<RequestSnapshot> {
    let mut written = Vec::new();
    let result = collect_multipart(state, query, multipart, &mut written).await;
    if result.is_err() {
        remove_uploads(&written).await;
    }
    result
}

async fn collect_multipart(
    state: &AppState,
    query: &str,
    mut multipart: Multipart,
    written: &mut Vec<PathBuf>,
) -> AppResult<RequestSnapshot> {
    let upload_dir = state.config().temp_dir.join("uploads");
    let mut body = String::new();
    let mut files = BTreeMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if let Some(filename) = field.file_name().map(str::to_string) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            if filename.is_empty() || bytes.is_empty() {
                files.insert(name, UploadedFile::empty());
                continue;
            }

            let tmp_path = upload_dir.join(Uuid::now_v7().simple().to_string());
            written.push(tmp_path.clone());
            tokio::fs::write(&tmp_path, &bytes)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
            debug!(field = %name, filename = %filename, size = bytes.len(), "upload received");
            files.insert(
                name,
                UploadedFile::new(filename, tmp_path, bytes.len() as u64),
            );
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            if !body.is_empty() {
                body.push('&');
            }
            body.push_str(&urlencoding::encode(&name));
            body.push('=');
            body.push_str(&urlencoding::encode(&text));
        }
    }

    Ok(RequestSnapshot::from_urlencoded(FormMethod::Post, query, &body).with_files(files))
}

async fn remove_uploads(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove temporary upload");
            }
        }
    }
}

/// Run [`process_contact`] on a blocking thread; file accessors and the
/// file store use blocking I/O.
async fn respond(
    state: AppState,
    snapshot: RequestSnapshot,
    sesskey: SessKey,
) -> AppResult<Response> {
    tokio::task::spawn_blocking(move || process_contact(&state, snapshot, sesskey))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
}

/// Build the form for one request and decide the response.
fn process_contact(
    state: &AppState,
    snapshot: RequestSnapshot,
    sesskey: SessKey,
) -> AppResult<Response> {
    let env = state.form_environment(sesskey);
    let mut form = FormSession::new(
        ContactForm,
        snapshot,
        FormOptions::new("/contact"),
        env,
    )?;

    if form.is_cancelled() {
        info!(form = %form.identifier(), "contact form cancelled");
        return Ok(Json(json!({ "status": "cancelled" })).into_response());
    }

    if form.no_submit_button_pressed() {
        let rendered = form.render()?;
        return Ok(Json(json!({ "status": "updated", "form": rendered })).into_response());
    }

    if let Some(data) = form.get_data()? {
        let target = FileRecord::new(
            GUEST_USER_CONTEXT_ID,
            ATTACHMENT_COMPONENT,
            "attachment",
            chrono::Utc::now().timestamp_millis(),
            "/",
            "",
        );
        let attachment = form.save_stored_file("attachment", target, false)?;
        info!(
            form = %form.identifier(),
            attachment = attachment.is_some(),
            "contact form accepted"
        );
        return Ok(Json(json!({
            "status": "sent",
            "data": data,
            "attachment": attachment,
        }))
        .into_response());
    }

    let submitted = form.is_submitted();
    let rendered = form.render()?;
    if submitted {
        let errors = form.model().errors().clone();
        debug!(form = %form.identifier(), errors = errors.len(), "contact form rejected");
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "status": "invalid", "errors": errors, "form": rendered })),
        )
            .into_response());
    }

    Ok(Json(json!({ "status": "new", "form": rendered })).into_response())
}
