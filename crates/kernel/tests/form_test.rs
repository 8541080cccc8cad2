#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Form lifecycle tests: recognition, sesskey checks, validation and export.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use formwork_kernel::form::{
    FormElement, FormError, FormMethod, FormModel, ParamType, RequestSnapshot, Rule, RunAt,
    SessKey, sanitize,
};
use formwork_test_utils::{TestEnv, TestForm, data, submit, submit_with_files};

fn profile_form() -> TestForm {
    TestForm::new("profile_form", |form: &mut FormModel| {
        form.add_element(FormElement::text("name").label("Name"))?;
        form.set_type("name", ParamType::Text);
        form.add_rule("name", None, Rule::Required, RunAt::Server)?;
        form.add_rule("name", None, Rule::min_length(3), RunAt::Client)?;

        form.add_element(FormElement::text("age").label("Age"))?;
        form.set_type("age", ParamType::Int);
        form.set_default("age", 30);

        form.add_element(FormElement::select(
            "colour",
            vec![
                ("red".to_string(), "Red".to_string()),
                ("blue".to_string(), "Blue".to_string()),
            ],
        ))?;
        form.set_type("colour", ParamType::Alpha);

        form.add_action_buttons(true, None)
    })
}

#[test]
fn test_sanitize_is_idempotent() {
    let mut types = BTreeMap::new();
    types.insert("name".to_string(), ParamType::Text);
    types.insert("age".to_string(), ParamType::Int);
    types.insert("tags".to_string(), ParamType::AlphaNumExt);
    types.insert("tags[extra]".to_string(), ParamType::Int);

    let inputs = [
        ("name", json!("<b>Ada</b> Lovelace")),
        ("age", json!("42 years")),
        ("tags", json!({"0": "rust!", "extra": "7x", "1": "a_b-c"})),
        ("unknown", json!(["x", "<i>y</i>"])),
    ];
    for (name, value) in inputs {
        let once = sanitize(&types, name, &value, ParamType::Text).unwrap();
        let twice = sanitize(&types, name, &once, ParamType::Text).unwrap();
        assert_eq!(once, twice, "cleaning {name} twice changed the value");
    }
}

#[test]
fn test_missing_marker_is_not_submitted() {
    let env = TestEnv::new();
    let mut request = RequestSnapshot::new(FormMethod::Post);
    request.body = data([("name", json!("Ada")), ("sesskey", json!("whatever"))]);

    let mut form = env.session(profile_form(), request).unwrap();
    assert!(!form.is_submitted());
    assert!(!form.is_cancelled());
    assert!(form.get_data().unwrap().is_none());
    assert!(form.get_submitted_data().is_none());
}

#[test]
fn test_wrong_sesskey_aborts() {
    let env = TestEnv::new();
    let request = RequestSnapshot::mock_submit(
        data([("name", json!("Ada"))]),
        BTreeMap::new(),
        FormMethod::Post,
        "profile_form",
        &SessKey::from_string("not-the-session-key"),
    );

    let result = env.session(profile_form(), request);
    assert!(matches!(result, Err(FormError::InvalidSesskey)));
}

#[test]
fn test_missing_sesskey_aborts() {
    let env = TestEnv::new();
    let mut request = RequestSnapshot::new(FormMethod::Post);
    request.body = data([("_qf__profile_form", json!("1")), ("name", json!("Ada"))]);

    let result = env.session(profile_form(), request);
    assert!(matches!(result, Err(FormError::InvalidSesskey)));
}

#[test]
fn test_failed_validation_returns_no_data() {
    let env = TestEnv::new();
    let request = submit("profile_form", data([("name", json!(""))]));

    let mut form = env.session(profile_form(), request).unwrap();
    assert!(form.is_submitted());
    assert!(!form.is_validated().unwrap());
    assert!(form.get_data().unwrap().is_none());
    assert_eq!(
        form.model().element_error("name"),
        Some("You must supply a value here.")
    );
}

#[test]
fn test_short_name_fails_min_length() {
    let env = TestEnv::new();
    let request = submit("profile_form", data([("name", json!("ab"))]));

    let mut form = env.session(profile_form(), request).unwrap();
    assert!(form.get_data().unwrap().is_none());
    assert_eq!(
        form.model().element_error("name"),
        Some("You must enter at least 3 characters here.")
    );

    let rendered = form.render().unwrap();
    let name = rendered
        .sections
        .iter()
        .flat_map(|section| section.elements.iter())
        .find(|element| element.name == "name")
        .unwrap();
    assert_eq!(
        name.error.as_deref(),
        Some("You must enter at least 3 characters here.")
    );
    assert_eq!(name.value, Some(json!("ab")));
}

#[test]
fn test_mock_submit_round_trip() {
    let env = TestEnv::new();
    let request = submit(
        "profile_form",
        data([
            ("name", json!("Ada <script>x</script>")),
            ("age", json!("36")),
            ("colour", json!("blue")),
            ("submitbutton", json!("Save changes")),
        ]),
    );

    let mut form = env.session(profile_form(), request).unwrap();
    assert!(form.is_submitted());
    let exported = form.get_data().unwrap().unwrap();
    assert_eq!(exported["age"], json!(36));
    assert_eq!(exported["colour"], json!("blue"));
    assert_eq!(exported["submitbutton"], json!("Save changes"));
    assert!(!exported["name"].as_str().unwrap().contains('<'));
    assert!(!exported.contains_key("sesskey"));
    assert!(!exported.contains_key("_qf__profile_form"));
    assert!(!exported.contains_key("cancel"));
}

#[test]
fn test_invalid_option_is_not_exported() {
    let env = TestEnv::new();
    let request = submit(
        "profile_form",
        data([("name", json!("Ada")), ("colour", json!("green"))]),
    );

    let mut form = env.session(profile_form(), request).unwrap();
    let exported = form.get_data().unwrap().unwrap();
    assert!(!exported.contains_key("colour"));
}

#[test]
fn test_cancel_short_circuits() {
    let env = TestEnv::new();
    let request = submit(
        "profile_form",
        data([("name", json!("")), ("cancel", json!("Cancel"))]),
    );

    let mut form = env.session(profile_form(), request).unwrap();
    assert!(form.is_cancelled());
    assert!(form.get_data().unwrap().is_none());
}

#[test]
fn test_custom_validation_hook() {
    let env = TestEnv::new();
    let definition = profile_form();
    let definition = TestForm::new("profile_form", move |form: &mut FormModel| {
        formwork_kernel::form::FormDefinition::definition(&definition, form)
    })
    .with_validation(|data, _files| {
        let mut errors = BTreeMap::new();
        if data.get("age") == Some(&json!(13)) {
            errors.insert("age".to_string(), "Too young".to_string());
        }
        errors
    });
    let request = submit(
        "profile_form",
        data([("name", json!("Ada")), ("age", json!("13"))]),
    );

    let mut form = env.session(definition, request).unwrap();
    assert!(form.get_data().unwrap().is_none());
    assert_eq!(form.model().element_error("age"), Some("Too young"));
}

#[test]
fn test_get_without_marker_renders_defaults() {
    let env = TestEnv::new();
    let request = RequestSnapshot::from_urlencoded(FormMethod::Get, "age=99", "");

    let mut form = env.session(profile_form(), request).unwrap();
    assert!(!form.is_submitted());
    assert!(form.get_data().unwrap().is_none());

    let rendered = form.render().unwrap();
    let age = rendered
        .sections
        .iter()
        .flat_map(|section| section.elements.iter())
        .find(|element| element.name == "age")
        .unwrap();
    assert_eq!(age.value, Some(json!(30)));
    assert!(age.error.is_none());
    assert!(rendered.validation_script.contains("validate_profile_form"));
}

#[test]
fn test_uneditable_form_is_never_submitted() {
    let env = TestEnv::new();
    let request = submit("profile_form", data([("name", json!("Ada"))]));

    let form = formwork_kernel::form::FormSession::new(
        profile_form(),
        request,
        formwork_kernel::form::FormOptions::new("/test").read_only(),
        env.env.clone(),
    )
    .unwrap();
    assert!(!form.is_submitted());
    assert!(form.model().is_frozen());
    assert!(form.model().element("name").unwrap().frozen);
}

#[test]
fn test_raw_fields_export_exactly_what_was_submitted() {
    let env = TestEnv::new();
    let definition = TestForm::new("raw_form", |form: &mut FormModel| {
        form.add_element(FormElement::text("name"))?;
        form.set_type("name", ParamType::Raw);
        form.add_element(FormElement::textarea("bio", 4, 40))?;
        form.set_type("bio", ParamType::Raw);
        form.add_element(FormElement::hidden("token", ""))?;
        form.set_type("token", ParamType::Raw);
        form.add_element(FormElement::text("extra[note]"))?;
        form.set_type("extra[note]", ParamType::Raw);
        Ok(())
    });
    let submitted = data([
        ("name", json!("  Ada <b>Lovelace</b> ")),
        ("bio", json!("Line one\nLine two & more")),
        ("token", json!("abc123")),
        ("extra", json!({"note": "<i>kept</i>"})),
    ]);

    let mut form = env
        .session(definition, submit("raw_form", submitted.clone()))
        .unwrap();
    assert_eq!(form.get_data().unwrap(), Some(submitted));
}

#[test]
fn test_validation_runs_once_per_request() {
    let env = TestEnv::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let definition = TestForm::new("upload_once", |form: &mut FormModel| {
        form.add_element(FormElement::text("title"))?;
        form.set_type("title", ParamType::Text);
        form.add_element(FormElement::file("attachment"))?;
        Ok(())
    })
    .with_validation(move |_data, _files| {
        counter.fetch_add(1, Ordering::SeqCst);
        BTreeMap::new()
    });
    let mut files = BTreeMap::new();
    files.insert("attachment".to_string(), env.upload("a.txt", b"alpha"));
    let request = submit_with_files("upload_once", data([("title", json!("A"))]), files);

    let mut form = env.session(definition, request).unwrap();
    assert!(form.is_validated().unwrap());
    assert!(form.get_data().unwrap().is_some());
    assert!(form.is_validated().unwrap());
    let copy = env.dir.path().join("a-copy.txt");
    assert!(form.save_file("attachment", &copy, false).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
