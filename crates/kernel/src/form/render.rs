//! Structured render tree.
//!
//! Forms are not turned into HTML here. [`render`] produces a serializable
//! tree that a template layer or a client application can draw.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::client_script;
use super::model::{FormModel, JsInitCall, JsModule, LockOptions};
use super::types::{ElementType, FormElement, HelpButton};

/// A form ready to be drawn.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedForm {
    pub id: String,
    pub name: String,
    pub method: String,
    pub action: String,
    pub attributes: BTreeMap<String, String>,
    pub sections: Vec<RenderedSection>,
    /// Whether any element is required, so a legend can be shown.
    pub has_required: bool,
    pub frozen: bool,
    pub change_checker: bool,
    pub lock_options: LockOptions,
    pub js_module: JsModule,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub js_calls: Vec<JsInitCall>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub validation_script: String,
}

/// A run of elements, under a header or not.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<RenderedHeader>,
    pub elements: Vec<RenderedElement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedHeader {
    pub name: String,
    pub id: String,
    pub text: String,
    pub collapsible: bool,
    pub collapsed: bool,
    pub advanced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedElement {
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Caption, button text or static content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<(String, String)>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub required: bool,
    pub advanced: bool,
    pub frozen: bool,
    pub force_ltr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<HelpButton>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderedElement>,
}

/// Build the render tree of a model.
///
/// Section state should already be resolved with
/// [`FormModel::resolve_sections`].
pub fn render(model: &FormModel) -> RenderedForm {
    let mut sections = Vec::new();
    let mut current = RenderedSection {
        header: None,
        elements: Vec::new(),
    };

    for element in model.elements() {
        let starts_section = match &element.element_type {
            ElementType::Header { .. } => true,
            _ => model.closes_header(&element.name),
        };
        if starts_section && (current.header.is_some() || !current.elements.is_empty()) {
            sections.push(std::mem::replace(
                &mut current,
                RenderedSection {
                    header: None,
                    elements: Vec::new(),
                },
            ));
        }

        if let ElementType::Header { text } = &element.element_type {
            let collapsed = model.is_collapsed(&element.name);
            current.header = Some(RenderedHeader {
                name: element.name.clone(),
                id: element.dom_id(),
                text: text.clone(),
                collapsible: collapsed.is_some(),
                collapsed: collapsed.unwrap_or(false),
                advanced: model.is_advanced(&element.name),
            });
        } else {
            current.elements.push(render_element(model, element));
        }
    }
    if current.header.is_some() || !current.elements.is_empty() {
        sections.push(current);
    }

    RenderedForm {
        id: model.id().to_string(),
        name: model.name().to_string(),
        method: model.method().as_str().to_string(),
        action: model.action().to_string(),
        attributes: model.attributes().clone(),
        sections,
        has_required: !model.is_frozen()
            && model.rules().keys().any(|name| model.is_element_required(name)),
        frozen: model.is_frozen(),
        change_checker: model.is_change_checker_enabled(),
        lock_options: model.lock_options(),
        js_module: FormModel::js_module(),
        js_calls: model.js_init_calls().to_vec(),
        validation_script: client_script::validation_script(model),
    }
}

fn render_element(model: &FormModel, element: &FormElement) -> RenderedElement {
    let (text, options) = match &element.element_type {
        ElementType::Checkbox { text } | ElementType::AdvCheckbox { text, .. } => {
            (text.clone(), Vec::new())
        }
        ElementType::Select { options, .. } | ElementType::Radio { options } => {
            (None, options.clone())
        }
        ElementType::Submit { value }
        | ElementType::Cancel { value }
        | ElementType::Button { value } => (Some(value.clone()), Vec::new()),
        ElementType::Static { text } => (Some(text.clone()), Vec::new()),
        _ => (None, Vec::new()),
    };

    let value = match &element.element_type {
        ElementType::Password | ElementType::File | ElementType::Static { .. } => None,
        ElementType::Group { .. } => None,
        _ => model.current_value(element),
    };

    RenderedElement {
        name: element.name.clone(),
        id: element.dom_id(),
        kind: element.type_name(),
        label: element.label.clone(),
        value,
        text,
        options,
        attributes: element.attributes.clone(),
        required: model.is_element_required(&element.name),
        advanced: model.is_advanced(&element.name),
        frozen: element.frozen,
        force_ltr: element.force_ltr,
        error: model.element_error(&element.name).map(str::to_string),
        help: element.help.clone(),
        children: element
            .children()
            .iter()
            .map(|child| render_element(model, child))
            .collect(),
    }
}
