//! Form element types.
//!
//! The set of element kinds is closed: a form is built from [`FormElement`]
//! values whose [`ElementType`] decides how they export values, whether they
//! carry files and how they render.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormElement {
    /// Submitted name; may use bracket syntax (`link[0]`). Display-only
    /// elements may leave it empty.
    pub name: String,

    /// Element type with type-specific configuration.
    #[serde(flatten)]
    pub element_type: ElementType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// The element's own initial value, used when neither the submission
    /// nor the defaults provide one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Additional HTML attributes (`id`, `class`, `size`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<HelpButton>,

    /// Shown read-only; the submitted value is ignored.
    #[serde(default)]
    pub frozen: bool,

    /// Frozen elements normally export their default; persistent ones still
    /// export their own value.
    #[serde(default)]
    pub persistent_freeze: bool,

    /// Display left-to-right regardless of the page direction.
    #[serde(default)]
    pub force_ltr: bool,
}

impl FormElement {
    /// Create a single-line text input.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ElementType::Text { max_length: None })
    }

    pub fn textarea(name: impl Into<String>, rows: u32, cols: u32) -> Self {
        Self::new(name, ElementType::Textarea { rows, cols })
    }

    pub fn password(name: impl Into<String>) -> Self {
        Self::new(name, ElementType::Password)
    }

    /// Create a url input.
    pub fn url(name: impl Into<String>) -> Self {
        Self::new(name, ElementType::Url)
    }

    /// Create a hidden field carrying `value`.
    pub fn hidden(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, ElementType::Hidden).value(value)
    }

    /// Create a dropdown select.
    pub fn select(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(
            name,
            ElementType::Select {
                options,
                multiple: false,
            },
        )
    }

    pub fn multi_select(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(
            name,
            ElementType::Select {
                options,
                multiple: true,
            },
        )
    }

    /// Create a checkbox; unchecked boxes submit nothing.
    pub fn checkbox(name: impl Into<String>) -> Self {
        Self::new(name, ElementType::Checkbox { text: None })
    }

    /// Create a checkbox that always submits `1` or `0`.
    pub fn advcheckbox(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ElementType::AdvCheckbox {
                text: None,
                checked_value: "1".to_string(),
                unchecked_value: "0".to_string(),
            },
        )
    }

    pub fn radio(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(name, ElementType::Radio { options })
    }

    /// Create a raw upload field.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, ElementType::File)
    }

    /// Create a single-file picker backed by a draft area.
    pub fn filepicker(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ElementType::FilePicker {
                accepted_types: Vec::new(),
            },
        )
    }

    /// Create a multi-file manager backed by a draft area.
    ///
    /// `max_files == 0` means unlimited.
    pub fn filemanager(name: impl Into<String>, max_files: usize) -> Self {
        Self::new(
            name,
            ElementType::FileManager {
                max_files,
                accepted_types: Vec::new(),
            },
        )
    }

    /// Create a submit button.
    pub fn submit(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ElementType::Submit {
                value: value.into(),
            },
        )
    }

    /// Create a cancel button.
    pub fn cancel(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ElementType::Cancel {
                value: value.into(),
            },
        )
    }

    /// Create a plain (non-submitting) button.
    pub fn button(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            ElementType::Button {
                value: value.into(),
            },
        )
    }

    /// Create a section header.
    pub fn header(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, ElementType::Header { text: text.into() })
    }

    /// Create display-only text.
    pub fn static_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, ElementType::Static { text: text.into() })
    }

    /// Create a group of elements rendered on one line.
    ///
    /// With `append_name` the children submit as `group[child]`.
    pub fn group(name: impl Into<String>, elements: Vec<FormElement>, append_name: bool) -> Self {
        Self::new(
            name,
            ElementType::Group {
                elements,
                append_name,
                separator: None,
            },
        )
    }

    fn new(name: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            element_type,
            label: None,
            value: None,
            attributes: BTreeMap::new(),
            help: None,
            frozen: false,
            persistent_freeze: false,
            force_ltr: false,
        }
    }

    /// Set the element label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the element's own initial value.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set an HTML attribute.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set max length for text inputs.
    pub fn max_length(mut self, max: usize) -> Self {
        if let ElementType::Text { ref mut max_length } = self.element_type {
            *max_length = Some(max);
        }
        self
    }

    /// Text shown next to a checkbox.
    pub fn checkbox_text(mut self, caption: impl Into<String>) -> Self {
        match self.element_type {
            ElementType::Checkbox { ref mut text } | ElementType::AdvCheckbox { ref mut text, .. } => {
                *text = Some(caption.into());
            }
            _ => {}
        }
        self
    }

    /// Values an advanced checkbox submits when checked and unchecked.
    pub fn checked_values(mut self, checked: impl Into<String>, unchecked: impl Into<String>) -> Self {
        if let ElementType::AdvCheckbox {
            ref mut checked_value,
            ref mut unchecked_value,
            ..
        } = self.element_type
        {
            *checked_value = checked.into();
            *unchecked_value = unchecked.into();
        }
        self
    }

    /// File types a picker or manager accepts (`.pdf`, `image/*`).
    pub fn accepted_types(mut self, types: Vec<String>) -> Self {
        match self.element_type {
            ElementType::FilePicker {
                ref mut accepted_types,
            }
            | ElementType::FileManager {
                ref mut accepted_types,
                ..
            } => *accepted_types = types,
            _ => {}
        }
        self
    }

    /// Separator rendered between group children.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        if let ElementType::Group {
            separator: ref mut sep,
            ..
        } = self.element_type
        {
            *sep = Some(separator.into());
        }
        self
    }

    /// Keep exporting the element's own value while frozen.
    pub fn persistent_freeze(mut self) -> Self {
        self.persistent_freeze = true;
        self
    }

    /// DOM id: the `id` attribute, or one derived from the name.
    pub fn dom_id(&self) -> String {
        match self.attributes.get("id") {
            Some(id) => id.clone(),
            None => format!("id_{}", self.name.replace('[', "_").replace(']', "")),
        }
    }

    /// Get the type name as a string.
    pub fn type_name(&self) -> &'static str {
        self.element_type.type_name()
    }

    /// Mark frozen, recursively for groups.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
        self.persistent_freeze = false;
        if let ElementType::Group { ref mut elements, .. } = self.element_type {
            for child in elements {
                child.freeze();
            }
        }
    }

    /// Children of a group; empty for other kinds.
    pub fn children(&self) -> &[FormElement] {
        match &self.element_type {
            ElementType::Group { elements, .. } => elements,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<FormElement>> {
        match self.element_type {
            ElementType::Group {
                ref mut elements, ..
            } => Some(elements),
            _ => None,
        }
    }
}

/// Element type variants with type-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementType {
    /// Single-line text input.
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },

    /// Multi-line text input.
    Textarea { rows: u32, cols: u32 },

    Password,

    /// Url input.
    Url,

    /// Hidden field.
    Hidden,

    /// Dropdown select.
    Select {
        options: Vec<(String, String)>,
        #[serde(default)]
        multiple: bool,
    },

    /// Single checkbox.
    Checkbox {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Checkbox that submits a value in both states.
    AdvCheckbox {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        checked_value: String,
        unchecked_value: String,
    },

    /// Radio button group.
    Radio { options: Vec<(String, String)> },

    /// Raw file upload.
    File,

    /// Single file chosen into a draft area.
    FilePicker {
        #[serde(default)]
        accepted_types: Vec<String>,
    },

    /// Several files managed in a draft area.
    FileManager {
        max_files: usize,
        #[serde(default)]
        accepted_types: Vec<String>,
    },

    Submit { value: String },

    Cancel { value: String },

    Button { value: String },

    /// Section header opening a fieldset.
    Header { text: String },

    /// Display-only text.
    Static { text: String },

    /// Elements rendered together.
    Group {
        elements: Vec<FormElement>,
        #[serde(default)]
        append_name: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        separator: Option<String>,
    },
}

impl ElementType {
    /// Get the type name as a string.
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementType::Text { .. } => "text",
            ElementType::Textarea { .. } => "textarea",
            ElementType::Password => "password",
            ElementType::Url => "url",
            ElementType::Hidden => "hidden",
            ElementType::Select { .. } => "select",
            ElementType::Checkbox { .. } => "checkbox",
            ElementType::AdvCheckbox { .. } => "advcheckbox",
            ElementType::Radio { .. } => "radio",
            ElementType::File => "file",
            ElementType::FilePicker { .. } => "filepicker",
            ElementType::FileManager { .. } => "filemanager",
            ElementType::Submit { .. } => "submit",
            ElementType::Cancel { .. } => "cancel",
            ElementType::Button { .. } => "button",
            ElementType::Header { .. } => "header",
            ElementType::Static { .. } => "static",
            ElementType::Group { .. } => "group",
        }
    }

    /// Whether the element's value is a draft area id.
    pub fn uses_draft_area(&self) -> bool {
        matches!(
            self,
            ElementType::FilePicker { .. } | ElementType::FileManager { .. }
        )
    }

    /// Whether a missing type declaration should be reported.
    pub fn needs_param_type(&self) -> bool {
        matches!(
            self,
            ElementType::Text { .. } | ElementType::Hidden | ElementType::Url
        )
    }

    /// Buttons export a value only when pressed.
    pub fn is_button(&self) -> bool {
        matches!(
            self,
            ElementType::Submit { .. } | ElementType::Cancel { .. } | ElementType::Button { .. }
        )
    }
}

/// Help icon attached to an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpButton {
    /// String identifier of the help title; `<identifier>_help` is the text.
    pub identifier: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_text: String,
}

impl HelpButton {
    pub fn new(identifier: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            component: component.into(),
            link_text: String::new(),
        }
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_builders() {
        let name = FormElement::text("name").label("Name").max_length(100);
        assert!(matches!(
            name.element_type,
            ElementType::Text {
                max_length: Some(100)
            }
        ));
        assert_eq!(name.label.as_deref(), Some("Name"));

        let hidden = FormElement::hidden("id", 5);
        assert_eq!(hidden.value, Some(json!(5)));

        let adv = FormElement::advcheckbox("agree").checked_values("yes", "no");
        assert!(matches!(
            adv.element_type,
            ElementType::AdvCheckbox { ref checked_value, ref unchecked_value, .. }
                if checked_value == "yes" && unchecked_value == "no"
        ));
    }

    #[test]
    fn test_dom_id() {
        assert_eq!(FormElement::text("link[0]").dom_id(), "id_link_0");
        assert_eq!(
            FormElement::text("x").attribute("id", "custom").dom_id(),
            "custom"
        );
    }

    #[test]
    fn test_freeze_reaches_group_children() {
        let mut group = FormElement::group(
            "buttonar",
            vec![
                FormElement::submit("submitbutton", "Save"),
                FormElement::cancel("cancel", "Cancel"),
            ],
            false,
        );
        group.freeze();
        assert!(group.children().iter().all(|child| child.frozen));
    }

    #[test]
    fn test_type_helpers() {
        assert_eq!(FormElement::filemanager("files", 3).type_name(), "filemanager");
        assert!(FormElement::filepicker("f").element_type.uses_draft_area());
        assert!(!FormElement::file("f").element_type.uses_draft_area());
        assert!(FormElement::url("u").element_type.needs_param_type());
        assert!(FormElement::cancel("c", "Cancel").element_type.is_button());
    }

    #[test]
    fn test_element_serialization() {
        let element = FormElement::select(
            "colour",
            vec![("r".to_string(), "Red".to_string())],
        )
        .label("Colour");
        let json = serde_json::to_value(&element).unwrap();
        assert_eq!(json["type"], "select");
        assert_eq!(json["name"], "colour");

        let parsed: FormElement = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, element);
    }
}
