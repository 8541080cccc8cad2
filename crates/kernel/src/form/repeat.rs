//! Repeated groups of elements.
//!
//! A [`RepeatTemplate`] is instantiated once per repeat. Each instance renames
//! the template's elements to indexed names and rewrites the per-element
//! options to target those names; [`FormModel::repeat_elements`] adds the
//! instances together with the counter and "add more" button.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, warn};

use super::error::FormError;
use super::model::{Condition, FormModel};
use super::param::{ParamType, clean_param, scalar_to_string};
use super::rules::{Rule, RunAt};
use super::types::{ElementType, FormElement, HelpButton};

/// Placeholder replaced by the 1-based repeat number.
const REPEAT_NO: &str = "{no}";

/// Upper bound on repeats unless the form sets its own.
pub const DEFAULT_MAX_REPEATS: usize = 100;

/// A rule attached to every repeat of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatRule {
    pub rule: Rule,
    pub message: Option<String>,
    pub run_at: RunAt,
}

/// A `disabled_if` dependency attached to every repeat of an element.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatDependency {
    pub depends_on: String,
    pub condition: Condition,
    pub value: String,
}

/// Options applied to each repeat of one template element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepeatOptions {
    /// Default value; string defaults may contain `{no}`.
    pub default: Option<Value>,
    pub param_type: Option<ParamType>,
    pub help: Option<HelpButton>,
    pub disabled_if: Vec<RepeatDependency>,
    pub rules: Vec<RepeatRule>,
    /// Only meaningful for headers.
    pub expanded: Option<bool>,
    pub advanced: bool,
}

impl RepeatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn param_type(mut self, param: ParamType) -> Self {
        self.param_type = Some(param);
        self
    }

    pub fn help(mut self, identifier: impl Into<String>, component: impl Into<String>) -> Self {
        self.help = Some(HelpButton::new(identifier, component));
        self
    }

    pub fn disabled_if(
        mut self,
        depends_on: impl Into<String>,
        condition: Condition,
        value: impl Into<String>,
    ) -> Self {
        self.disabled_if.push(RepeatDependency {
            depends_on: depends_on.into(),
            condition,
            value: value.into(),
        });
        self
    }

    pub fn rule(mut self, rule: Rule, message: Option<&str>, run_at: RunAt) -> Self {
        self.rules.push(RepeatRule {
            rule,
            message: message.map(str::to_string),
            run_at,
        });
        self
    }

    pub fn expanded(mut self, expanded: bool) -> Self {
        self.expanded = Some(expanded);
        self
    }

    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }
}

/// Elements to repeat, with options keyed by template element name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepeatTemplate {
    pub elements: Vec<FormElement>,
    pub options: Vec<(String, RepeatOptions)>,
}

/// One instantiated repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatInstance {
    pub index: usize,
    pub elements: Vec<FormElement>,
    /// Options keyed by the indexed element name.
    pub options: Vec<(String, RepeatOptions)>,
}

impl RepeatTemplate {
    pub fn new(elements: Vec<FormElement>) -> Self {
        Self {
            elements,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, name: impl Into<String>, options: RepeatOptions) -> Self {
        self.options.push((name.into(), options));
        self
    }

    /// Names the template clones, including children of groups that do not
    /// prefix their children.
    fn cloned_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for element in &self.elements {
            names.insert(element.name.as_str());
            if let ElementType::Group {
                elements,
                append_name: false,
                ..
            } = &element.element_type
            {
                names.extend(elements.iter().map(|child| child.name.as_str()));
            }
        }
        names.remove("");
        names
    }

    /// Rename everything for repeat `index` (0-based).
    pub fn instantiate(&self, index: usize) -> RepeatInstance {
        let number = (index + 1).to_string();

        let elements = self
            .elements
            .iter()
            .map(|element| {
                let mut clone = element.clone();
                fix_clone(&mut clone, index, &number);
                if let ElementType::Group {
                    ref mut elements,
                    append_name: false,
                    ..
                } = clone.element_type
                {
                    for child in elements {
                        fix_clone(child, index, &number);
                    }
                }
                clone
            })
            .collect();

        let cloned = self.cloned_names();
        let options = self
            .options
            .iter()
            .map(|(name, options)| {
                let mut options = options.clone();
                if let Some(Value::String(default)) = &options.default {
                    options.default = Some(Value::String(default.replace(REPEAT_NO, &number)));
                }
                for dependency in &mut options.disabled_if {
                    if cloned.contains(dependency.depends_on.as_str()) {
                        dependency.depends_on = indexed_name(&dependency.depends_on, index);
                    }
                }
                (indexed_name(name, index), options)
            })
            .collect();

        RepeatInstance {
            index,
            elements,
            options,
        }
    }
}

/// Rename one clone and substitute `{no}` in its visible text.
fn fix_clone(element: &mut FormElement, index: usize, number: &str) {
    if !element.name.is_empty() {
        element.name = indexed_name(&element.name, index);
    }
    match &mut element.element_type {
        ElementType::Header { text } => *text = text.replace(REPEAT_NO, number),
        ElementType::Submit { value }
        | ElementType::Cancel { value }
        | ElementType::Button { value } => *value = value.replace(REPEAT_NO, number),
        _ => {
            if let Some(label) = &mut element.label {
                *label = label.replace(REPEAT_NO, number);
            }
        }
    }
}

/// `name` -> `name[i]`, `a[b]` -> `a[i][b]`.
pub fn indexed_name(name: &str, index: usize) -> String {
    match name.find('[') {
        Some(pos) => format!("{}[{index}]{}", &name[..pos], &name[pos..]),
        None => format!("{name}[{index}]"),
    }
}

/// Counter and "add more" button of a repeated group.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatControls {
    /// Hidden element carrying the number of repeats.
    pub counter: String,
    pub add_button: String,
    /// Repeats added per press of the button.
    pub add_count: usize,
    /// Button label; `{no}` is replaced by `add_count`.
    pub add_label: Option<String>,
    /// Keep the button inside the current section.
    pub add_button_inside: bool,
    /// The submitted counter is clamped to this.
    pub max_repeats: usize,
}

impl RepeatControls {
    pub fn new(counter: impl Into<String>, add_button: impl Into<String>) -> Self {
        Self {
            counter: counter.into(),
            add_button: add_button.into(),
            add_count: 5,
            add_label: None,
            add_button_inside: false,
            max_repeats: DEFAULT_MAX_REPEATS,
        }
    }

    pub fn add_count(mut self, count: usize) -> Self {
        self.add_count = count;
        self
    }

    pub fn add_label(mut self, label: impl Into<String>) -> Self {
        self.add_label = Some(label.into());
        self
    }

    pub fn max_repeats(mut self, max: usize) -> Self {
        self.max_repeats = max;
        self
    }

    pub fn add_button_inside(mut self) -> Self {
        self.add_button_inside = true;
        self
    }

    fn label(&self) -> String {
        match &self.add_label {
            Some(label) => label.replace(REPEAT_NO, &self.add_count.to_string()),
            None => format!("Add {} fields to form", self.add_count),
        }
    }
}

impl FormModel {
    /// Add `repeats` copies of a template, or as many as the submitted
    /// counter says, plus `add_count` when the add button was pressed.
    /// The total never exceeds `controls.max_repeats`; a negative counter
    /// means no repeats.
    ///
    /// Returns the number of repeats added.
    pub fn repeat_elements(
        &mut self,
        template: &RepeatTemplate,
        repeats: usize,
        controls: &RepeatControls,
    ) -> Result<usize, FormError> {
        let submitted = self.optional_int(&controls.counter);
        let mut repeats = match submitted {
            Some(count) => usize::try_from(count.max(0)).unwrap_or(usize::MAX),
            None => repeats,
        };
        let add_pressed = self
            .optional_param(&controls.add_button)
            .and_then(|value| clean_param(value, ParamType::Text).ok())
            .is_some_and(|value| !scalar_to_string(&value).is_empty());
        if add_pressed {
            repeats = repeats.saturating_add(controls.add_count);
        }
        if repeats > controls.max_repeats {
            warn!(
                form = %self.name(),
                counter = %controls.counter,
                requested = repeats,
                max = controls.max_repeats,
                "repeat count clamped"
            );
            repeats = controls.max_repeats;
        }

        self.register_no_submit_button(&controls.add_button);
        self.add_element(FormElement::hidden(&controls.counter, repeats))?;
        self.set_type(&controls.counter, ParamType::Int);
        self.set_constant(&controls.counter, repeats);

        // Options are applied once every instance is in the form.
        let mut options = Vec::new();
        for index in 0..repeats {
            let instance = template.instantiate(index);
            for element in instance.elements {
                self.add_element(element)?;
            }
            options.extend(instance.options);
        }
        for (name, options) in options {
            self.apply_repeat_options(&name, options)?;
        }

        self.add_element(FormElement::submit(&controls.add_button, controls.label()))?;
        if !controls.add_button_inside {
            self.close_header_before(&controls.add_button);
        }

        debug!(
            form = %self.name(),
            counter = %controls.counter,
            repeats,
            add_pressed,
            "repeated elements added"
        );
        Ok(repeats)
    }

    fn apply_repeat_options(&mut self, name: &str, options: RepeatOptions) -> Result<(), FormError> {
        if let Some(default) = options.default {
            self.set_default(name, default);
        }
        if let Some(help) = options.help {
            self.add_help_button(name, &help.identifier, &help.component, false);
        }
        for dependency in options.disabled_if {
            self.disabled_if(name, dependency.depends_on, dependency.condition, dependency.value);
        }
        for rule in options.rules {
            self.add_rule(name, rule.message.as_deref(), rule.rule, rule.run_at)?;
        }
        if let Some(param) = options.param_type {
            self.set_type(name, param);
        }
        if let Some(expanded) = options.expanded {
            self.set_expanded(name, expanded, false)?;
        }
        if options.advanced {
            self.set_advanced(name, true);
        }
        Ok(())
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_name() {
        assert_eq!(indexed_name("link", 2), "link[2]");
        assert_eq!(indexed_name("opt[title]", 0), "opt[0][title]");
    }

    #[test]
    fn test_instantiate_substitutes_number() {
        let template = RepeatTemplate::new(vec![
            FormElement::header("sect", "Section {no}"),
            FormElement::text("item").label("Item {no}"),
            FormElement::button("remove", "Remove {no}"),
        ])
        .with_options("item", RepeatOptions::new().default_value("Item {no}"));

        let instance = template.instantiate(1);
        assert_eq!(instance.elements[0].name, "sect[1]");
        assert_eq!(
            instance.elements[0].element_type,
            ElementType::Header {
                text: "Section 2".to_string()
            }
        );
        assert_eq!(instance.elements[1].label.as_deref(), Some("Item 2"));
        assert_eq!(
            instance.elements[2].element_type,
            ElementType::Button {
                value: "Remove 2".to_string()
            }
        );
        assert_eq!(instance.options[0].0, "item[1]");
        assert_eq!(
            instance.options[0].1.default,
            Some(Value::String("Item 2".to_string()))
        );
    }

    #[test]
    fn test_group_children_renamed_without_append_name() {
        let template = RepeatTemplate::new(vec![FormElement::group(
            "row",
            vec![FormElement::text("a"), FormElement::text("b")],
            false,
        )]);
        let instance = template.instantiate(0);
        let names: Vec<&str> = instance.elements[0]
            .children()
            .iter()
            .map(|child| child.name.as_str())
            .collect();
        assert_eq!(names, ["a[0]", "b[0]"]);
    }

    #[test]
    fn test_dependencies_follow_cloned_names() {
        let template = RepeatTemplate::new(vec![
            FormElement::checkbox("enabled"),
            FormElement::text("value"),
        ])
        .with_options(
            "value",
            RepeatOptions::new()
                .disabled_if("enabled", Condition::NotChecked, "1")
                .disabled_if("global", Condition::Checked, "1"),
        );
        let instance = template.instantiate(3);
        let deps = &instance.options[0].1.disabled_if;
        assert_eq!(deps[0].depends_on, "enabled[3]");
        assert_eq!(deps[1].depends_on, "global");
    }

    #[test]
    fn test_add_label() {
        assert_eq!(
            RepeatControls::new("n", "add").add_count(3).label(),
            "Add 3 fields to form"
        );
        assert_eq!(
            RepeatControls::new("n", "add")
                .add_count(2)
                .add_label("More ({no})")
                .label(),
            "More (2)"
        );
    }
}
