//! The structural form model.
//!
//! [`FormModel`] holds the elements of one form together with everything
//! declared about them: parameter types, defaults, constants, rules,
//! dependencies and section state. It also holds the cleaned submission
//! and turns it back into exported values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::error::FormError;
use super::param::{ParamType, clean_param, scalar_to_string};
use super::rules::{Rule, RunAt};
use super::sanitize::{TypeTable, sanitize};
use super::submission::{FormMethod, RequestSnapshot, UploadError, UploadedFile};
use super::types::{ElementType, FormElement, HelpButton};
use super::values;

/// A rule attached to one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub rule: Rule,
    pub message: String,
    pub run_at: RunAt,
}

/// Condition under which a dependent element is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    NotChecked,
    Checked,
    NoItemSelected,
    Eq,
    Neq,
    In,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::NotChecked => "notchecked",
            Condition::Checked => "checked",
            Condition::NoItemSelected => "noitemselected",
            Condition::Eq => "eq",
            Condition::Neq => "neq",
            Condition::In => "in",
        }
    }
}

/// `depends_on -> condition -> value -> dependent names`.
pub type DependencyMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>;

/// Dependency information handed to client code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockOptions {
    pub form_id: String,
    pub dependencies: DependencyMap,
}

/// A JavaScript initialisation call requested by the form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsInitCall {
    pub function: String,
    pub element_id: String,
    pub options: Value,
}

/// Description of the form JavaScript module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsModule {
    pub name: &'static str,
    pub fullpath: &'static str,
    pub requires: &'static [&'static str],
}

/// Elements, declarations and submitted values of one form.
pub struct FormModel {
    name: String,
    method: FormMethod,
    action: String,
    attributes: BTreeMap<String, String>,
    elements: Vec<FormElement>,
    types: TypeTable,
    defaults: Map<String, Value>,
    constants: Map<String, Value>,
    rules: BTreeMap<String, Vec<RuleSpec>>,
    required: BTreeSet<String>,
    errors: BTreeMap<String, String>,
    advanced: BTreeSet<String>,
    /// Header name -> collapsed.
    collapsible: BTreeMap<String, bool>,
    dependencies: BTreeMap<String, BTreeMap<Condition, BTreeMap<String, Vec<String>>>>,
    no_submit_buttons: Vec<String>,
    cancel_buttons: Vec<String>,
    close_header_before: BTreeSet<String>,
    freeze_all: bool,
    client_validation: bool,
    disable_shortforms: bool,
    change_checker: bool,
    submit_values: Map<String, Value>,
    submit_files: BTreeMap<String, UploadedFile>,
    flag_submitted: bool,
    js_calls: Vec<JsInitCall>,
    request: Arc<RequestSnapshot>,
    developer_mode: bool,
}

impl FormModel {
    /// Create an empty model for the form `name`.
    ///
    /// `request` is what [`Self::optional_param`] reads while the form is
    /// being defined.
    pub fn new(
        name: impl Into<String>,
        method: FormMethod,
        action: impl Into<String>,
        request: Arc<RequestSnapshot>,
        developer_mode: bool,
    ) -> Self {
        let name = name.into();
        let action = action.into();
        let attributes = BTreeMap::from([
            ("id".to_string(), format!("mform_{name}")),
            ("method".to_string(), method.as_str().to_string()),
            ("action".to_string(), action.clone()),
            ("accept-charset".to_string(), "utf-8".to_string()),
            ("class".to_string(), "mform".to_string()),
        ]);
        Self {
            name,
            method,
            action,
            attributes,
            elements: Vec::new(),
            types: TypeTable::new(),
            defaults: Map::new(),
            constants: Map::new(),
            rules: BTreeMap::new(),
            required: BTreeSet::new(),
            errors: BTreeMap::new(),
            advanced: BTreeSet::new(),
            collapsible: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            no_submit_buttons: Vec::new(),
            cancel_buttons: Vec::new(),
            close_header_before: BTreeSet::new(),
            freeze_all: false,
            client_validation: false,
            disable_shortforms: false,
            change_checker: true,
            submit_values: Map::new(),
            submit_files: BTreeMap::new(),
            flag_submitted: false,
            js_calls: Vec::new(),
            request,
            developer_mode,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// DOM id of the form.
    pub fn id(&self) -> &str {
        self.attributes.get("id").map_or(self.name.as_str(), String::as_str)
    }

    pub fn method(&self) -> FormMethod {
        self.method
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn developer_mode(&self) -> bool {
        self.developer_mode
    }

    // ----- elements -----

    /// Append an element.
    ///
    /// Children of a group with `append_name` are renamed `group[child]`.
    /// Elements added after [`Self::hard_freeze`]`(None)` are frozen.
    pub fn add_element(&mut self, mut element: FormElement) -> Result<(), FormError> {
        if !element.name.is_empty() && self.element_exists(&element.name) {
            return Err(FormError::Coding(format!(
                "element '{}' already exists in form '{}'",
                element.name, self.name
            )));
        }

        qualify_group_children(&mut element);
        if self.freeze_all {
            element.freeze();
        }
        if self
            .types
            .get(&element.name)
            .is_some_and(|param| !param.is_rtl_compatible())
        {
            element.force_ltr = true;
        }

        debug!(
            form = %self.name,
            element = %element.name,
            kind = element.type_name(),
            "element added"
        );
        self.elements.push(element);
        Ok(())
    }

    /// Remove a top-level element with everything declared about it.
    pub fn remove_element(&mut self, name: &str) -> Option<FormElement> {
        let index = self.elements.iter().position(|el| el.name == name)?;
        let element = self.elements.remove(index);
        for child in element_names(&element) {
            self.rules.remove(&child);
            self.required.remove(&child);
            self.errors.remove(&child);
        }
        Some(element)
    }

    /// Top-level elements in order.
    pub fn elements(&self) -> &[FormElement] {
        &self.elements
    }

    /// Find an element by name, including group children.
    pub fn element(&self, name: &str) -> Option<&FormElement> {
        if name.is_empty() {
            return None;
        }
        find(&self.elements, name)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut FormElement> {
        if name.is_empty() {
            return None;
        }
        find_mut(&mut self.elements, name)
    }

    pub fn element_exists(&self, name: &str) -> bool {
        self.element(name).is_some()
    }

    pub fn element_type(&self, name: &str) -> Option<&'static str> {
        self.element(name).map(FormElement::type_name)
    }

    /// Names an element submits under: group children for groups, nothing
    /// for headers and hidden fields.
    pub fn element_names_recursive(&self, name: &str) -> Vec<String> {
        self.element(name).map(element_names).unwrap_or_default()
    }

    // ----- types -----

    /// Declare how values of `name` are cleaned.
    ///
    /// A declaration is fixed once made; a conflicting second declaration is
    /// ignored.
    pub fn set_type(&mut self, name: &str, param: ParamType) {
        if let Some(existing) = self.types.get(name) {
            if *existing != param {
                warn!(
                    form = %self.name,
                    element = %name,
                    declared = existing.name(),
                    ignored = param.name(),
                    "parameter type already declared; keeping the first declaration"
                );
            }
            return;
        }
        self.types.insert(name.to_string(), param);

        if !param.is_rtl_compatible() {
            if let Some(element) = self.element_mut(name) {
                element.force_ltr = true;
            }
        }
    }

    pub fn set_types<I, S>(&mut self, types: I)
    where
        I: IntoIterator<Item = (S, ParamType)>,
        S: AsRef<str>,
    {
        for (name, param) in types {
            self.set_type(name.as_ref(), param);
        }
    }

    pub fn param_type(&self, name: &str) -> Option<ParamType> {
        self.types.get(name).copied()
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn set_force_ltr(&mut self, name: &str, force: bool) -> Result<(), FormError> {
        let form = self.name.clone();
        let element = self
            .element_mut(name)
            .ok_or_else(|| FormError::UnknownElement {
                form,
                element: name.to_string(),
            })?;
        element.force_ltr = force;
        Ok(())
    }

    /// Names of text, hidden and url elements without a type declaration.
    ///
    /// Repeated names fall back to their base name's declaration. Only runs
    /// in developer mode; each miss is logged.
    pub fn detect_missing_set_type(&self) -> Vec<String> {
        if !self.developer_mode {
            return Vec::new();
        }

        let mut missing = Vec::new();
        for element in &self.elements {
            let candidates: Vec<&FormElement> = match &element.element_type {
                ElementType::Group { elements, .. } => elements.iter().collect(),
                _ => vec![element],
            };
            for candidate in candidates {
                if !candidate.element_type.needs_param_type() {
                    continue;
                }
                if self.has_type_or_parent(&candidate.name) {
                    continue;
                }
                warn!(
                    form = %self.name,
                    element = %candidate.name,
                    "did you remember to call set_type()? defaulting to raw cleaning"
                );
                missing.push(candidate.name.clone());
            }
        }
        missing
    }

    fn has_type_or_parent(&self, name: &str) -> bool {
        let mut key = name;
        loop {
            if self.types.contains_key(key) {
                return true;
            }
            match key.rfind('[') {
                Some(pos) => key = &key[..pos],
                None => return false,
            }
        }
    }

    // ----- defaults and constants -----

    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.defaults.insert(name.into(), value.into());
    }

    pub fn set_defaults(&mut self, defaults: Map<String, Value>) {
        for (name, value) in defaults {
            self.defaults.insert(name, value);
        }
    }

    pub fn default_value(&self, name: &str) -> Option<&Value> {
        values::lookup(&self.defaults, name)
    }

    /// Pin a value that overrides both submitted and default values.
    pub fn set_constant(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.constants.insert(name.into(), value.into());
    }

    pub fn set_constants(&mut self, constants: Map<String, Value>) {
        for (name, value) in constants {
            self.constants.insert(name, value);
        }
    }

    pub fn constant_value(&self, name: &str) -> Option<&Value> {
        values::lookup(&self.constants, name)
    }

    /// Value shown for an element: constant, then submitted (unless frozen),
    /// then default, then the element's own value.
    pub fn current_value(&self, element: &FormElement) -> Option<Value> {
        if let Some(constant) = self.constant_value(&element.name) {
            return Some(constant.clone());
        }
        if !element.frozen && self.flag_submitted {
            if let Some(submitted) = self.submit_value(&element.name) {
                return Some(submitted.clone());
            }
        }
        self.default_value(&element.name)
            .or(element.value.as_ref())
            .cloned()
    }

    // ----- rules and errors -----

    /// Attach a validation rule to an element.
    ///
    /// Without a message the rule's default message is used.
    pub fn add_rule(
        &mut self,
        element: &str,
        message: Option<&str>,
        rule: Rule,
        run_at: RunAt,
    ) -> Result<(), FormError> {
        if !self.element_exists(element) {
            return Err(FormError::UnknownElement {
                form: self.name.clone(),
                element: element.to_string(),
            });
        }
        rule.check_arguments()
            .map_err(|details| FormError::InvalidRule {
                element: element.to_string(),
                rule: rule.name().to_string(),
                details,
            })?;

        if rule == Rule::Required {
            self.required.insert(element.to_string());
        }
        if run_at == RunAt::Client {
            self.client_validation = true;
        }
        let message = message.map_or_else(|| rule.default_message(), str::to_string);
        self.rules
            .entry(element.to_string())
            .or_default()
            .push(RuleSpec {
                rule,
                message,
                run_at,
            });
        Ok(())
    }

    pub fn rules(&self) -> &BTreeMap<String, Vec<RuleSpec>> {
        &self.rules
    }

    pub fn rules_for(&self, element: &str) -> &[RuleSpec] {
        self.rules.get(element).map_or(&[], Vec::as_slice)
    }

    pub fn is_element_required(&self, element: &str) -> bool {
        self.required.contains(element)
    }

    /// Whether any client-side rule exists.
    pub fn has_client_rules(&self) -> bool {
        self.client_validation
    }

    pub fn set_element_error(&mut self, element: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(element.into(), message.into());
    }

    pub fn clear_element_error(&mut self, element: &str) {
        self.errors.remove(element);
    }

    pub fn element_error(&self, element: &str) -> Option<&str> {
        self.errors.get(element).map(String::as_str)
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Run the built-in rules against the submitted values.
    ///
    /// Unsubmitted forms are never valid. Rules of optional elements are
    /// skipped when the value is empty; the first failing rule of an
    /// element records its message.
    pub fn validate(&mut self) -> bool {
        if !self.is_submitted() {
            return false;
        }

        let mut failures = Vec::new();
        for (target, specs) in &self.rules {
            if self.errors.contains_key(target) {
                continue;
            }
            if self.element(target).is_some_and(|el| el.frozen) {
                continue;
            }
            let upload_name = self.upload_value(target);
            let value = upload_name
                .as_ref()
                .or_else(|| values::lookup(&self.submit_values, target));
            if !self.required.contains(target) && value.is_none_or(is_empty_value) {
                continue;
            }
            if let Some(failed) = specs
                .iter()
                .find(|spec| !spec.rule.check(value, &self.submit_values))
            {
                debug!(
                    form = %self.name,
                    element = %target,
                    rule = failed.rule.name(),
                    "rule failed"
                );
                failures.push((target.clone(), failed.message.clone()));
            }
        }
        self.errors.extend(failures);
        self.errors.is_empty()
    }

    /// File inputs validate against the uploaded file's name.
    fn upload_value(&self, name: &str) -> Option<Value> {
        if !self
            .element(name)
            .is_some_and(|el| matches!(el.element_type, ElementType::File))
        {
            return None;
        }
        self.submit_files
            .get(name)
            .filter(|file| file.error == UploadError::Ok && !file.name.is_empty())
            .map(|file| Value::String(file.name.clone()))
    }

    // ----- sections -----

    /// Mark an element (or a whole header section) as advanced.
    pub fn set_advanced(&mut self, name: &str, advanced: bool) {
        if advanced {
            self.advanced.insert(name.to_string());
        } else {
            self.advanced.remove(name);
        }
    }

    pub fn is_advanced(&self, name: &str) -> bool {
        self.advanced.contains(name)
    }

    /// Show a header's section expanded or collapsed.
    ///
    /// The state round-trips through a hidden `mform_isexpanded_<id>`
    /// element; a submitted state wins unless `ignore_user_state` is set.
    pub fn set_expanded(
        &mut self,
        header: &str,
        expanded: bool,
        ignore_user_state: bool,
    ) -> Result<(), FormError> {
        if header.is_empty() {
            return Ok(());
        }
        let Some(element) = self.element(header) else {
            return Err(FormError::UnknownElement {
                form: self.name.clone(),
                element: header.to_string(),
            });
        };
        if !matches!(element.element_type, ElementType::Header { .. }) {
            if self.developer_mode {
                warn!(form = %self.name, element = %header, "set_expanded() on a non-header element");
            }
            return Ok(());
        }

        let state_name = format!("mform_isexpanded_{}", element.dom_id());
        let mut expanded = expanded;
        if !self.element_exists(&state_name) {
            if !ignore_user_state {
                if let Some(state) = self.optional_int(&state_name) {
                    expanded = state != 0;
                }
            }
            self.add_element(FormElement::hidden(&state_name, i64::from(expanded)))?;
            self.set_type(&state_name, ParamType::Int);
            self.set_constant(&state_name, i64::from(expanded));
        } else if ignore_user_state {
            self.set_constant(&state_name, i64::from(expanded));
        }
        self.collapsible.insert(header.to_string(), !expanded);
        Ok(())
    }

    /// Collapsed state of a collapsible header.
    pub fn is_collapsed(&self, header: &str) -> Option<bool> {
        self.collapsible.get(header).copied()
    }

    /// Add the hidden `mform_showmore_<id>` element carrying whether a
    /// section's advanced elements are shown.
    pub fn add_advanced_status_element(
        &mut self,
        header_id: &str,
        show_more: bool,
    ) -> Result<(), FormError> {
        let state_name = format!("mform_showmore_{header_id}");
        if self.element_exists(&state_name) {
            return Ok(());
        }
        let mut show_more = show_more;
        if !show_more {
            if let Some(state) = self.optional_int(&state_name) {
                show_more = state != 0;
            }
        }
        self.add_element(FormElement::hidden(&state_name, i64::from(show_more)))?;
        self.set_type(&state_name, ParamType::Int);
        self.set_constant(&state_name, i64::from(show_more));
        Ok(())
    }

    /// End the current fieldset before `name`.
    pub fn close_header_before(&mut self, name: impl Into<String>) {
        self.close_header_before.insert(name.into());
    }

    pub fn closes_header(&self, name: &str) -> bool {
        self.close_header_before.contains(name)
    }

    pub fn set_disable_shortforms(&mut self, disable: bool) {
        self.disable_shortforms = disable;
    }

    pub fn shortforms_disabled(&self) -> bool {
        self.disable_shortforms
    }

    pub fn set_change_checker(&mut self, enabled: bool) {
        self.change_checker = enabled;
    }

    pub fn is_change_checker_enabled(&self) -> bool {
        self.change_checker
    }

    /// Settle advanced and collapsed state of every section before
    /// rendering.
    ///
    /// Elements under an advanced header become advanced; a header with
    /// advanced elements becomes advanced and gets a show-more state
    /// element. Unless shortforms are disabled, the first section (and the
    /// second of exactly two) starts expanded, sections holding required or
    /// failing elements are forced open, the rest start collapsed.
    pub fn resolve_sections(&mut self) -> Result<(), FormError> {
        let snapshot: Vec<(String, bool, String)> = self
            .elements
            .iter()
            .map(|el| {
                (
                    el.name.clone(),
                    matches!(el.element_type, ElementType::Header { .. }),
                    el.dom_id(),
                )
            })
            .collect();

        let mut last_header: Option<(String, String)> = None;
        let mut last_header_advanced = false;
        let mut any_advanced = false;
        let mut any_error = false;
        for (name, is_header, dom_id) in &snapshot {
            if *is_header || self.close_header_before.contains(name) {
                if let Some((header, header_id)) = last_header.take() {
                    if any_advanced {
                        self.set_advanced(&header, true);
                        self.add_advanced_status_element(&header_id, any_error)?;
                    }
                }
                last_header_advanced = false;
            } else if last_header_advanced {
                self.set_advanced(name, true);
            }

            if *is_header {
                last_header = Some((name.clone(), dom_id.clone()));
                any_advanced = false;
                any_error = false;
                last_header_advanced = self.advanced.contains(name);
            } else if self.advanced.contains(name) {
                any_advanced = true;
                if self.errors.contains_key(name) {
                    any_error = true;
                }
            }
        }
        if let Some((header, header_id)) = last_header {
            if any_advanced {
                self.set_advanced(&header, true);
                self.add_advanced_status_element(&header_id, any_error)?;
            }
        }

        if self.disable_shortforms {
            return Ok(());
        }

        let header_count = snapshot.iter().filter(|(_, is_header, _)| *is_header).count();
        let mut header_counter = 0;
        let mut current: Option<String> = None;
        let mut required_or_error = false;
        for (name, is_header, _) in &snapshot {
            if *is_header {
                header_counter += 1;
                current = Some(name.clone());
                required_or_error = false;
                let unset = !self.collapsible.contains_key(name);
                if unset && (header_counter == 1 || (header_counter == 2 && header_count == 2)) {
                    self.set_expanded(name, true, false)?;
                }
                continue;
            }

            if self.required.contains(name) || self.errors.contains_key(name) {
                required_or_error = true;
            }
            let Some(header) = current.clone() else {
                continue;
            };
            if required_or_error {
                self.set_expanded(&header, true, true)?;
            } else if !self.collapsible.contains_key(&header) {
                self.set_expanded(&header, false, false)?;
            }
        }
        Ok(())
    }

    // ----- dependencies -----

    /// Disable `element` on the client while `depends_on` meets `condition`.
    ///
    /// Several values (multi-selects) are joined with `|`.
    pub fn disabled_if(
        &mut self,
        element: impl Into<String>,
        depends_on: impl Into<String>,
        condition: Condition,
        value: impl Into<String>,
    ) {
        self.dependencies
            .entry(depends_on.into())
            .or_default()
            .entry(condition)
            .or_default()
            .entry(value.into())
            .or_default()
            .push(element.into());
    }

    /// Dependency map for client code.
    ///
    /// Dependents are expanded to the names they submit under; an element
    /// never depends on itself.
    pub fn lock_options(&self) -> LockOptions {
        let mut dependencies = DependencyMap::new();
        for (depends_on, conditions) in &self.dependencies {
            let by_condition = dependencies.entry(depends_on.clone()).or_default();
            for (condition, by_value) in conditions {
                let entry = by_condition
                    .entry(condition.as_str().to_string())
                    .or_default();
                for (value, dependents) in by_value {
                    let names = entry.entry(value.clone()).or_default();
                    for dependent in dependents {
                        let mut expanded = self.element_names_recursive(dependent);
                        if expanded.is_empty() {
                            expanded.push(dependent.clone());
                        }
                        names.extend(expanded.into_iter().filter(|name| name != depends_on));
                    }
                }
            }
        }
        LockOptions {
            form_id: self.id().to_string(),
            dependencies,
        }
    }

    // ----- buttons -----

    /// A button that reloads the form instead of submitting it.
    pub fn register_no_submit_button(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.no_submit_buttons.contains(&name) {
            self.no_submit_buttons.push(name);
        }
    }

    pub fn is_no_submit_button(&self, name: &str) -> bool {
        self.no_submit_buttons.iter().any(|b| b == name)
    }

    pub fn no_submit_buttons(&self) -> &[String] {
        &self.no_submit_buttons
    }

    pub fn register_cancel_button(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.cancel_buttons.contains(&name) {
            self.cancel_buttons.push(name);
        }
    }

    pub fn cancel_buttons(&self) -> &[String] {
        &self.cancel_buttons
    }

    /// Submit button, plus a cancel button grouped with it.
    pub fn add_action_buttons(
        &mut self,
        cancel: bool,
        submit_label: Option<&str>,
    ) -> Result<(), FormError> {
        let label = submit_label.unwrap_or("Save changes");
        if cancel {
            let group = FormElement::group(
                "buttonar",
                vec![
                    FormElement::submit("submitbutton", label),
                    FormElement::cancel("cancel", "Cancel"),
                ],
                false,
            )
            .separator(" ");
            self.add_element(group)?;
            self.register_cancel_button("cancel");
            self.close_header_before("buttonar");
        } else {
            self.add_element(FormElement::submit("submitbutton", label))?;
            self.close_header_before("submitbutton");
        }
        Ok(())
    }

    /// Add a "select all/none" button for the advanced checkboxes whose
    /// `class` is `checkboxgroup<group_id>`.
    ///
    /// The state lives in a hidden `checkbox_controller<group_id>` field;
    /// pressing the button flips it and pins every unfrozen checkbox of the
    /// group to the new state.
    pub fn add_checkbox_controller(
        &mut self,
        group_id: u32,
        text: Option<&str>,
        original_value: i64,
    ) -> Result<(), FormError> {
        let button_name = format!("nosubmit_checkbox_controller{group_id}");
        let param_name = format!("checkbox_controller{group_id}");
        let group_class = format!("checkboxgroup{group_id}");
        let text = text.unwrap_or("Select all/none");

        let select_value = self.optional_int(&param_name);
        let button_pressed = self.request.param(&button_name).is_some();

        let new_value = match select_value {
            None => original_value,
            Some(current) if button_pressed => i64::from(current == 0),
            Some(current) => current,
        };

        if button_pressed || select_value.is_none() {
            let targets: Vec<String> = self
                .elements
                .iter()
                .filter(|el| matches!(el.element_type, ElementType::AdvCheckbox { .. }))
                .filter(|el| el.attributes.get("class") == Some(&group_class))
                .filter(|el| !el.frozen)
                .map(|el| el.name.clone())
                .collect();
            for name in targets {
                self.set_constant(name, new_value);
            }
        }

        self.add_element(
            FormElement::hidden(&param_name, new_value).attribute("id", format!("id_{param_name}")),
        )?;
        self.set_type(&param_name, ParamType::Int);
        self.set_constant(&param_name, new_value);

        self.js_calls.push(JsInitCall {
            function: "M.form.checkboxcontroller".to_string(),
            element_id: format!("id_{param_name}"),
            options: serde_json::json!({
                "groupid": group_id,
                "checkboxclass": group_class,
                "checkboxcontroller": param_name,
                "controllerbutton": button_name,
            }),
        });

        self.add_element(FormElement::submit(&button_name, text))?;
        self.register_no_submit_button(&button_name);
        self.set_default(button_name, text);
        Ok(())
    }

    // ----- help and javascript -----

    /// Attach a help icon to an element.
    pub fn add_help_button(
        &mut self,
        name: &str,
        identifier: &str,
        component: &str,
        suppress_check: bool,
    ) {
        let form = self.name.clone();
        match self.element_mut(name) {
            Some(element) => element.help = Some(HelpButton::new(identifier, component)),
            None if !suppress_check => {
                warn!(form = %form, element = %name, "help button for a nonexistent element");
            }
            None => {}
        }
    }

    /// Record a call to `M.form.init_<enhancement>` for an element.
    ///
    /// Returns false when the element does not exist.
    pub fn init_javascript_enhancement(
        &mut self,
        name: &str,
        enhancement: &str,
        options: Value,
    ) -> bool {
        let Some(element) = self.element(name) else {
            return false;
        };
        let element_id = element.dom_id();
        self.js_calls.push(JsInitCall {
            function: format!("M.form.init_{enhancement}"),
            element_id,
            options,
        });
        true
    }

    pub fn js_init_calls(&self) -> &[JsInitCall] {
        &self.js_calls
    }

    /// The JavaScript module every form loads.
    pub fn js_module() -> JsModule {
        JsModule {
            name: "mform",
            fullpath: "/lib/form/form.js",
            requires: &["base", "node"],
        }
    }

    // ----- freezing -----

    /// Freeze elements and drop their rules.
    ///
    /// `None` freezes the whole form, including elements added later; a
    /// fully frozen form never counts as submitted. Unknown names are
    /// reported after the known ones are frozen.
    pub fn hard_freeze(&mut self, names: Option<&[&str]>) -> Result<(), FormError> {
        let mut remaining: BTreeSet<&str> = names.unwrap_or_default().iter().copied().collect();
        if names.is_none() {
            self.freeze_all = true;
        }

        let mut frozen = Vec::new();
        for element in &mut self.elements {
            if self.freeze_all || remaining.remove(element.name.as_str()) {
                element.freeze();
                frozen.extend(element_names(element));
                frozen.push(element.name.clone());
            }
        }
        // Group children may be named directly.
        for name in remaining.clone() {
            if let Some(element) = find_mut(&mut self.elements, name) {
                element.freeze();
                frozen.push(name.to_string());
                remaining.remove(name);
            }
        }
        self.drop_rules(&frozen);

        if remaining.is_empty() {
            Ok(())
        } else {
            Err(FormError::UnknownElement {
                form: self.name.clone(),
                element: remaining.into_iter().collect::<Vec<_>>().join(", "),
            })
        }
    }

    /// Freeze every visible element except the named ones.
    pub fn hard_freeze_all_visible_except(&mut self, keep: &[&str]) {
        let mut frozen = Vec::new();
        for element in &mut self.elements {
            if matches!(element.element_type, ElementType::Hidden) {
                continue;
            }
            if keep.contains(&element.name.as_str()) {
                continue;
            }
            element.freeze();
            frozen.extend(element_names(element));
            frozen.push(element.name.clone());
        }
        self.drop_rules(&frozen);
    }

    fn drop_rules(&mut self, names: &[String]) {
        for name in names {
            self.rules.remove(name);
            self.required.remove(name);
        }
    }

    /// Whether the whole form is frozen.
    pub fn is_frozen(&self) -> bool {
        self.freeze_all
    }

    // ----- submission -----

    /// Replace the submission with cleaned `values` and `files`.
    ///
    /// Each top-level value is cleaned with its declared type(s), undeclared
    /// ones as raw.
    pub fn update_submission(
        &mut self,
        submission: Map<String, Value>,
        files: BTreeMap<String, UploadedFile>,
    ) -> Result<(), FormError> {
        let mut cleaned = Map::new();
        for (key, value) in submission {
            let value = sanitize(&self.types, &key, &value, ParamType::Raw)?;
            cleaned.insert(key, value);
        }

        self.flag_submitted = !cleaned.is_empty() || !files.is_empty();
        self.submit_values = cleaned;
        self.submit_files = files;
        Ok(())
    }

    /// Submitted and not frozen.
    pub fn is_submitted(&self) -> bool {
        self.flag_submitted && !self.freeze_all
    }

    pub fn submit_values(&self) -> &Map<String, Value> {
        &self.submit_values
    }

    pub fn submit_value(&self, name: &str) -> Option<&Value> {
        values::lookup(&self.submit_values, name)
    }

    pub fn submit_files(&self) -> &BTreeMap<String, UploadedFile> {
        &self.submit_files
    }

    /// A raw request parameter, for use while defining the form.
    pub fn optional_param(&self, name: &str) -> Option<&Value> {
        self.request.param(name)
    }

    pub(crate) fn optional_int(&self, name: &str) -> Option<i64> {
        self.optional_param(name)
            .and_then(|value| clean_param(value, ParamType::Int).ok())
            .and_then(|value| value.as_i64())
    }

    /// Export values of all (or the named) elements, constants last.
    ///
    /// Frozen elements that are not persistently frozen contribute their
    /// default instead of the submitted value.
    pub fn export_values(&self, names: Option<&[&str]>) -> Map<String, Value> {
        let mut out = Map::new();
        match names {
            None => {
                for element in &self.elements {
                    self.export_element(element, &mut out);
                }
            }
            Some(names) => {
                for name in names {
                    if let Some(element) = self.element(name) {
                        self.export_element(element, &mut out);
                    }
                }
            }
        }

        let mut pinned = Map::new();
        for (name, value) in &self.constants {
            values::insert(&mut pinned, name, value.clone());
        }
        values::merge(&mut out, &pinned);
        out
    }

    fn export_element(&self, element: &FormElement, out: &mut Map<String, Value>) {
        if element.frozen && !element.persistent_freeze {
            if !element.name.is_empty() {
                if let Some(default) = self.default_value(&element.name) {
                    values::insert(out, &element.name, default.clone());
                }
            }
            return;
        }

        let submitted = if element.frozen {
            None
        } else {
            self.submit_value(&element.name)
        };
        let exported = match &element.element_type {
            ElementType::Header { .. } | ElementType::Static { .. } | ElementType::File => None,
            ElementType::Group { elements, .. } => {
                for child in elements {
                    self.export_element(child, out);
                }
                None
            }
            ElementType::Checkbox { .. } => match submitted {
                Some(value) => Some(value.clone()),
                None if !self.flag_submitted => self
                    .current_value(element)
                    .filter(values::is_truthy)
                    .map(|_| Value::from(1)),
                None => None,
            },
            ElementType::AdvCheckbox {
                checked_value,
                unchecked_value,
                ..
            } => {
                let checked = match submitted {
                    Some(value) => scalar_to_string(value) == *checked_value,
                    None => self.current_value(element).is_some_and(|value| {
                        scalar_to_string(&value) == *checked_value
                            || (values::is_truthy(&value)
                                && scalar_to_string(&value) != *unchecked_value)
                    }),
                };
                let chosen = if checked { checked_value } else { unchecked_value };
                Some(Value::String(chosen.clone()))
            }
            ElementType::Submit { .. } | ElementType::Cancel { .. } | ElementType::Button { .. } => {
                submitted.cloned()
            }
            ElementType::Select { options, multiple } => {
                let value = submitted.cloned().or_else(|| self.current_value(element));
                value.and_then(|value| filter_options(value, options, *multiple))
            }
            ElementType::Radio { options } => {
                let value = submitted.cloned().or_else(|| self.current_value(element));
                value.filter(|value| {
                    let chosen = scalar_to_string(value);
                    options.iter().any(|(key, _)| *key == chosen)
                })
            }
            _ => submitted.cloned().or_else(|| self.current_value(element)),
        };

        if let Some(value) = exported {
            if !element.name.is_empty() {
                values::insert(out, &element.name, value);
            }
        }
    }
}

impl std::fmt::Debug for FormModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormModel")
            .field("name", &self.name)
            .field("elements", &self.elements.len())
            .field("submitted", &self.flag_submitted)
            .finish()
    }
}

/// Keep only submitted options that exist.
fn filter_options(value: Value, options: &[(String, String)], multiple: bool) -> Option<Value> {
    let is_option = |candidate: &Value| {
        let candidate = scalar_to_string(candidate);
        options.iter().any(|(key, _)| *key == candidate)
    };
    let chosen: Vec<Value> = match value {
        Value::Array(items) => items.into_iter().filter(|item| is_option(item)).collect(),
        Value::Object(map) => map.into_iter().map(|(_, item)| item).filter(|item| is_option(item)).collect(),
        scalar => {
            if is_option(&scalar) {
                vec![scalar]
            } else {
                Vec::new()
            }
        }
    };
    if multiple {
        Some(Value::Array(chosen))
    } else {
        chosen.into_iter().next()
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn element_names(element: &FormElement) -> Vec<String> {
    match &element.element_type {
        ElementType::Group { elements, .. } => elements.iter().flat_map(element_names).collect(),
        ElementType::Header { .. } | ElementType::Hidden => Vec::new(),
        _ if element.name.is_empty() => Vec::new(),
        _ => vec![element.name.clone()],
    }
}

fn qualify_group_children(element: &mut FormElement) {
    let group_name = element.name.clone();
    if let ElementType::Group {
        ref mut elements,
        append_name: true,
        ..
    } = element.element_type
    {
        if group_name.is_empty() {
            return;
        }
        for child in elements {
            if !child.name.is_empty() {
                child.name = qualify(&group_name, &child.name);
            }
        }
    }
}

/// `group[child]`, keeping brackets of the child: `g` + `c[1]` -> `g[c][1]`.
fn qualify(group: &str, child: &str) -> String {
    match child.find('[') {
        Some(pos) => format!("{group}[{}]{}", &child[..pos], &child[pos..]),
        None => format!("{group}[{child}]"),
    }
}

fn find<'a>(elements: &'a [FormElement], name: &str) -> Option<&'a FormElement> {
    for element in elements {
        if element.name == name {
            return Some(element);
        }
        if let Some(found) = find(element.children(), name) {
            return Some(found);
        }
    }
    None
}

fn find_mut<'a>(elements: &'a mut [FormElement], name: &str) -> Option<&'a mut FormElement> {
    for element in elements.iter_mut() {
        if element.name == name {
            return Some(element);
        }
        if let Some(children) = element.children_mut() {
            if let Some(found) = find_mut(children, name) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> FormModel {
        FormModel::new(
            "test_form",
            FormMethod::Post,
            "/submit",
            Arc::new(RequestSnapshot::new(FormMethod::Post)),
            true,
        )
    }

    fn model_with_request(request: RequestSnapshot) -> FormModel {
        FormModel::new("test_form", FormMethod::Post, "/submit", Arc::new(request), true)
    }

    fn submit(model: &mut FormModel, values: Value) {
        let map = values.as_object().unwrap().clone();
        model.update_submission(map, BTreeMap::new()).unwrap();
    }

    #[test]
    fn test_duplicate_element_is_coding_error() {
        let mut form = model();
        form.add_element(FormElement::text("name")).unwrap();
        assert!(matches!(
            form.add_element(FormElement::text("name")),
            Err(FormError::Coding(_))
        ));
    }

    #[test]
    fn test_group_children_get_qualified_names() {
        let mut form = model();
        form.add_element(FormElement::group(
            "date",
            vec![FormElement::text("day"), FormElement::text("month")],
            true,
        ))
        .unwrap();
        assert!(form.element_exists("date[day]"));
        assert_eq!(
            form.element_names_recursive("date"),
            vec!["date[day]".to_string(), "date[month]".to_string()]
        );
    }

    #[test]
    fn test_set_type_is_fixed_once_declared() {
        let mut form = model();
        form.add_element(FormElement::text("age")).unwrap();
        form.set_type("age", ParamType::Int);
        form.set_type("age", ParamType::Text);
        assert_eq!(form.param_type("age"), Some(ParamType::Int));
        assert!(form.element("age").unwrap().force_ltr);
    }

    #[test]
    fn test_update_submission_cleans_values() {
        let mut form = model();
        form.add_element(FormElement::text("age")).unwrap();
        form.set_type("age", ParamType::Int);
        submit(&mut form, json!({"age": "41 years", "other": "<b>"}));
        assert!(form.is_submitted());
        assert_eq!(form.submit_value("age"), Some(&json!(41)));
        assert_eq!(form.submit_value("other"), Some(&json!("<b>")));
    }

    #[test]
    fn test_empty_submission_is_not_submitted() {
        let mut form = model();
        submit(&mut form, json!({}));
        assert!(!form.is_submitted());
        assert!(!form.validate());
    }

    #[test]
    fn test_validate_first_failing_rule_wins() {
        let mut form = model();
        form.add_element(FormElement::text("name")).unwrap();
        form.add_rule("name", None, Rule::Required, RunAt::Server).unwrap();
        form.add_rule("name", Some("Too short"), Rule::min_length(3), RunAt::Server)
            .unwrap();
        submit(&mut form, json!({"name": "ab"}));
        assert!(!form.validate());
        assert_eq!(form.element_error("name"), Some("Too short"));
    }

    #[test]
    fn test_optional_empty_values_skip_rules() {
        let mut form = model();
        form.add_element(FormElement::text("nick")).unwrap();
        form.add_element(FormElement::text("other")).unwrap();
        form.add_rule("nick", None, Rule::min_length(3), RunAt::Server).unwrap();
        submit(&mut form, json!({"nick": "", "other": "x"}));
        assert!(form.validate());
    }

    #[test]
    fn test_add_rule_checks_element_and_arguments() {
        let mut form = model();
        form.add_element(FormElement::text("code")).unwrap();
        assert!(matches!(
            form.add_rule("missing", None, Rule::Required, RunAt::Server),
            Err(FormError::UnknownElement { .. })
        ));
        assert!(matches!(
            form.add_rule("code", None, Rule::regex("("), RunAt::Server),
            Err(FormError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_export_values() {
        let mut form = model();
        form.add_element(FormElement::text("name")).unwrap();
        form.add_element(FormElement::text("city")).unwrap();
        form.add_element(FormElement::checkbox("subscribe")).unwrap();
        form.add_element(FormElement::advcheckbox("agree")).unwrap();
        form.add_element(FormElement::static_text("note", "Hello")).unwrap();
        form.add_element(FormElement::submit("save", "Save")).unwrap();
        form.add_element(FormElement::submit("other", "Other")).unwrap();
        form.set_default("city", "Perth");
        form.set_constant("version", 3);
        submit(&mut form, json!({"name": "Ada", "save": "Save"}));

        let exported = form.export_values(None);
        assert_eq!(
            Value::Object(exported),
            json!({
                "name": "Ada",
                "city": "Perth",
                "agree": "0",
                "save": "Save",
                "version": 3
            })
        );
    }

    #[test]
    fn test_frozen_elements_export_defaults() {
        let mut form = model();
        form.add_element(FormElement::text("name")).unwrap();
        form.add_element(FormElement::text("locked")).unwrap();
        form.add_element(FormElement::text("bare")).unwrap();
        form.set_default("locked", "original");
        form.hard_freeze(Some(&["locked", "bare"])).unwrap();
        submit(&mut form, json!({"name": "x", "locked": "tampered", "bare": "y"}));

        let exported = form.export_values(None);
        assert_eq!(exported["locked"], json!("original"));
        assert!(!exported.contains_key("bare"));
    }

    #[test]
    fn test_hard_freeze_drops_rules_and_reports_unknown() {
        let mut form = model();
        form.add_element(FormElement::text("name")).unwrap();
        form.add_rule("name", None, Rule::Required, RunAt::Server).unwrap();
        let result = form.hard_freeze(Some(&["name", "ghost"]));
        assert!(matches!(result, Err(FormError::UnknownElement { ref element, .. }) if element == "ghost"));
        assert!(form.element("name").unwrap().frozen);
        assert!(!form.is_element_required("name"));
        assert!(form.rules_for("name").is_empty());
    }

    #[test]
    fn test_freeze_all_is_never_submitted() {
        let mut form = model();
        form.hard_freeze(None).unwrap();
        form.add_element(FormElement::text("late")).unwrap();
        assert!(form.element("late").unwrap().frozen);
        submit(&mut form, json!({"late": "x"}));
        assert!(!form.is_submitted());
    }

    #[test]
    fn test_select_export_filters_unknown_options() {
        let mut form = model();
        let options = vec![
            ("r".to_string(), "Red".to_string()),
            ("g".to_string(), "Green".to_string()),
        ];
        form.add_element(FormElement::select("colour", options.clone())).unwrap();
        form.add_element(FormElement::multi_select("colours", options)).unwrap();
        submit(
            &mut form,
            json!({"colour": "x", "colours": {"0": "r", "1": "bogus", "2": "g"}}),
        );
        let exported = form.export_values(None);
        assert!(!exported.contains_key("colour"));
        assert_eq!(exported["colours"], json!(["r", "g"]));
    }

    #[test]
    fn test_set_expanded_uses_submitted_state() {
        let request = RequestSnapshot::from_urlencoded(
            FormMethod::Post,
            "",
            "mform_isexpanded_id_general=0",
        );
        let mut form = model_with_request(request);
        form.add_element(FormElement::header("general", "General")).unwrap();
        form.set_expanded("general", true, false).unwrap();
        assert_eq!(form.is_collapsed("general"), Some(true));
        assert_eq!(
            form.constant_value("mform_isexpanded_id_general"),
            Some(&json!(0))
        );
    }

    #[test]
    fn test_set_expanded_ignores_non_headers() {
        let mut form = model();
        form.add_element(FormElement::text("name")).unwrap();
        form.set_expanded("name", true, false).unwrap();
        assert_eq!(form.is_collapsed("name"), None);
    }

    #[test]
    fn test_resolve_sections() {
        let mut form = model();
        form.add_element(FormElement::header("general", "General")).unwrap();
        form.add_element(FormElement::text("name")).unwrap();
        form.add_element(FormElement::header("extra", "Extra")).unwrap();
        form.add_element(FormElement::text("colour")).unwrap();
        form.add_element(FormElement::header("more", "More")).unwrap();
        form.add_element(FormElement::text("email")).unwrap();
        form.add_element(FormElement::text("fax")).unwrap();
        form.add_rule("email", None, Rule::Required, RunAt::Server).unwrap();
        form.set_advanced("fax", true);

        form.resolve_sections().unwrap();
        assert_eq!(form.is_collapsed("general"), Some(false));
        assert_eq!(form.is_collapsed("extra"), Some(true));
        assert_eq!(form.is_collapsed("more"), Some(false));
        assert!(form.is_advanced("more"));
        assert!(form.element_exists("mform_showmore_id_more"));
    }

    #[test]
    fn test_lock_options_expand_groups_and_skip_self() {
        let mut form = model();
        form.add_element(FormElement::checkbox("enable")).unwrap();
        form.add_element(FormElement::group(
            "range",
            vec![FormElement::text("from"), FormElement::text("to")],
            true,
        ))
        .unwrap();
        form.disabled_if("range", "enable", Condition::NotChecked, "1");
        form.disabled_if("enable", "enable", Condition::Checked, "1");

        let lock = form.lock_options();
        assert_eq!(lock.form_id, "mform_test_form");
        assert_eq!(
            lock.dependencies["enable"]["notchecked"]["1"],
            vec!["range[from]".to_string(), "range[to]".to_string()]
        );
        assert!(lock.dependencies["enable"]["checked"]["1"].is_empty());
    }

    #[test]
    fn test_checkbox_controller_flips_state() {
        let request = RequestSnapshot::from_urlencoded(
            FormMethod::Post,
            "",
            "checkbox_controller1=0&nosubmit_checkbox_controller1=Select",
        );
        let mut form = model_with_request(request);
        form.add_element(FormElement::advcheckbox("opt1").attribute("class", "checkboxgroup1"))
            .unwrap();
        form.add_element(FormElement::advcheckbox("opt2").attribute("class", "checkboxgroup2"))
            .unwrap();
        form.add_checkbox_controller(1, None, 0).unwrap();

        assert_eq!(form.constant_value("opt1"), Some(&json!(1)));
        assert_eq!(form.constant_value("opt2"), None);
        assert_eq!(form.constant_value("checkbox_controller1"), Some(&json!(1)));
        assert!(form.is_no_submit_button("nosubmit_checkbox_controller1"));
    }

    #[test]
    fn test_action_buttons() {
        let mut form = model();
        form.add_action_buttons(true, None).unwrap();
        assert!(form.element_exists("submitbutton"));
        assert_eq!(form.cancel_buttons(), ["cancel".to_string()]);
        assert!(form.closes_header("buttonar"));
    }

    #[test]
    fn test_detect_missing_set_type() {
        let mut form = model();
        form.add_element(FormElement::text("typed")).unwrap();
        form.add_element(FormElement::text("untyped")).unwrap();
        form.add_element(FormElement::text("link[0]")).unwrap();
        form.add_element(FormElement::textarea("body", 5, 40)).unwrap();
        form.set_type("typed", ParamType::Text);
        form.set_type("link", ParamType::Url);
        assert_eq!(form.detect_missing_set_type(), vec!["untyped".to_string()]);
    }

    #[test]
    fn test_help_and_enhancements() {
        let mut form = model();
        form.add_element(FormElement::select("cat", vec![])).unwrap();
        form.add_help_button("cat", "category", "moodle", false);
        assert_eq!(
            form.element("cat").unwrap().help,
            Some(HelpButton::new("category", "moodle"))
        );
        assert!(form.init_javascript_enhancement("cat", "smartselect", json!({})));
        assert!(!form.init_javascript_enhancement("nope", "smartselect", json!({})));
        assert_eq!(form.js_init_calls()[0].function, "M.form.init_smartselect");
        assert_eq!(form.js_init_calls()[0].element_id, "id_cat");
    }
}
