//! Client-side validation script.
//!
//! Client rules compile to one JavaScript function per element, hooked to the
//! element's `blur` and `change` events, plus a form-level validator run on
//! submit.

use std::collections::BTreeMap;
use std::fmt::Write;

use super::model::FormModel;
use super::rules::{RunAt, js_escape};

const ERROR_HANDLER: &str = r#"
  function qf_errorHandler(element, _qfMsg, escapedName) {
    var div = element.parentNode;
    if ((div == undefined) || (element.name == undefined)) {
      return true;
    }
    var errorSpan = document.getElementById('id_error_' + escapedName);
    if (_qfMsg != '') {
      if (!errorSpan) {
        errorSpan = document.createElement('span');
        errorSpan.id = 'id_error_' + escapedName;
        errorSpan.className = 'error';
        div.insertBefore(errorSpan, div.firstChild);
      }
      errorSpan.textContent = _qfMsg.substring(3);
      if (!div.classList.contains('error')) {
        div.classList.add('error');
      }
      return false;
    }
    if (errorSpan) {
      errorSpan.parentNode.removeChild(errorSpan);
    }
    div.classList.remove('error');
    return true;
  }
"#;

/// Escape a name for use inside a JavaScript identifier: `_`, `[`, `]` and
/// `-` become `_` followed by their hex code.
pub fn escape_element_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '_' | '[' | ']' | '-') {
            let _ = write!(escaped, "_{:2x}", u32::from(c));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Assemble the validation script of a form.
///
/// Empty when the form has no client rules. Frozen elements are not
/// validated on the client.
pub fn validation_script(model: &FormModel) -> String {
    if !model.has_client_rules() {
        return String::new();
    }

    // element name -> (rule fragments, element dom id)
    let mut checks: BTreeMap<&str, (Vec<String>, String)> = BTreeMap::new();
    for (name, specs) in model.rules() {
        let Some(element) = model.element(name) else {
            continue;
        };
        if element.frozen {
            continue;
        }
        for spec in specs.iter().filter(|spec| spec.run_at == RunAt::Client) {
            let entry = checks
                .entry(name.as_str())
                .or_insert_with(|| (Vec::new(), element.dom_id()));
            entry.0.push(spec.rule.client_script(name, &spec.message));
        }
    }
    if checks.is_empty() {
        return String::new();
    }

    let form = model.name();
    let form_id = js_escape(model.id());
    let mut js = String::from("var skipClientValidation = false;\n(function() {\n");
    js.push_str(ERROR_HANDLER);

    let mut form_checks = String::new();
    for (name, (fragments, dom_id)) in &checks {
        let escaped = escape_element_name(name);
        let function = format!("validate_{form}_{escaped}");
        let dom_id = js_escape(dom_id);
        let _ = write!(
            js,
            r#"
  function {function}(element, escapedName) {{
    if (undefined == element) {{
      return true;
    }}
    var value = '';
    var errFlag = new Array();
    var _qfMsg = '';
    var frm = element.parentNode;
    if ((undefined != element.name) && (frm != undefined)) {{
      while (frm && frm.nodeName.toUpperCase() != 'FORM') {{
        frm = frm.parentNode;
      }}
{body}
      return qf_errorHandler(element, _qfMsg, escapedName);
    }}
    return true;
  }}

  document.getElementById('{dom_id}').addEventListener('blur', function(ev) {{
    {function}(ev.target, '{escaped}');
  }});
  document.getElementById('{dom_id}').addEventListener('change', function(ev) {{
    {function}(ev.target, '{escaped}');
  }});
"#,
            body = fragments.concat(),
        );

        let _ = write!(
            form_checks,
            r#"
    ret = {function}(frm.elements['{name}'], '{escaped}') && ret;
    if (!ret && !first_focus) {{
      first_focus = true;
      var errorSpan = document.getElementById('id_error_{escaped}');
      if (errorSpan) {{
        errorSpan.focus();
      }}
    }}
"#,
            name = js_escape(name),
        );
    }

    let _ = write!(
        js,
        r#"
  function validate_{form}() {{
    if (skipClientValidation) {{
      return true;
    }}
    var ret = true;
    var frm = document.getElementById('{form_id}');
    var first_focus = false;
{form_checks}
    return ret;
  }}

  document.getElementById('{form_id}').addEventListener('submit', function(ev) {{
    if (!validate_{form}()) {{
      ev.preventDefault();
    }}
  }});
}})();
"#
    );
    js
}
