// src/project/template.rs

//! Rendering of entry-point command templates.
//!
//! Placeholders are written `{name}`. `{{` and `}}` produce literal braces.
//! A trailing conversion or format spec (`{name!r}`, `{name:>8}`) is
//! accepted and ignored; the value is always inserted as-is.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};

use crate::errors::{ProjrunError, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("static regex is valid")
});

fn placeholder_key(inner: &str) -> &str {
    inner
        .split(['!', ':'])
        .next()
        .unwrap_or(inner)
}

/// Names referenced by `template`, in order of appearance (duplicates kept).
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| placeholder_key(m.as_str()).to_string()))
        .collect()
}

/// Substitute `values` into `template`.
///
/// Fails if the template references a name that is not in `values`.
pub fn render(template: &str, values: &IndexMap<String, String>) -> Result<String> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        match caps.get(1) {
            None => {
                // `{{` or `}}`
                caps[0][..1].to_string()
            }
            Some(inner) => {
                let key = placeholder_key(inner.as_str());
                match values.get(key) {
                    Some(v) => v.clone(),
                    None => {
                        missing.get_or_insert_with(|| key.to_string());
                        String::new()
                    }
                }
            }
        }
    });

    if let Some(key) = missing {
        return Err(ProjrunError::TemplateRender(format!(
            "command template references '{{{key}}}', which is not a declared parameter"
        )));
    }

    Ok(rendered.into_owned())
}
