//! Template expressions for insert/delete entries
//!
//! A template entry is a Handlebars template rendered against the data of
//! the request's `with` query. The rendered text must be JSON: either one
//! node object or a list of node objects. HTML escaping is disabled; use the
//! `json` helper to embed bound values as properly quoted JSON.

use crate::error::{ChangeError, Result};
use handlebars::Handlebars;
use serde_json::{Map, Value as JsonValue};

/// Renders template entries into JSON-LD node objects
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("json", Box::new(json_helper));
        Self { handlebars }
    }

    /// Render `template` with `bindings` and parse the result into node maps.
    ///
    /// An empty list is a valid result. Anything other than a list of
    /// objects or a single object is a validation error.
    pub fn render(
        &self,
        template: &str,
        bindings: &JsonValue,
    ) -> Result<Vec<Map<String, JsonValue>>> {
        let text = self
            .handlebars
            .render_template(template, bindings)
            .map_err(|e| ChangeError::Template(e.to_string()))?;
        let value: JsonValue = serde_json::from_str(&text).map_err(|e| {
            ChangeError::Template(format!("template output is not valid JSON: {e}"))
        })?;
        match value {
            JsonValue::Object(map) => Ok(vec![map]),
            JsonValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    JsonValue::Object(map) => Ok(map),
                    other => Err(ChangeError::validation(format!(
                        "template list items must be objects, found {other}"
                    ))),
                })
                .collect(),
            other => Err(ChangeError::validation(format!(
                "template must evaluate to a list or a map, found {other}"
            ))),
        }
    }
}

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    if let Some(v) = h.param(0) {
        out.write(&serde_json::to_string(v.value()).unwrap_or_default())?;
    }
    Ok(())
}
