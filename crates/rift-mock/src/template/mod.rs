//! Response body templating.
//!
//! A template is compiled once from a `(dialect, text)` pair when its rule is
//! loaded and rendered once per matched request against a JSON context
//! (normally [`crate::request::NormalizedRequest::context`]).
//!
//! # Supported Dialects
//!
//! | Tag                       | Syntax                                            |
//! |---------------------------|---------------------------------------------------|
//! | `ejs`                     | `<%= expr %>` escaped, `<%- expr %>` raw          |
//! | `lodash`, `underscore`    | `<%= expr %>` raw, `<%- expr %>` escaped          |
//! | `mustache`, `handlebars`  | `{{name}}` escaped, `{{{name}}}` raw, sections    |
//! | `pug`, `jade`             | indentation-based markup with `#{name}`           |
//!
//! Embedded expressions are evaluated with Rhai; every top-level context key
//! is bound as a variable.
//!
//! # Example
//!
//! ```ignore
//! let template = Template::compile("ejs", "hi <%= you %>")?;
//! assert_eq!(template.render(&json!({"you": "Ada"}))?, "hi Ada");
//! ```

mod embedded;
mod markup;
mod mustache;

use embedded::{EmbeddedFlavor, EmbeddedTemplate};
use markup::MarkupTemplate;
use mustache::MustacheTemplate;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    #[error("Unsupported template type '{0}'")]
    UnsupportedDialect(String),
    #[error("Template syntax error: {0}")]
    Syntax(String),
    #[error("Template render error: {0}")]
    Render(String),
}

/// Closed set of template dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Ejs,
    Lodash,
    Mustache,
    Pug,
}

impl Dialect {
    /// Resolve a dialect tag (case-insensitive).
    pub fn from_tag(tag: &str) -> Result<Self, TemplateError> {
        match tag.trim().to_lowercase().as_str() {
            "ejs" => Ok(Dialect::Ejs),
            "lodash" | "underscore" => Ok(Dialect::Lodash),
            "mustache" | "handlebars" => Ok(Dialect::Mustache),
            "pug" | "jade" => Ok(Dialect::Pug),
            _ => Err(TemplateError::UnsupportedDialect(tag.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Dialect::Ejs => "ejs",
            Dialect::Lodash => "lodash",
            Dialect::Mustache => "mustache",
            Dialect::Pug => "pug",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Embedded(EmbeddedTemplate),
    Mustache(MustacheTemplate),
    Markup(MarkupTemplate),
}

/// A compiled template, cheap to share across requests.
#[derive(Debug, Clone)]
pub struct Template {
    dialect: Dialect,
    source: String,
    compiled: Compiled,
}

impl Template {
    /// Compile `text` in the dialect named by `tag`.
    pub fn compile(tag: &str, text: &str) -> Result<Self, TemplateError> {
        let dialect = Dialect::from_tag(tag)?;
        let compiled = match dialect {
            Dialect::Ejs => Compiled::Embedded(EmbeddedTemplate::compile(text, EmbeddedFlavor::Ejs)?),
            Dialect::Lodash => {
                Compiled::Embedded(EmbeddedTemplate::compile(text, EmbeddedFlavor::Lodash)?)
            }
            Dialect::Mustache => Compiled::Mustache(MustacheTemplate::compile(text)?),
            Dialect::Pug => Compiled::Markup(MarkupTemplate::compile(text)?),
        };
        Ok(Self {
            dialect,
            source: text.to_string(),
            compiled,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, context: &Value) -> Result<String, TemplateError> {
        match &self.compiled {
            Compiled::Embedded(t) => t.render(context),
            Compiled::Mustache(t) => Ok(t.render(context)),
            Compiled::Markup(t) => Ok(t.render(context)),
        }
    }
}

/// Resolve a dotted path (`a.b.0.c`) inside a JSON value.
pub(crate) fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Text form of a value as it appears in rendered output.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
