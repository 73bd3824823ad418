//! `<%= expr %>`-style templates (ejs, lodash, underscore) backed by Rhai.

use super::{html_escape, TemplateError};
use once_cell::sync::Lazy;
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use std::sync::Arc;

static ENGINE: Lazy<Engine> = Lazy::new(|| {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 32);
    engine.set_max_operations(100_000);
    engine
});

/// Which tag escapes HTML differs between ejs and lodash/underscore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddedFlavor {
    Ejs,
    Lodash,
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Expr {
        source: String,
        ast: Arc<AST>,
        escape: bool,
    },
}

#[derive(Debug, Clone)]
pub struct EmbeddedTemplate {
    segments: Vec<Segment>,
}

impl EmbeddedTemplate {
    pub fn compile(text: &str, flavor: EmbeddedFlavor) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find("<%") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find("%>").ok_or_else(|| {
                TemplateError::Syntax(format!("unclosed '<%' at offset {}", text.len() - rest.len() + start))
            })?;
            let tag = &after_open[..end];
            rest = &after_open[end + 2..];

            let (marker, body) = match tag.chars().next() {
                Some(c @ ('=' | '-' | '#')) => (Some(c), &tag[1..]),
                _ => (None, tag),
            };
            let escape = match (marker, flavor) {
                (Some('#'), _) => continue,
                (Some('='), EmbeddedFlavor::Ejs) | (Some('-'), EmbeddedFlavor::Lodash) => true,
                (Some('='), EmbeddedFlavor::Lodash) | (Some('-'), EmbeddedFlavor::Ejs) => false,
                _ => {
                    return Err(TemplateError::Syntax(format!(
                        "scriptlet tags are not supported: '<%{tag}%>'"
                    )))
                }
            };

            let source = body.trim().trim_end_matches(';').trim().to_string();
            let ast = ENGINE
                .compile_expression(&source)
                .map_err(|e| TemplateError::Syntax(format!("'{source}': {e}")))?;
            segments.push(Segment::Expr {
                source,
                ast: Arc::new(ast),
                escape,
            });
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, context: &Value) -> Result<String, TemplateError> {
        let mut scope = Scope::new();
        if let Value::Object(map) = context {
            for (key, value) in map {
                let dynamic = rhai::serde::to_dynamic(value)
                    .map_err(|e| TemplateError::Render(format!("context key '{key}': {e}")))?;
                scope.push_dynamic(key.as_str(), dynamic);
            }
        }

        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Expr {
                    source,
                    ast,
                    escape,
                } => {
                    let result: Dynamic = ENGINE
                        .eval_ast_with_scope(&mut scope, ast)
                        .map_err(|e| TemplateError::Render(format!("'{source}': {e}")))?;
                    let text = dynamic_to_text(result);
                    if *escape {
                        output.push_str(&html_escape(&text));
                    } else {
                        output.push_str(&text);
                    }
                }
            }
        }
        Ok(output)
    }
}

fn dynamic_to_text(value: Dynamic) -> String {
    if value.is_unit() {
        return String::new();
    }
    if value.is_string() {
        return value.into_string().unwrap_or_default();
    }
    if value.is_map() || value.is_array() {
        if let Ok(json) = rhai::serde::from_dynamic::<Value>(&value) {
            return json.to_string();
        }
    }
    value.to_string()
}
