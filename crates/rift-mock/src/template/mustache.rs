//! Logic-less `{{name}}` templates (mustache, handlebars).

use super::{display_value, html_escape, lookup_path, TemplateError};
use serde_json::Value;

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Var { path: String, escape: bool },
    Section {
        path: String,
        inverted: bool,
        children: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct MustacheTemplate {
    nodes: Vec<Node>,
}

impl MustacheTemplate {
    pub fn compile(text: &str) -> Result<Self, TemplateError> {
        // Stack of (section path, inverted, collected children)
        let mut stack: Vec<(String, bool, Vec<Node>)> = vec![(String::new(), false, Vec::new())];
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                push_node(&mut stack, Node::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let (tag, remainder) = if let Some(triple) = after.strip_prefix('{') {
                let end = triple
                    .find("}}}")
                    .ok_or_else(|| TemplateError::Syntax("unclosed '{{{'".to_string()))?;
                (format!("&{}", &triple[..end]), &triple[end + 3..])
            } else {
                let end = after
                    .find("}}")
                    .ok_or_else(|| TemplateError::Syntax("unclosed '{{'".to_string()))?;
                (after[..end].to_string(), &after[end + 2..])
            };
            rest = remainder;

            let tag = tag.trim();
            let (sigil, name) = match tag.chars().next() {
                Some(c @ ('#' | '^' | '/' | '!' | '&')) => (Some(c), tag[1..].trim().to_string()),
                _ => (None, tag.to_string()),
            };

            match sigil {
                Some('!') => {}
                Some('&') => push_node(&mut stack, Node::Var { path: name, escape: false }),
                Some('#') | Some('^') => stack.push((name, sigil == Some('^'), Vec::new())),
                Some('/') => {
                    if stack.len() < 2 {
                        return Err(TemplateError::Syntax(format!(
                            "closing '{{{{/{name}}}}}' without an open section"
                        )));
                    }
                    let (path, inverted, children) = stack.pop().unwrap_or_default();
                    if path != name {
                        return Err(TemplateError::Syntax(format!(
                            "section '{path}' closed by '{name}'"
                        )));
                    }
                    push_node(&mut stack, Node::Section { path, inverted, children });
                }
                _ => {
                    if name.is_empty() {
                        return Err(TemplateError::Syntax("empty tag '{{}}'".to_string()));
                    }
                    push_node(&mut stack, Node::Var { path: name, escape: true });
                }
            }
        }
        if !rest.is_empty() {
            push_node(&mut stack, Node::Text(rest.to_string()));
        }

        if stack.len() != 1 {
            let open = stack.last().map(|s| s.0.clone()).unwrap_or_default();
            return Err(TemplateError::Syntax(format!("unclosed section '{open}'")));
        }
        let (_, _, nodes) = stack.pop().unwrap_or_default();
        Ok(Self { nodes })
    }

    /// Missing values render as empty text.
    pub fn render(&self, context: &Value) -> String {
        let mut output = String::new();
        let mut scopes = vec![context];
        render_nodes(&self.nodes, &mut scopes, &mut output);
        output
    }
}

fn push_node(stack: &mut [(String, bool, Vec<Node>)], node: Node) {
    if let Some((_, _, children)) = stack.last_mut() {
        children.push(node);
    }
}

fn resolve<'a>(scopes: &[&'a Value], path: &str) -> Option<&'a Value> {
    if path == "." {
        return scopes.last().copied();
    }
    let first = path.split('.').next().unwrap_or(path);
    scopes
        .iter()
        .rev()
        .find(|scope| lookup_path(scope, first).is_some())
        .and_then(|scope| lookup_path(*scope, path))
}

fn is_falsy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn render_nodes<'a>(nodes: &'a [Node], scopes: &mut Vec<&'a Value>, output: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Var { path, escape } => {
                if let Some(value) = resolve(scopes, path) {
                    let text = display_value(value);
                    if *escape {
                        output.push_str(&html_escape(&text));
                    } else {
                        output.push_str(&text);
                    }
                }
            }
            Node::Section {
                path,
                inverted,
                children,
            } => {
                let value = resolve(scopes, path);
                if *inverted {
                    if is_falsy(value) {
                        render_nodes(children, scopes, output);
                    }
                    continue;
                }
                match value {
                    _ if is_falsy(value) => {}
                    Some(Value::Array(items)) => {
                        for item in items {
                            scopes.push(item);
                            render_nodes(children, scopes, output);
                            scopes.pop();
                        }
                    }
                    Some(item) => {
                        scopes.push(item);
                        render_nodes(children, scopes, output);
                        scopes.pop();
                    }
                    None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(text: &str, context: Value) -> String {
        MustacheTemplate::compile(text).unwrap().render(&context)
    }

    #[test]
    fn test_escaped_and_raw_variables() {
        let context = json!({"html": "<i>x</i>"});
        assert_eq!(
            render("{{html}}|{{{html}}}|{{& html}}", context),
            "&lt;i&gt;x&lt;/i&gt;|<i>x</i>|<i>x</i>"
        );
    }

    #[test]
    fn test_dotted_paths_and_missing_values() {
        let context = json!({"query": {"name": "Ada"}});
        assert_eq!(render("{{ query.name }}/{{query.none}}/{{nope}}", context), "Ada//");
    }

    #[test]
    fn test_sections_iterate_lists() {
        let context = json!({"items": [{"n": 1}, {"n": 2}], "title": "T"});
        assert_eq!(render("{{#items}}[{{n}}{{title}}]{{/items}}", context), "[1T][2T]");
    }

    #[test]
    fn test_inverted_sections_and_comments() {
        let context = json!({"items": [], "flag": true});
        assert_eq!(
            render("{{^items}}none{{/items}}{{! hidden }}{{#flag}}on{{/flag}}", context),
            "noneon"
        );
    }

    #[test]
    fn test_unbalanced_sections_fail() {
        assert!(MustacheTemplate::compile("{{#a}}x").is_err());
        assert!(MustacheTemplate::compile("{{#a}}x{{/b}}").is_err());
        assert!(MustacheTemplate::compile("x{{/a}}").is_err());
        assert!(MustacheTemplate::compile("{{name").is_err());
    }
}
