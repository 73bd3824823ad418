//! Indentation-based markup templates (pug, jade).
//!
//! Supported subset:
//!
//! ```text
//! ul#list.items(data-kind="demo")
//!   li first #{query.name}
//!   li
//!     | plain text with !{raw}
//! ```

use super::{display_value, html_escape, lookup_path, TemplateError};
use serde_json::Value;

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "meta", "link"];

#[derive(Debug, Clone)]
enum Inline {
    Text(String),
    Interp { path: String, escape: bool },
}

#[derive(Debug, Clone)]
enum Node {
    Element {
        tag: String,
        id: Option<String>,
        classes: Vec<String>,
        attrs: Vec<(String, Vec<Inline>)>,
        text: Vec<Inline>,
        children: Vec<Node>,
    },
    Text(Vec<Inline>),
}

#[derive(Debug, Clone)]
pub struct MarkupTemplate {
    nodes: Vec<Node>,
}

impl MarkupTemplate {
    pub fn compile(text: &str) -> Result<Self, TemplateError> {
        // (indent, node) pairs awaiting their children
        let mut open: Vec<(usize, Node)> = Vec::new();
        let mut roots: Vec<Node> = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.trim_start().starts_with("//") {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            let node = parse_line(line.trim())
                .map_err(|e| TemplateError::Syntax(format!("line {}: {e}", line_no + 1)))?;

            while open.last().is_some_and(|(level, _)| *level >= indent) {
                close_top(&mut open, &mut roots);
            }
            if let Some((_, Node::Text(_))) = open.last() {
                return Err(TemplateError::Syntax(format!(
                    "line {}: text cannot have nested content",
                    line_no + 1
                )));
            }
            open.push((indent, node));
        }
        while !open.is_empty() {
            close_top(&mut open, &mut roots);
        }

        Ok(Self { nodes: roots })
    }

    pub fn render(&self, context: &Value) -> String {
        let mut output = String::new();
        for node in &self.nodes {
            render_node(node, context, &mut output);
        }
        output
    }
}

fn close_top(open: &mut Vec<(usize, Node)>, roots: &mut Vec<Node>) {
    let Some((_, node)) = open.pop() else {
        return;
    };
    match open.last_mut() {
        Some((_, Node::Element { children, .. })) => children.push(node),
        _ => roots.push(node),
    }
}

fn parse_line(line: &str) -> Result<Node, String> {
    if let Some(text) = line.strip_prefix('|') {
        return Ok(Node::Text(parse_inline(text.strip_prefix(' ').unwrap_or(text))?));
    }

    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let tag_end = chars
        .iter()
        .position(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == ':'))
        .unwrap_or(chars.len());
    let mut tag: String = chars[..tag_end].iter().collect();
    i += tag_end;

    let mut id = None;
    let mut classes = Vec::new();
    while i < chars.len() && (chars[i] == '#' || chars[i] == '.') {
        let marker = chars[i];
        if marker == '#' && chars.get(i + 1) == Some(&'{') {
            break;
        }
        let start = i + 1;
        let mut end = start;
        while end < chars.len() && (chars[end].is_ascii_alphanumeric() || matches!(chars[end], '-' | '_')) {
            end += 1;
        }
        if end == start {
            return Err(format!("empty {} selector", if marker == '#' { "id" } else { "class" }));
        }
        let name: String = chars[start..end].iter().collect();
        if marker == '#' {
            id = Some(name);
        } else {
            classes.push(name);
        }
        i = end;
    }
    if tag.is_empty() {
        if id.is_none() && classes.is_empty() {
            return Err(format!("expected a tag name in '{line}'"));
        }
        tag = "div".to_string();
    }

    let mut attrs = Vec::new();
    if chars.get(i) == Some(&'(') {
        let close = chars[i..]
            .iter()
            .position(|c| *c == ')')
            .ok_or_else(|| "unclosed attribute list".to_string())?
            + i;
        let inner: String = chars[i + 1..close].iter().collect();
        attrs = parse_attrs(&inner)?;
        i = close + 1;
    }

    let rest: String = chars[i..].iter().collect();
    let text = match rest.strip_prefix(' ') {
        Some(text) => parse_inline(text)?,
        None if rest.is_empty() => Vec::new(),
        None => return Err(format!("unexpected '{rest}' after tag '{tag}'")),
    };

    Ok(Node::Element {
        tag,
        id,
        classes,
        attrs,
        text,
        children: Vec::new(),
    })
}

fn parse_attrs(inner: &str) -> Result<Vec<(String, Vec<Inline>)>, String> {
    let mut attrs = Vec::new();
    let mut rest = inner.trim();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| format!("attribute without value in '({inner})'"))?;
        let name = rest[..eq].trim().to_string();
        let value_part = rest[eq + 1..].trim_start();
        let quote = value_part
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| format!("attribute '{name}' value must be quoted"))?;
        let close = value_part[1..]
            .find(quote)
            .ok_or_else(|| format!("unterminated value for attribute '{name}'"))?
            + 1;
        attrs.push((name, parse_inline(&value_part[1..close])?));
        rest = value_part[close + 1..].trim_start_matches([',', ' ']);
    }
    Ok(attrs)
}

fn parse_inline(text: &str) -> Result<Vec<Inline>, String> {
    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        let next = [rest.find("#{"), rest.find("!{")]
            .into_iter()
            .flatten()
            .min();
        let Some(start) = next else {
            break;
        };
        if start > 0 {
            parts.push(Inline::Text(rest[..start].to_string()));
        }
        let escape = rest[start..].starts_with('#');
        let end = rest[start..]
            .find('}')
            .ok_or_else(|| "unclosed interpolation".to_string())?
            + start;
        let path = rest[start + 2..end].trim().to_string();
        if path.is_empty() {
            return Err("empty interpolation".to_string());
        }
        parts.push(Inline::Interp { path, escape });
        rest = &rest[end + 1..];
    }
    if !rest.is_empty() {
        parts.push(Inline::Text(rest.to_string()));
    }
    Ok(parts)
}

fn render_inline(parts: &[Inline], context: &Value, output: &mut String) {
    for part in parts {
        match part {
            Inline::Text(text) => output.push_str(text),
            Inline::Interp { path, escape } => {
                let text = lookup_path(context, path)
                    .map(display_value)
                    .unwrap_or_default();
                if *escape {
                    output.push_str(&html_escape(&text));
                } else {
                    output.push_str(&text);
                }
            }
        }
    }
}

fn render_node(node: &Node, context: &Value, output: &mut String) {
    match node {
        Node::Text(parts) => render_inline(parts, context, output),
        Node::Element {
            tag,
            id,
            classes,
            attrs,
            text,
            children,
        } => {
            output.push('<');
            output.push_str(tag);
            if let Some(id) = id {
                output.push_str(&format!(" id=\"{}\"", html_escape(id)));
            }
            if !classes.is_empty() {
                output.push_str(&format!(" class=\"{}\"", classes.join(" ")));
            }
            for (name, value) in attrs {
                let mut rendered = String::new();
                render_inline(value, context, &mut rendered);
                output.push_str(&format!(" {name}=\"{rendered}\""));
            }
            if VOID_ELEMENTS.contains(&tag.as_str()) {
                output.push_str("/>");
                return;
            }
            output.push('>');
            render_inline(text, context, output);
            for child in children {
                render_node(child, context, output);
            }
            output.push_str("</");
            output.push_str(tag);
            output.push('>');
        }
    }
}
