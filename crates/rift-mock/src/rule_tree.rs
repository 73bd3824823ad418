//! Segment-indexed rule lookup.
//!
//! Rules are stored in a tree keyed by path segments, with per-method lists
//! at each node:
//!
//! ```text
//! /            get: [root-rule]
//! └── f1       get: [f1-a, f1-b]
//!     └── f1_2 post: [f1_2-a]
//! ```
//!
//! A lookup walks the request path's segments, so its cost depends on the
//! path depth rather than the number of rules. Prefixes match whole
//! segments: `/f1` covers `/f1` and `/f1/x` but not `/f10`.

use crate::rule::Rule;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    /// Method → rules in registration order
    rules: HashMap<String, Vec<Arc<Rule>>>,
}

#[derive(Debug, Default)]
pub struct RuleTree {
    root: Node,
    len: usize,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl RuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule under its method and path prefix.
    ///
    /// A rule registered behind an unconditional rule with the same method and
    /// prefix can never match; this is accepted but logged.
    pub fn put(&mut self, rule: Arc<Rule>) {
        let mut node = &mut self.root;
        for segment in segments(&rule.path_prefix) {
            node = node.children.entry(segment.to_string()).or_default();
        }

        let list = node.rules.entry(rule.method.to_lowercase()).or_default();
        if let Some(shadowing) = list.iter().find(|r| r.condition.is_none()) {
            warn!(
                "Rule '{}' ({} {}) is unreachable: rule '{}' has the same method and prefix and no condition",
                rule.name, rule.method, rule.path_prefix, shadowing.name
            );
        }
        list.push(rule);
        self.len += 1;
    }

    /// Candidate rules for a request, most specific prefix first and
    /// registration order within the same prefix.
    pub fn candidates(&self, method: &str, path: &str) -> Vec<Arc<Rule>> {
        let method = method.to_lowercase();
        let mut visited = vec![&self.root];
        let mut node = &self.root;
        for segment in segments(path) {
            match node.children.get(segment) {
                Some(child) => {
                    visited.push(child);
                    node = child;
                }
                None => break,
            }
        }

        visited
            .iter()
            .rev()
            .filter_map(|n| n.rules.get(&method))
            .flat_map(|rules| rules.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FromIterator<Arc<Rule>> for RuleTree {
    fn from_iter<I: IntoIterator<Item = Arc<Rule>>>(iter: I) -> Self {
        let mut tree = RuleTree::new();
        for rule in iter {
            tree.put(rule);
        }
        tree
    }
}
