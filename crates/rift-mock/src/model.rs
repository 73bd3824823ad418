//! The routing model produced by the loader: ports → virtual hosts → rules.

use crate::rule::{Rule, RuleDefaults};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Everything the server knows about, keyed by port number.
#[derive(Debug, Clone, Default)]
pub struct RoutingModel {
    pub ports: BTreeMap<u16, Port>,
}

impl RoutingModel {
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.ports
            .values()
            .flat_map(|p| p.vhosts.values())
            .map(|v| v.rules.len())
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    pub number: u16,
    pub vhosts: BTreeMap<String, VirtualHost>,
}

impl Port {
    pub fn new(number: u16) -> Self {
        Self {
            number,
            vhosts: BTreeMap::new(),
        }
    }
}

/// One virtual host (domain) and its rule set.
#[derive(Debug, Clone)]
pub struct VirtualHost {
    pub name: String,
    /// Host names served, `name` first
    pub domains: Vec<String>,
    /// Raw vhost config file contents (`Value::Null` when absent)
    pub config: Value,
    pub defaults: RuleDefaults,
    /// Record request/response pairs for this rule set
    pub record: bool,
    /// Rule key (domain-root relative file path) → rule, in load order
    pub rules: Vec<(String, Arc<Rule>)>,
}

impl VirtualHost {
    /// A vhost with no config file: serves its own name only.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            domains: vec![name.to_lowercase()],
            name,
            config: Value::Null,
            defaults: RuleDefaults::default(),
            record: false,
            rules: Vec::new(),
        }
    }

    /// Apply a parsed vhost config: extra domains, rule defaults and the record flag.
    pub fn with_config(mut self, config: Value) -> Self {
        if let Some(domains) = config.get("domains").and_then(Value::as_array) {
            for domain in domains.iter().filter_map(Value::as_str) {
                let domain = domain.to_lowercase();
                if !self.domains.contains(&domain) {
                    self.domains.push(domain);
                }
            }
        }
        if let Some(defaults) = config.get("default") {
            match serde_json::from_value(defaults.clone()) {
                Ok(defaults) => self.defaults = defaults,
                Err(e) => warn!(
                    "Ignoring invalid 'default' section of vhost '{}': {}",
                    self.name,
                    e
                ),
            }
        }
        self.record = config
            .get("record")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.config = config;
        self
    }

    pub fn serves(&self, host: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(host))
    }

    pub fn rule(&self, key: &str) -> Option<&Arc<Rule>> {
        self.rules.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }
}
