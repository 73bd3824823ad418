//! Builds the routing model from a mock directory.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   7086/                      port (numeric directory name)
//!     first.com/               virtual host
//!       mw.json                vhost config (optional)
//!       f1/
//!         f1_1_rule1.json      rule, prefix /f1, key /f1/f1_1_rule1.json
//!         f1_2/
//!           rule.yaml          rule, prefix /f1/f1_2
//! ```
//!
//! Loading never fails as a whole: anything unreadable or malformed is
//! logged and skipped, and a missing root yields an empty model.

use crate::error::ConfigError;
use crate::model::{Port, RoutingModel, VirtualHost};
use crate::rule::{Rule, RuleFile};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File names recognized as the vhost config, in lookup order.
pub const VHOST_CONFIG_FILES: &[&str] = &["mw.json", "mw.yaml", "mw.yml"];

/// Load the routing model rooted at `root`.
pub fn load(root: impl AsRef<Path>) -> RoutingModel {
    let root = root.as_ref();
    let mut model = RoutingModel::default();

    let entries = match sorted_entries(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Mock directory {} is not readable: {}", root.display(), e);
            return model;
        }
    };

    for path in entries {
        let name = entry_name(&path);
        if !path.is_dir() {
            warn!("Skipping {}: not a port directory", path.display());
            continue;
        }
        let Ok(number) = name.parse::<u16>() else {
            warn!("Skipping {}: directory name is not a port number", path.display());
            continue;
        };
        model.ports.insert(number, load_port(number, &path));
    }

    info!(
        "Loaded {} rules across {} ports from {}",
        model.rule_count(),
        model.ports.len(),
        root.display()
    );
    model
}

fn load_port(number: u16, dir: &Path) -> Port {
    let mut port = Port::new(number);
    let entries = match sorted_entries(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Port directory {} is not readable: {}", dir.display(), e);
            return port;
        }
    };

    for path in entries {
        if !path.is_dir() {
            warn!("Skipping {}: not a virtual host directory", path.display());
            continue;
        }
        let vhost = load_vhost(entry_name(&path), &path);
        debug!(
            "Port {}: vhost '{}' with {} rules",
            number,
            vhost.name,
            vhost.rules.len()
        );
        port.vhosts.insert(vhost.name.clone(), vhost);
    }
    port
}

/// Load one virtual host directory: its config file plus every rule below it.
pub fn load_vhost(name: String, dir: &Path) -> VirtualHost {
    let mut vhost = VirtualHost::new(name);
    if let Some(config) = read_vhost_config(dir) {
        vhost = vhost.with_config(config);
    }

    let mut files = Vec::new();
    collect_rule_files(dir, dir, &mut files);

    let mut unnamed = 0usize;
    for (key, path) in files {
        match load_rule(&vhost, &key, &path, unnamed) {
            Ok((rule, named)) => {
                if !named {
                    unnamed += 1;
                }
                vhost.rules.push((key, Arc::new(rule)));
            }
            Err(e) => warn!("Skipping rule {} of vhost '{}': {}", key, vhost.name, e),
        }
    }
    vhost
}

/// Returns the rule and whether it carried its own name.
fn load_rule(
    vhost: &VirtualHost,
    key: &str,
    path: &Path,
    unnamed: usize,
) -> Result<(Rule, bool), ConfigError> {
    let file: RuleFile = parse_file(path)?;
    let named = file.name.is_some();
    let rule = Rule::from_file(
        &file,
        &vhost.defaults,
        Some(derived_prefix(key)),
        format!("{}{}", vhost.name, unnamed),
    )?;
    Ok((rule, named))
}

/// `/f1/f1_2/rule.json` → `/f1/f1_2`; files at the domain root derive `/`.
pub fn derived_prefix(key: &str) -> &str {
    match key.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &key[..i],
    }
}

fn read_vhost_config(dir: &Path) -> Option<Value> {
    let path = VHOST_CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())?;
    match parse_file::<Value>(&path) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!("Ignoring vhost config: {}", e);
            None
        }
    }
}

fn collect_rule_files(root: &Path, dir: &Path, files: &mut Vec<(String, PathBuf)>) {
    let entries = match sorted_entries(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Directory {} is not readable: {}", dir.display(), e);
            return;
        }
    };

    for path in entries {
        if path.is_dir() {
            collect_rule_files(root, &path, files);
            continue;
        }
        if dir == root && VHOST_CONFIG_FILES.contains(&entry_name(&path).as_str()) {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .fold(String::new(), |mut key, part| {
                key.push('/');
                key.push_str(&part);
                key
            });
        files.push((key, path));
    }
}

/// JSON for `.json` files, YAML for everything else.
fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let parsed = if is_json {
        serde_json::from_str(&contents).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&contents).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    })
}

/// Directory entries sorted by name, hidden entries excluded.
fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| !entry_name(path).starts_with('.'))
        .collect();
    entries.sort();
    Ok(entries)
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "dummyFile", "none");
        fs::create_dir_all(root.join("dummyDir")).unwrap();
        write(root, "7086/dummyHost", "none");
        write(
            root,
            "7086/first.com/mw.json",
            &json!({"nosense": "blah"}).to_string(),
        );
        write(
            root,
            "7086/first.com/f1/f1_1_rule1.json",
            &json!({"f1_1_rule1_key": "f1_1_rule1_value"}).to_string(),
        );
        write(
            root,
            "7086/first.com/f1/f1_2/f1_2_rule1.json",
            &json!({"f1_2_rule1_key": "f1_2_rule1_value"}).to_string(),
        );
        write(
            root,
            "7086/first.com/f1/f1_2/f1_2_rule2.json",
            &json!({"name": "named"}).to_string(),
        );
        fs::create_dir_all(root.join("7086/first.com/f2")).unwrap();
        write(
            root,
            "7086/second.org/s1/s1_2.action/s1_2_rule1.yaml",
            "method: POST\nresponse:\n  status: 201\n",
        );
        dir
    }

    #[test]
    fn test_load_layout() {
        let dir = fixture();
        let model = load(dir.path());

        assert_eq!(model.ports.keys().copied().collect::<Vec<_>>(), vec![7086]);
        let port = &model.ports[&7086];
        assert_eq!(port.number, 7086);

        let first = &port.vhosts["first.com"];
        assert_eq!(first.name, "first.com");
        assert_eq!(first.domains, vec!["first.com"]);
        assert_eq!(first.config["nosense"], "blah");

        let keys: Vec<&str> = first.rules.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "/f1/f1_1_rule1.json",
                "/f1/f1_2/f1_2_rule1.json",
                "/f1/f1_2/f1_2_rule2.json"
            ]
        );
        assert_eq!(first.rule("/f1/f1_1_rule1.json").unwrap().path_prefix, "/f1");
        assert_eq!(first.rule("/f1/f1_2/f1_2_rule1.json").unwrap().path_prefix, "/f1/f1_2");

        let second = &port.vhosts["second.org"];
        assert!(second.config.is_null());
        let rule = second.rule("/s1/s1_2.action/s1_2_rule1.yaml").unwrap();
        assert_eq!(rule.path_prefix, "/s1/s1_2.action");
        assert_eq!(rule.method, "post");
        assert_eq!(rule.response.status, 201);
    }

    #[test]
    fn test_generated_names_count_unnamed_rules_only() {
        let dir = fixture();
        let model = load(dir.path());
        let first = &model.ports[&7086].vhosts["first.com"];
        let names: Vec<&str> = first.rules.iter().map(|(_, r)| r.name.as_str()).collect();
        assert_eq!(names, vec!["first.com0", "first.com1", "named"]);
    }

    #[test]
    #[traced_test]
    fn test_invalid_rules_are_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for i in 0..4 {
            write(root, &format!("8080/a.com/r{i}.json"), "{}");
        }
        write(root, "8080/a.com/bad.json", "{not json");
        write(
            root,
            "8080/a.com/both.json",
            &json!({"response": {"body": "x", "template": "y"}}).to_string(),
        );
        write(root, "8080/a.com/.hidden.json", "{not json");

        let model = load(root);
        assert_eq!(model.ports[&8080].vhosts["a.com"].rules.len(), 4);
        assert!(logs_contain("Skipping rule /bad.json"));
        assert!(logs_contain("Skipping rule /both.json"));
        assert!(!logs_contain(".hidden.json"));
    }

    #[test]
    fn test_vhost_defaults_and_root_rules() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "9000/api.local/mw.yaml",
            "domains: [api.alias]\nrecord: true\ndefault:\n  path: /base\n  method: put\n",
        );
        write(root, "9000/api.local/root.json", "{}");
        write(root, "9000/api.local/explicit.json", r#"{"path": "/own"}"#);
        write(root, "9000/api.local/nested/rule.json", "{}");

        let model = load(root);
        let vhost = &model.ports[&9000].vhosts["api.local"];
        assert!(vhost.record);
        assert!(vhost.serves("api.alias"));
        // the file location wins over the vhost default path
        assert_eq!(vhost.rule("/root.json").unwrap().path_prefix, "/");
        assert_eq!(vhost.rule("/explicit.json").unwrap().path_prefix, "/own");
        assert_eq!(vhost.rule("/nested/rule.json").unwrap().path_prefix, "/nested");
        assert_eq!(vhost.rule("/nested/rule.json").unwrap().method, "put");
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let model = load(dir.path().join("not_existed"));
        assert!(model.is_empty());
    }

    #[test]
    fn test_derived_prefix() {
        assert_eq!(derived_prefix("/rule.json"), "/");
        assert_eq!(derived_prefix("/f1/rule.json"), "/f1");
        assert_eq!(derived_prefix("/f1/f1_2/rule.json"), "/f1/f1_2");
    }
}
