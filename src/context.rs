//! Context file loading and validation.
//!
//! A context is the top-level YAML document naming a group of services. The
//! declared map order is the default tab order (hence `IndexMap`), merged
//! with any saved order from the context settings at load time.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ContextFile {
    name: Option<String>,
    #[serde(default)]
    services: IndexMap<String, ServiceDef>,
}

/// One service as declared in the context file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDef {
    pub name: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    pub healthcheck: Option<HealthcheckDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDef {
    pub command: String,
    pub path: Option<String>,
    #[serde(default)]
    pub locks: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub kill: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckDef {
    pub command: String,
    pub period: Option<u64>,
    #[serde(default)]
    pub lock_until_healthy: Vec<String>,
}

/// A loaded and validated context.
#[derive(Debug)]
pub struct LoadedContext {
    pub name: String,
    pub file_path: PathBuf,
    /// Directory the context file lives in; the default working directory
    /// for services without an explicit path.
    pub dir: PathBuf,
    pub services: IndexMap<String, ServiceDef>,
}

pub fn load_context(path: &Path) -> Result<LoadedContext> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read context file {}", path.display()))?;
    let parsed: ContextFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse context file {}", path.display()))?;
    if parsed.services.is_empty() {
        bail!("no services defined, must define at least 1 service");
    }
    validate_requires(&parsed.services)?;

    let file_path = path
        .canonicalize()
        .with_context(|| format!("failed to resolve context file path {}", path.display()))?;
    let dir = file_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = match parsed.name {
        Some(name) if !name.is_empty() => name,
        _ => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "context".to_string()),
    };

    Ok(LoadedContext {
        name,
        file_path,
        dir,
        services: parsed.services,
    })
}

/// Orders the declared service keys by a previously saved order: saved keys
/// that still exist come first, then any new keys in declared order.
pub fn merge_service_order(declared: Vec<String>, saved: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = saved
        .iter()
        .filter(|key| declared.contains(key))
        .cloned()
        .collect();
    for key in declared {
        if !ordered.contains(&key) {
            ordered.push(key);
        }
    }
    ordered
}

// Every `requires` entry must name a declared service, and the requires
// graph must be acyclic: a cycle would leave both services waiting on each
// other in Starting forever, so it is rejected up front.
fn validate_requires(services: &IndexMap<String, ServiceDef>) -> Result<()> {
    for (key, service) in services {
        if service.commands.is_empty() {
            bail!("service {key} defines no commands");
        }
        for command in &service.commands {
            for required in &command.requires {
                if !services.contains_key(required) {
                    bail!("service {key} requires unknown service {required}");
                }
            }
        }
    }
    if let Some(cycle) = find_cycle(services) {
        bail!("dependency cycle between services: {}", cycle.join(" -> "));
    }
    Ok(())
}

fn find_cycle(services: &IndexMap<String, ServiceDef>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        key: &str,
        services: &IndexMap<String, ServiceDef>,
        marks: &mut IndexMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks[key] {
            Mark::Done => return None,
            Mark::InProgress => {
                let start = stack.iter().position(|k| k == key).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(key.to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }
        marks[key] = Mark::InProgress;
        stack.push(key.to_string());
        if let Some(service) = services.get(key) {
            for command in &service.commands {
                for required in &command.requires {
                    if let Some(cycle) = visit(required, services, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        marks[key] = Mark::Done;
        None
    }

    let mut marks: IndexMap<String, Mark> = services
        .keys()
        .map(|key| (key.clone(), Mark::Unvisited))
        .collect();
    let keys: Vec<String> = services.keys().cloned().collect();
    let mut stack = Vec::new();
    for key in keys {
        if marks[&key] == Mark::Unvisited {
            if let Some(cycle) = visit(&key, services, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_services(yaml: &str) -> IndexMap<String, ServiceDef> {
        let parsed: ContextFile = serde_yaml::from_str(yaml).unwrap();
        parsed.services
    }

    #[test]
    fn parses_full_service_definition() {
        let services = parse_services(
            r#"
name: dev
services:
  db:
    name: Postgres
    path: ./db
    commands:
      - command: docker compose up
        locks: [db-port]
        kill: true
    healthcheck:
      command: pg_isready
      period: 2
      lockUntilHealthy: [db-port]
  api:
    commands:
      - command: make migrate
        requires: [db]
      - command: make run
"#,
        );
        assert_eq!(services.len(), 2);
        let db = &services["db"];
        assert_eq!(db.name.as_deref(), Some("Postgres"));
        assert_eq!(db.commands[0].locks, vec!["db-port"]);
        assert!(db.commands[0].kill);
        let hc = db.healthcheck.as_ref().unwrap();
        assert_eq!(hc.command, "pg_isready");
        assert_eq!(hc.period, Some(2));
        assert_eq!(hc.lock_until_healthy, vec!["db-port"]);
        let api = &services["api"];
        assert_eq!(api.commands.len(), 2);
        assert_eq!(api.commands[0].requires, vec!["db"]);
        assert!(!api.commands[1].kill);
    }

    #[test]
    fn declared_order_is_preserved() {
        let services = parse_services(
            "services:\n  zeta:\n    commands: []\n  alpha:\n    commands: []\n",
        );
        let keys: Vec<_> = services.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn service_without_commands_is_rejected() {
        let services = parse_services("services:\n  empty:\n    commands: []\n");
        let err = validate_requires(&services).unwrap_err().to_string();
        assert!(err.contains("no commands"), "unexpected error: {err}");
    }

    #[test]
    fn unknown_requires_is_rejected() {
        let services = parse_services(
            "services:\n  api:\n    commands:\n      - command: run\n        requires: [ghost]\n",
        );
        assert!(validate_requires(&services).is_err());
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let services = parse_services(
            r#"
services:
  a:
    commands:
      - command: run-a
        requires: [b]
  b:
    commands:
      - command: run-b
        requires: [a]
"#,
        );
        let err = validate_requires(&services).unwrap_err().to_string();
        assert!(err.contains("cycle"), "unexpected error: {err}");
    }

    #[test]
    fn self_requirement_is_a_cycle() {
        let services = parse_services(
            "services:\n  a:\n    commands:\n      - command: run\n        requires: [a]\n",
        );
        assert!(validate_requires(&services).is_err());
    }

    #[test]
    fn acyclic_chain_passes_validation() {
        let services = parse_services(
            r#"
services:
  a:
    commands:
      - command: run-a
  b:
    commands:
      - command: run-b
        requires: [a]
  c:
    commands:
      - command: run-c
        requires: [a, b]
"#,
        );
        assert!(validate_requires(&services).is_ok());
    }

    #[test]
    fn merge_service_order_puts_saved_keys_first() {
        let declared = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let saved = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        assert_eq!(merge_service_order(declared, &saved), vec!["c", "a", "b"]);
    }

    #[test]
    fn merge_service_order_without_saved_state_keeps_declared() {
        let declared = vec!["a".to_string(), "b".to_string()];
        assert_eq!(merge_service_order(declared.clone(), &[]), declared);
    }
}
