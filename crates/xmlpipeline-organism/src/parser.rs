//! Parses organism YAML into `OrganismConfig` — spec §6.2.

use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::OrganismConfig;

/// Parse an organism description already read into memory.
pub fn parse_organism(yaml: &str) -> Result<OrganismConfig, ConfigError> {
    let config: OrganismConfig = serde_yaml::from_str(yaml)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &OrganismConfig) -> Result<(), ConfigError> {
    if config.organism.name.trim().is_empty() {
        return Err(ConfigError::Invalid("organism.name must not be empty".into()));
    }
    let mut seen = HashSet::new();
    for listener in &config.listeners {
        if listener.name.trim().is_empty() {
            return Err(ConfigError::Invalid("listener name must not be empty".into()));
        }
        if !seen.insert(listener.name.clone()) {
            return Err(ConfigError::Invalid(format!("duplicate listener name '{}'", listener.name)));
        }
    }
    Ok(())
}

/// Loads and parses an organism description from disk — the Rust
/// counterpart of `ConfigLoader.load(path)`.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: impl AsRef<Path>) -> Result<OrganismConfig, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_organism(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
organism:
  name: hello-organism
  port: 9999
max_concurrent_handlers: 8
listeners:
  - name: greeter
    payload_class: xmlpipeline::demo::hello::Greeting
    handler: xmlpipeline::demo::hello::handle_greeting
    description: "Greets whoever said hello"
    agent: true
    peers: [shouter]
"#;

    #[test]
    fn parses_full_document_applying_defaults() {
        let config = parse_organism(SAMPLE).unwrap();
        assert_eq!(config.organism.name, "hello-organism");
        assert_eq!(config.organism.port, 9999);
        assert_eq!(config.max_concurrent_handlers, 8);
        assert_eq!(config.max_concurrent_pipelines, 50);
        assert_eq!(config.max_concurrent_per_agent, 5);
        assert_eq!(config.listeners.len(), 1);
        assert!(config.listeners[0].agent);
        assert_eq!(config.listeners[0].peers, vec!["shouter".to_string()]);
    }

    #[test]
    fn rejects_duplicate_listener_names() {
        let yaml = r#"
organism:
  name: dup-test
listeners:
  - name: a
    payload_class: X
    handler: Y
    description: d
  - name: a
    payload_class: X
    handler: Y
    description: d
"#;
        let err = parse_organism(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organism.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.organism.name, "hello-organism");
    }
}
