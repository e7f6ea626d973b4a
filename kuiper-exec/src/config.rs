//! Hosts file for kuiper-exec.

use std::path::Path;

use anyhow::{Context, Result};
use kuiper_exec_lib::Target;
use serde::{Deserialize, Deserializer};

/// Hosts file loaded from YAML.
///
/// ```yaml
/// hosts:
///   - web-1.example.com
///   - 10.0.0.12
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostsConfig {
    /// Host addresses, without port (22 is assumed)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hosts: Vec<String>,
}

/// Treat `hosts: ~` the same as an absent key.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl HostsConfig {
    /// Load the hosts file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hosts file {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse hosts file {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_str(content)?)
    }

    /// Hosts as dispatch targets, in file order.
    ///
    /// Blank entries are kept; they fail on their own when dispatched.
    pub fn targets(&self) -> Vec<Target> {
        self.hosts.iter().map(|h| Target::new(h.trim())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_hosts_in_order() {
        let yaml = r#"
hosts:
  - web-2.example.com
  - 10.0.0.12
  - web-1.example.com
"#;
        let config = HostsConfig::parse(yaml).expect("Failed to parse hosts");
        let targets: Vec<_> = config.targets().iter().map(|t| t.to_string()).collect();
        assert_eq!(
            targets,
            vec!["web-2.example.com", "10.0.0.12", "web-1.example.com"]
        );
    }

    #[test]
    fn test_missing_hosts_key_is_empty() {
        let config = HostsConfig::parse("other: value\n").unwrap();
        assert!(config.targets().is_empty());

        let config = HostsConfig::parse("\n").unwrap();
        assert!(config.targets().is_empty());
    }

    #[test]
    fn test_null_hosts_is_empty() {
        let config = HostsConfig::parse("hosts:\n").unwrap();
        assert!(config.targets().is_empty());

        let config = HostsConfig::parse("hosts: ~\n").unwrap();
        assert!(config.targets().is_empty());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        assert!(HostsConfig::parse("hosts: [web-1, web-2").is_err());
        assert!(HostsConfig::parse("hosts: web-1").is_err());
    }

    #[test]
    fn test_blank_host_kept_as_target() {
        let config = HostsConfig::parse("hosts:\n  - web-1\n  - ''\n  - ' web-2 '\n").unwrap();
        let targets: Vec<_> = config.targets().iter().map(|t| t.to_string()).collect();
        assert_eq!(targets, vec!["web-1", "", "web-2"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hosts:\n  - db-1\n  - db-2").unwrap();

        let config = HostsConfig::load(file.path()).unwrap();
        assert_eq!(config.hosts, vec!["db-1", "db-2"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HostsConfig::load(Path::new("/nonexistent/hosts.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read hosts file"));
    }
}
