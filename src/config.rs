//! Configuration: provider and workspace snapshots (read-only external
//! collaborator data) plus gateway-local settings.

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single provider's configuration, tagged by transport kind.
///
/// `namespace` is the routing key used by the namespace codec; it is
/// independent of the map key under which the provider is stored in the
/// providers snapshot (that key is an opaque provider id chosen by the
/// external config store).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Locally spawned subprocess speaking JSON-RPC over stdio
    Stdio {
        /// Namespace prefix for this provider's tools/prompts
        namespace: String,
        /// Spawn parameters
        #[serde(rename = "providerParameters")]
        provider_parameters: StdioParameters,
    },
    /// Remote provider speaking JSON-RPC over SSE
    Sse {
        /// Namespace prefix for this provider's tools/prompts
        namespace: String,
        /// Connection parameters
        #[serde(rename = "providerParameters")]
        provider_parameters: SseParameters,
    },
}

/// Parameters for spawning a stdio provider subprocess
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioParameters {
    /// Executable to spawn
    pub command: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overlay (merged on top of the inherited environment)
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Parameters for connecting to a remote SSE provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseParameters {
    /// SSE endpoint URL
    pub url: String,
}

impl ProviderConfig {
    /// The routing namespace of this provider.
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Stdio { namespace, .. } | Self::Sse { namespace, .. } => namespace,
        }
    }

    fn validate(&self) -> Result<()> {
        let ns = self.namespace();
        if ns.is_empty() {
            return Err(Error::Config("provider namespace must not be empty".into()));
        }
        if ns.contains('_') {
            return Err(Error::Config(format!(
                "provider namespace {ns:?} must not contain '_' (reserved as the namespace/name separator)"
            )));
        }
        Ok(())
    }
}

/// A named ordered list of provider namespaces.
pub type WorkspaceConfig = Vec<String>;

/// The providers snapshot: provider id → `ProviderConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersSnapshot(pub HashMap<String, ProviderConfig>);

impl ProvidersSnapshot {
    /// Load and validate a providers snapshot from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is missing, unparsable, or
    /// contains an invalid provider namespace.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "providers snapshot not found: {}",
                path.display()
            )));
        }
        let mut snapshot: Self = Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        for provider in snapshot.0.values_mut() {
            provider.validate()?;
            expand_stdio_env(provider);
        }

        Ok(snapshot)
    }

    /// Index providers by their routing namespace (last write wins on a
    /// duplicate namespace, consistent with a plain map merge).
    #[must_use]
    pub fn by_namespace(&self) -> HashMap<String, ProviderConfig> {
        self.0
            .values()
            .cloned()
            .map(|p| (p.namespace().to_string(), p))
            .collect()
    }
}

/// The workspaces snapshot: workspace name → ordered provider namespaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspacesSnapshot(pub HashMap<String, WorkspaceConfig>);

impl WorkspacesSnapshot {
    /// Load a workspaces snapshot from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is missing or unparsable.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "workspaces snapshot not found: {}",
                path.display()
            )));
        }
        Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Look up a workspace by name.
    #[must_use]
    pub fn get(&self, workspace: &str) -> Option<&WorkspaceConfig> {
        self.0.get(workspace)
    }
}

fn expand_stdio_env(provider: &mut ProviderConfig) {
    let re = env_pattern();
    if let ProviderConfig::Stdio {
        provider_parameters,
        ..
    } = provider
    {
        for value in provider_parameters.env.values_mut() {
            *value = expand_string(&re, value);
        }
    }
}

fn env_pattern() -> Regex {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("static regex is valid")
}

fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures<'_>| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Gateway-local settings: bind address, timeouts, debounce intervals.
/// Not part of the providers/workspaces snapshots — these are the
/// gateway's own operational knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Environment files to load before processing settings. Paths
    /// support `~` expansion; loaded in order, later files override
    /// earlier ones.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Host to bind the SSE bridge to
    pub bind_host: String,
    /// Port to bind the SSE bridge to
    pub bind_port: u16,
    /// Per-request timeout applied at the router boundary
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Overall deadline for a single provider scan
    #[serde(with = "humantime_serde")]
    pub scan_deadline: Duration,
    /// SSE heartbeat interval
    #[serde(with = "humantime_serde")]
    pub sse_keep_alive_interval: Duration,
    /// Debounce window for the reload supervisor
    #[serde(with = "humantime_serde")]
    pub reload_debounce: Duration,
    /// Budget for graceful shutdown before a resource is force-closed
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 39400,
            request_timeout: Duration::from_secs(60),
            scan_deadline: Duration::from_secs(10),
            sse_keep_alive_interval: Duration::from_secs(30),
            reload_debounce: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl GatewaySettings {
    /// Load settings from an optional YAML file, overlaid with
    /// `MCP_AGGREGATOR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is present but unparsable.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("settings file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_AGGREGATOR_").split("__"));

        let mut settings: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;
        settings.load_env_files();
        Ok(settings)
    }

    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if let Some(rest) = path_str.strip_prefix('~') {
                dirs::home_dir().map_or_else(|| path_str.clone(), |home| format!("{}{rest}", home.display()))
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!(path = %expanded, "loaded env file"),
                    Err(e) => tracing::warn!(path = %expanded, error = %e, "failed to load env file"),
                }
            } else {
                tracing::debug!(path = %expanded, "env file not found, skipped");
            }
        }
    }
}

/// Custom humantime serde module for `Duration`, matching the `30s` /
/// `5m` / `100ms` shape used throughout the snapshot and settings files.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize a `Duration` as a human-readable string (e.g. `"30s"`).
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize a human-readable duration string (`"30s"`, `"5m"`, `"100ms"`).
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Some(secs) = s.strip_suffix("ms") {
            secs.parse::<u64>().map(Duration::from_millis).map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stdio_provider_parses_from_yaml() {
        let yaml = r#"
echo:
  type: stdio
  namespace: echo
  providerParameters:
    command: echo-mcp
    args: ["--quiet"]
    env:
      API_KEY: "literal"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.yaml");
        std::fs::File::create(&path).unwrap().write_all(yaml.as_bytes()).unwrap();

        let snapshot = ProvidersSnapshot::load(&path).unwrap();
        let provider = &snapshot.0["echo"];
        assert_eq!(provider.namespace(), "echo");
        match provider {
            ProviderConfig::Stdio { provider_parameters, .. } => {
                assert_eq!(provider_parameters.command, "echo-mcp");
                assert_eq!(provider_parameters.env["API_KEY"], "literal");
            }
            ProviderConfig::Sse { .. } => panic!("expected stdio"),
        }
    }

    #[test]
    fn sse_provider_parses_from_yaml() {
        let yaml = r#"
remote_search:
  type: sse
  namespace: search
  providerParameters:
    url: "https://search.example.com/sse"
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.yaml");
        std::fs::File::create(&path).unwrap().write_all(yaml.as_bytes()).unwrap();

        let snapshot = ProvidersSnapshot::load(&path).unwrap();
        let provider = &snapshot.0["remote_search"];
        assert_eq!(provider.namespace(), "search");
    }

    #[test]
    fn namespace_containing_underscore_is_rejected() {
        let yaml = r#"
bad:
  type: stdio
  namespace: "has_underscore"
  providerParameters:
    command: x
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.yaml");
        std::fs::File::create(&path).unwrap().write_all(yaml.as_bytes()).unwrap();

        assert!(ProvidersSnapshot::load(&path).is_err());
    }

    #[test]
    fn env_var_expansion_with_default() {
        let re = env_pattern();
        // SAFETY-irrelevant: tests run single-threaded per-process env var is fine here.
        assert_eq!(expand_string(&re, "${MCP_GW_TEST_UNSET:-fallback}"), "fallback");
    }

    #[test]
    fn by_namespace_indexes_on_namespace_not_provider_id() {
        let mut map = HashMap::new();
        map.insert(
            "remote_search".to_string(),
            ProviderConfig::Sse {
                namespace: "search".to_string(),
                provider_parameters: SseParameters {
                    url: "https://example.com".to_string(),
                },
            },
        );
        let snapshot = ProvidersSnapshot(map);
        let by_ns = snapshot.by_namespace();
        assert!(by_ns.contains_key("search"));
        assert!(!by_ns.contains_key("remote_search"));
    }

    #[test]
    fn workspaces_snapshot_loads_ordered_namespace_list() {
        let yaml = "w1:\n  - echo\n  - search\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspaces.yaml");
        std::fs::File::create(&path).unwrap().write_all(yaml.as_bytes()).unwrap();

        let snapshot = WorkspacesSnapshot::load(&path).unwrap();
        assert_eq!(snapshot.get("w1").unwrap(), &vec!["echo".to_string(), "search".to_string()]);
        assert!(snapshot.get("missing").is_none());
    }
}
