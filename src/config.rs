//! Configuration: the environment variables spec.md §6 reads at
//! transport construction time, and the YAML configuration file that
//! describes a [`crate::server::Server`]'s transport and [`Plan`]s.
//!
//! Grounded in the `MULTIO_*` variable names actually read by the
//! original across `original_source/src/multio/transport/MpiTransport.cc`
//! (the MPI pool/buffer size variables), `original_source/src/sandbox/
//! Listener.cc` (`MULTIO_MESSAGE_QUEUE_SIZE`) and `original_source/src/
//! multio/server/MultioNemo.cc` (`MULTIO_SERVER_PATH`), plus
//! `original_source/src/multio/server/PlanConfigurations.h` (the
//! `plans: [...]` document shape the action factory below builds
//! from); there is no single `ConfigurationPath.h` in
//! `examples/original_source/` gathering these names.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::action::aggregation::Aggregation;
use crate::action::convert::Convert;
use crate::action::encode::Encode;
use crate::action::print::Print;
use crate::action::select::Select;
use crate::action::sink::{Sink, SinkTarget};
use crate::action::statistics::{ReduceKind, Statistics};
use crate::action::Action;
use crate::error::ConfigurationError;
use crate::message::{MetadataSelector, Precision};

/// Environment-variable driven defaults, read once at transport
/// construction (`TransportConfig::new`). Every reader falls back to
/// the documented default on an absent or unparseable variable rather
/// than failing startup — spec.md §6 treats these as tuning knobs, not
/// required configuration.
pub mod env {
    use std::env;

    fn read_usize(name: &str, default: usize) -> usize {
        env::var(name)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default)
    }

    /// `MULTIO_MPI_POOL_SIZE`, overridden by the role-specific
    /// `MULTIO_SERVER_MPI_POOL_SIZE` / `MULTIO_CLIENT_MPI_POOL_SIZE`.
    /// Default 128 buffers, matching the original's pool sizing.
    pub fn buffer_pool_size() -> usize {
        read_usize("MULTIO_MPI_POOL_SIZE", 128)
    }

    pub fn server_buffer_pool_size() -> usize {
        read_usize("MULTIO_SERVER_MPI_POOL_SIZE", buffer_pool_size())
    }

    pub fn client_buffer_pool_size() -> usize {
        read_usize("MULTIO_CLIENT_MPI_POOL_SIZE", buffer_pool_size())
    }

    /// `MULTIO_MPI_BUFFER_SIZE`, default 64MiB, overridden per role by
    /// `MULTIO_SERVER_MPI_BUFFER_SIZE` / `MULTIO_CLIENT_MPI_BUFFER_SIZE`.
    pub fn buffer_size() -> usize {
        read_usize("MULTIO_MPI_BUFFER_SIZE", 64 * 1024 * 1024)
    }

    pub fn server_buffer_size() -> usize {
        read_usize("MULTIO_SERVER_MPI_BUFFER_SIZE", buffer_size())
    }

    pub fn client_buffer_size() -> usize {
        read_usize("MULTIO_CLIENT_MPI_BUFFER_SIZE", buffer_size())
    }

    /// `MULTIO_MESSAGE_QUEUE_SIZE`, default 1024 (mirrors
    /// `Listener::MSG_QUEUE_DEPTH`'s own fallback).
    pub fn message_queue_size() -> usize {
        read_usize("MULTIO_MESSAGE_QUEUE_SIZE", 1024)
    }

    /// `MULTIO_SERVER_PATH`: directory a relative `config_path` in a
    /// `Configuration` is resolved against.
    pub fn server_path() -> Option<String> {
        env::var("MULTIO_SERVER_PATH").ok()
    }

    /// `MULTIO_SERVER_CONFIG_PATH`: full path to the YAML configuration
    /// file, when not passed explicitly to `Configuration::from_file`.
    pub fn server_config_path() -> Option<String> {
        env::var("MULTIO_SERVER_CONFIG_PATH").ok()
    }

    /// `MULTIO_DEBUG`: any non-empty value raises the default log
    /// filter to `debug`, read by `crate::logging::init`.
    pub fn debug_enabled() -> bool {
        env::var("MULTIO_DEBUG").map(|v| !v.is_empty()).unwrap_or(false)
    }
}

/// One TCP peer's address book entry (spec.md §6's `servers`/`clients`
/// lists for the `tcp` transport).
#[derive(Debug, Clone, Deserialize)]
pub struct TcpPeerConfig {
    pub host: String,
    pub ports: Vec<u16>,
}

/// The `server:` block of a configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub transport: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(rename = "client-group", alias = "client_group", default)]
    pub client_group: Option<String>,
    #[serde(rename = "server-group", alias = "server_group", default)]
    pub server_group: Option<String>,
    #[serde(default)]
    pub servers: Option<Vec<TcpPeerConfig>>,
    #[serde(default)]
    pub clients: Option<Vec<TcpPeerConfig>>,
}

/// One `plans:` entry: a name and its ordered action list, each
/// action still an untyped YAML value until [`build_actions`] compiles
/// it (action-specific fields vary per `type`).
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    pub name: String,
    pub actions: Vec<serde_yaml::Value>,
}

/// A fully parsed configuration file (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfiguration {
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
}

/// Owns a parsed configuration and knows how to build runtime objects
/// from it — the counterpart to the teacher's `BenchmarkConfig`.
pub struct Configuration {
    pub raw: RawConfiguration,
}

impl Configuration {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigurationError> {
        let raw: RawConfiguration = serde_yaml::from_str(text)?;
        if raw.plans.iter().any(|p| p.actions.is_empty()) {
            let offender = raw
                .plans
                .iter()
                .find(|p| p.actions.is_empty())
                .map(|p| p.name.clone())
                .unwrap_or_default();
            return Err(ConfigurationError::EmptyActionList(offender));
        }
        Ok(Self { raw })
    }

    /// Load from `path`, falling back to `MULTIO_SERVER_CONFIG_PATH`
    /// when `path` is `None` (spec.md §6).
    pub fn from_file(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let from_env = env::server_config_path().ok_or_else(|| {
                    ConfigurationError::MissingKey("MULTIO_SERVER_CONFIG_PATH".to_string())
                })?;
                Path::new(&from_env).to_path_buf()
            }
        };
        let text = fs::read_to_string(&resolved).map_err(|source| ConfigurationError::Io {
            path: resolved.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn transport_kind(&self) -> Result<&str, ConfigurationError> {
        self.raw
            .server
            .as_ref()
            .map(|s| s.transport.as_str())
            .ok_or_else(|| ConfigurationError::MissingKey("server.transport".to_string()))
    }

    /// Build every configured plan's action table.
    pub fn build_plans(&self) -> Result<Vec<(String, Vec<Action>)>, ConfigurationError> {
        self.raw
            .plans
            .iter()
            .map(|p| Ok((p.name.clone(), build_actions(&p.actions)?)))
            .collect()
    }
}

/// Build one plan's `Vec<Action>` from its YAML action list, in
/// configured (head-first) order, per spec.md §4.3.
pub fn build_actions(actions: &[serde_yaml::Value]) -> Result<Vec<Action>, ConfigurationError> {
    actions.iter().map(build_action).collect()
}

fn get_str<'a>(value: &'a serde_yaml::Value, key: &str, default: &'a str) -> &'a str {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

fn get_i64(value: &serde_yaml::Value, key: &str, default: i64) -> i64 {
    value.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

fn get_bool(value: &serde_yaml::Value, key: &str, default: bool) -> bool {
    value.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn build_action(cfg: &serde_yaml::Value) -> Result<Action, ConfigurationError> {
    let type_name = cfg
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ConfigurationError::MissingKey("type".to_string()))?;

    Ok(match type_name {
        "Select" => {
            let selector = MetadataSelector::from_value(cfg)?;
            Action::Select(Select::new(selector))
        }
        "Aggregation" => {
            let levels = get_i64(cfg, "levels", 1).max(1) as usize;
            let strict = get_bool(cfg, "strict", false);
            Action::Aggregation(Aggregation::new(levels, strict))
        }
        "Statistics" => {
            let kind = match get_str(cfg, "operation", "mean") {
                "mean" => ReduceKind::Mean,
                "min" => ReduceKind::Min,
                "max" => ReduceKind::Max,
                "accumulate" => ReduceKind::Accumulate,
                other => {
                    return Err(ConfigurationError::Parse(serde_yaml::Error::from(
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("unknown statistics operation \"{other}\""),
                        ),
                    )))
                }
            };
            let window = get_i64(cfg, "window", 1).max(1);
            Action::Statistics(Statistics::new(kind, window))
        }
        "Convert" => {
            let target = match get_str(cfg, "target", "double") {
                "single" => Precision::Single,
                "double" => Precision::Double,
                other => {
                    return Err(ConfigurationError::Parse(serde_yaml::Error::from(
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("unknown convert target precision \"{other}\""),
                        ),
                    )))
                }
            };
            Action::Convert(Convert::new(target))
        }
        "Encode" => Action::Encode(Encode::passthrough()),
        "Sink" => {
            let target = match cfg.get("path").and_then(|v| v.as_str()) {
                Some(path) => SinkTarget::File {
                    name: get_str(cfg, "name", "sink").to_string(),
                    path: std::path::PathBuf::from(path),
                },
                None => SinkTarget::Null,
            };
            Action::Sink(Sink::new(target))
        }
        "Print" => Action::Print(Print::new(get_str(cfg, "label", "print").to_string())),
        "Null" => Action::Null,
        other => return Err(ConfigurationError::UnknownActionType(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  transport: thread
plans:
  - name: main
    actions:
      - type: Select
        match: { category: [ocean] }
      - type: Aggregation
        levels: 2
      - type: Sink
        name: ocean-sink
"#;

    #[test]
    fn parses_server_and_plans() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.transport_kind().unwrap(), "thread");
        assert_eq!(config.raw.plans.len(), 1);
        assert_eq!(config.raw.plans[0].actions.len(), 3);
    }

    #[test]
    fn builds_action_table_in_order() {
        let config = Configuration::from_yaml(SAMPLE).unwrap();
        let plans = config.build_plans().unwrap();
        assert_eq!(plans.len(), 1);
        let (name, actions) = &plans[0];
        assert_eq!(name, "main");
        assert_eq!(
            actions.iter().map(Action::type_name).collect::<Vec<_>>(),
            vec!["Select", "Aggregation", "Sink"]
        );
    }

    #[test]
    fn empty_action_list_is_rejected() {
        let text = "server:\n  transport: thread\nplans:\n  - name: empty\n    actions: []\n";
        let err = Configuration::from_yaml(text).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyActionList(_)));
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        let text =
            "server:\n  transport: thread\nplans:\n  - name: bad\n    actions:\n      - type: Bogus\n";
        let config = Configuration::from_yaml(text).unwrap();
        let err = config.build_plans().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownActionType(_)));
    }
}
