use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;

use crate::codec::Codec;
use crate::node::{BackoffConfig, NodeOptions};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 2333;
const DEFAULT_PASSWORD: &str = "youshallnotpass";

/// One node entry, either from `LAVALINK_NODES` or the single-node keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
    pub region: Option<String>,
}

impl NodeConfig {
    /// Parses `label=ws[s]://:password@host:port?region=xx`.
    pub fn parse(entry: &str) -> Result<Self> {
        let (label, raw_url) = entry
            .trim()
            .split_once('=')
            .with_context(|| format!("node entry '{entry}' must look like label=ws://..."))?;

        let url = Url::parse(raw_url.trim())
            .with_context(|| format!("invalid URL for node '{label}'"))?;
        let secure = match url.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => anyhow::bail!("unsupported scheme '{other}' for node '{label}'"),
        };
        let host = url
            .host_str()
            .with_context(|| format!("node '{label}' has no host"))?
            .to_string();
        let region = url
            .query_pairs()
            .find(|(key, _)| key == "region")
            .map(|(_, value)| value.to_lowercase());

        Ok(Self {
            label: label.trim().to_string(),
            host,
            port: url.port_or_known_default().unwrap_or(DEFAULT_PORT),
            password: url.password().unwrap_or(DEFAULT_PASSWORD).to_string(),
            secure,
            region,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Identidad
    pub user_id: u64,

    // Nodos
    pub nodes: Vec<NodeConfig>,

    // Conexión
    pub connect_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub resume_timeout: Duration,
    pub codec: Codec,

    // Host
    pub ignore_host_check: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from an arbitrary key lookup. Missing keys fall back
    /// to [`Config::default`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let user_id = get("LAVALINK_USER_ID")
            .context("LAVALINK_USER_ID is required")?
            .trim()
            .parse()
            .context("LAVALINK_USER_ID must be a numeric id")?;

        let nodes = match get("LAVALINK_NODES") {
            Some(list) => list
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(NodeConfig::parse)
                .collect::<Result<Vec<_>>>()?,
            None => vec![NodeConfig {
                label: "main".to_string(),
                host: get("LAVALINK_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: match get("LAVALINK_PORT") {
                    Some(port) => port.trim().parse().context("LAVALINK_PORT must be a port")?,
                    None => DEFAULT_PORT,
                },
                password: get("LAVALINK_PASSWORD")
                    .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
                secure: false,
                region: get("LAVALINK_REGION").map(|region| region.to_lowercase()),
            }],
        };

        let duration = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => humantime::parse_duration(raw.trim())
                    .with_context(|| format!("{key} must be a duration such as '10s'")),
                None => Ok(default),
            }
        };

        Ok(Self {
            user_id,
            nodes,
            connect_timeout: duration("LAVALINK_CONNECT_TIMEOUT", defaults.connect_timeout)?,
            backoff_base: duration("LAVALINK_BACKOFF_BASE", defaults.backoff_base)?,
            backoff_max: duration("LAVALINK_BACKOFF_MAX", defaults.backoff_max)?,
            resume_timeout: match get("LAVALINK_RESUME_TIMEOUT") {
                Some(secs) => Duration::from_secs(
                    secs.trim()
                        .parse()
                        .context("LAVALINK_RESUME_TIMEOUT must be seconds")?,
                ),
                None => defaults.resume_timeout,
            },
            codec: match get("LAVALINK_CODEC") {
                Some(codec) => codec.parse()?,
                None => defaults.codec,
            },
            ignore_host_check: match get("LAVABRIDGE_IGNORE_HOST_CHECK") {
                Some(flag) => flag
                    .trim()
                    .parse()
                    .context("LAVABRIDGE_IGNORE_HOST_CHECK must be true or false")?,
                None => defaults.ignore_host_check,
            },
        })
    }

    /// Sanity checks that parsing alone cannot catch.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("At least one node must be configured");
        }

        let mut labels: Vec<_> = self.nodes.iter().map(|node| node.label.as_str()).collect();
        labels.sort_unstable();
        if let Some(pair) = labels.windows(2).find(|pair| pair[0] == pair[1]) {
            anyhow::bail!("Node label '{}' is used more than once", pair[0]);
        }
        if let Some(node) = self.nodes.iter().find(|node| node.label.is_empty()) {
            anyhow::bail!("Node at {}:{} has an empty label", node.host, node.port);
        }

        if self.connect_timeout.is_zero() {
            anyhow::bail!("Connect timeout must be greater than 0");
        }
        if self.backoff_base.is_zero() {
            anyhow::bail!("Backoff base must be greater than 0");
        }
        if self.backoff_max < self.backoff_base {
            anyhow::bail!(
                "Backoff max ({:?}) must not be below backoff base ({:?})",
                self.backoff_max,
                self.backoff_base
            );
        }

        Ok(())
    }

    pub fn node_options(&self) -> Vec<NodeOptions> {
        let backoff = BackoffConfig {
            base: self.backoff_base,
            max: self.backoff_max,
        };

        self.nodes
            .iter()
            .map(|node| {
                let mut options =
                    NodeOptions::new(&node.label, &node.host, node.port, &node.password)
                        .secure(node.secure)
                        .timeout(self.connect_timeout)
                        .resume_timeout(self.resume_timeout)
                        .backoff(backoff)
                        .codec(self.codec);
                if let Some(region) = &node.region {
                    options = options.region(region);
                }
                options
            })
            .collect()
    }

    /// Loggable summary, passwords left out.
    pub fn summary(&self) -> String {
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|node| {
                format!(
                    "{}={}://{}:{} ({})",
                    node.label,
                    if node.secure { "wss" } else { "ws" },
                    node.host,
                    node.port,
                    node.region.as_deref().unwrap_or("any region")
                )
            })
            .collect();

        format!(
            "Config Summary:\n  \
            User: {}\n  \
            Nodes: {}\n  \
            Connection: timeout {}, backoff {}..{}, resume {}s\n  \
            Codec: {}, host check: {}",
            self.user_id,
            nodes.join(", "),
            humantime::format_duration(self.connect_timeout),
            humantime::format_duration(self.backoff_base),
            humantime::format_duration(self.backoff_max),
            self.resume_timeout.as_secs(),
            self.codec.name(),
            if self.ignore_host_check { "skipped" } else { "on" }
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: 0,
            nodes: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            resume_timeout: Duration::from_secs(60),
            codec: Codec::Json,
            ignore_host_check: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn single_node_defaults() {
        let config = config(&[("LAVALINK_USER_ID", "1234")]).unwrap();
        assert_eq!(config.user_id, 1234);
        assert_eq!(
            config.nodes,
            vec![NodeConfig {
                label: "main".to_string(),
                host: "localhost".to_string(),
                port: 2333,
                password: "youshallnotpass".to_string(),
                secure: false,
                region: None,
            }]
        );
        assert_eq!(config.codec, Codec::Json);
        config.validate().unwrap();
    }

    #[test]
    fn user_id_is_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("LAVALINK_USER_ID", "bot")]).is_err());
    }

    #[test]
    fn parses_node_list() {
        let config = config(&[
            ("LAVALINK_USER_ID", "1"),
            (
                "LAVALINK_NODES",
                "us=ws://:secret@10.0.0.1:2333?region=US, eu=wss://:pw@lava.example:443?region=eu-west",
            ),
            ("LAVALINK_CONNECT_TIMEOUT", "5s"),
            ("LAVALINK_BACKOFF_MAX", "2m"),
            ("LAVALINK_RESUME_TIMEOUT", "120"),
        ])
        .unwrap();

        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].label, "us");
        assert_eq!(config.nodes[0].password, "secret");
        assert_eq!(config.nodes[0].region.as_deref(), Some("us"));
        assert!(!config.nodes[0].secure);
        assert_eq!(config.nodes[1].host, "lava.example");
        assert_eq!(config.nodes[1].port, 443);
        assert!(config.nodes[1].secure);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.backoff_max, Duration::from_secs(120));
        assert_eq!(config.resume_timeout, Duration::from_secs(120));

        let options = config.node_options();
        assert_eq!(options[1].region.as_deref(), Some("eu-west"));
        assert_eq!(options[1].timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(NodeConfig::parse("no-equals-sign").is_err());
        assert!(NodeConfig::parse("x=http//broken").is_err());
        assert!(NodeConfig::parse("x=ftp://host:21").is_err());
        assert!(config(&[("LAVALINK_USER_ID", "1"), ("LAVALINK_CODEC", "xml")]).is_err());
        assert!(config(&[("LAVALINK_USER_ID", "1"), ("LAVALINK_BACKOFF_BASE", "soon")]).is_err());
    }

    #[test]
    fn validate_catches_inconsistencies() {
        let duplicate = config(&[
            ("LAVALINK_USER_ID", "1"),
            ("LAVALINK_NODES", "a=ws://h1:1,a=ws://h2:2"),
        ])
        .unwrap();
        assert!(duplicate.validate().is_err());

        let inverted = config(&[
            ("LAVALINK_USER_ID", "1"),
            ("LAVALINK_BACKOFF_BASE", "30s"),
            ("LAVALINK_BACKOFF_MAX", "5s"),
        ])
        .unwrap();
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn summary_hides_passwords() {
        let config = config(&[
            ("LAVALINK_USER_ID", "1"),
            ("LAVALINK_PASSWORD", "hunter2"),
            ("LAVALINK_REGION", "eu"),
        ])
        .unwrap();
        let summary = config.summary();
        assert!(summary.contains("main=ws://localhost:2333 (eu)"));
        assert!(!summary.contains("hunter2"));
    }
}
