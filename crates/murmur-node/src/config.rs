//! Node configuration.
//!
//! Configuration for a murmur node, including:
//! - Which workload the node serves (`read` means different things per workload)
//! - Gossip fan-out and anti-entropy settings
//! - Counter convergence strategy and the key-value service it talks to
//! - RPC timeout

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Workload served by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Workload {
    /// Gossip broadcast: `broadcast`, `read`, `topology`.
    #[default]
    Broadcast,
    /// Grow-only counter: `add`, `read`.
    Counter,
}

/// Which peers receive a newly seen value and take part in anti-entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FanoutStrategy {
    /// Direct neighbours from the topology table.
    #[default]
    Neighbors,
    /// Every other node in the cluster.
    Cluster,
}

/// How a node reconciles its value set with a peer on each anti-entropy tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStrategy {
    /// Read the peer's values and send only what it lacks.
    #[default]
    PullDiff,
    /// Send every local value; the peer deduplicates.
    PushAll,
}

/// How the counter produces a global total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CounterStrategy {
    /// Local accumulator published to the store, summed on read.
    Aggregate,
    /// Per-node value updated in the store by compare-and-swap.
    #[default]
    Cas,
}

/// Gossip settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GossipConfig {
    /// Fan-out target selection.
    pub fanout: FanoutStrategy,
    /// Anti-entropy reconciliation strategy.
    pub reconcile: ReconcileStrategy,
    /// Interval between anti-entropy rounds in milliseconds.
    pub anti_entropy_interval_ms: u64,
    /// Whether new values are pushed to peers as soon as they are seen.
    pub immediate_fanout: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: FanoutStrategy::default(),
            reconcile: ReconcileStrategy::default(),
            anti_entropy_interval_ms: 1000,
            immediate_fanout: true,
        }
    }
}

impl GossipConfig {
    /// Interval between anti-entropy rounds.
    #[must_use]
    pub const fn anti_entropy_interval(&self) -> Duration {
        Duration::from_millis(self.anti_entropy_interval_ms)
    }

    /// Sets the fan-out strategy.
    #[must_use]
    pub const fn with_fanout(mut self, fanout: FanoutStrategy) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the reconciliation strategy.
    #[must_use]
    pub const fn with_reconcile(mut self, reconcile: ReconcileStrategy) -> Self {
        self.reconcile = reconcile;
        self
    }

    /// Sets the anti-entropy interval.
    #[must_use]
    pub const fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.anti_entropy_interval_ms = interval_ms;
        self
    }

    /// Enables or disables immediate fan-out.
    #[must_use]
    pub const fn with_immediate_fanout(mut self, enabled: bool) -> Self {
        self.immediate_fanout = enabled;
        self
    }
}

/// Counter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CounterConfig {
    /// Convergence strategy.
    pub strategy: CounterStrategy,
    /// Name of the key-value service node.
    pub kv_service: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            strategy: CounterStrategy::default(),
            kv_service: "seq-kv".to_string(),
        }
    }
}

/// Main node configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Workload to serve.
    pub workload: Workload,
    /// Gossip configuration.
    pub gossip: GossipConfig,
    /// Counter configuration.
    pub counter: CounterConfig,
    /// Timeout for request/response RPCs in milliseconds.
    pub rpc_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            workload: Workload::default(),
            gossip: GossipConfig::default(),
            counter: CounterConfig::default(),
            rpc_timeout_ms: 1000,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(content: &str) -> Result<Self, NodeError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| NodeError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Timeout for request/response RPCs.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.gossip.anti_entropy_interval_ms == 0 {
            return Err(NodeError::Config(
                "gossip.anti_entropy_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.rpc_timeout_ms == 0 {
            return Err(NodeError::Config(
                "rpc_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.counter.kv_service.trim().is_empty() {
            return Err(NodeError::Config(
                "counter.kv_service cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.workload, Workload::Broadcast);
        assert_eq!(config.gossip.fanout, FanoutStrategy::Neighbors);
        assert_eq!(config.gossip.reconcile, ReconcileStrategy::PullDiff);
        assert_eq!(config.gossip.anti_entropy_interval(), Duration::from_secs(1));
        assert!(config.gossip.immediate_fanout);
        assert_eq!(config.counter.strategy, CounterStrategy::Cas);
        assert_eq!(config.counter.kv_service, "seq-kv");
        assert_eq!(config.rpc_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_object_applies_defaults() {
        let config = NodeConfig::from_json("{}").expect("should parse empty config");
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let json = r#"{
            "workload": "counter",
            "gossip": { "reconcile": "push-all" },
            "counter": { "strategy": "aggregate", "kv_service": "lin-kv" }
        }"#;

        let config = NodeConfig::from_json(json).expect("should parse partial config");
        assert_eq!(config.workload, Workload::Counter);
        assert_eq!(config.gossip.reconcile, ReconcileStrategy::PushAll);
        assert_eq!(config.gossip.fanout, FanoutStrategy::Neighbors);
        assert_eq!(config.gossip.anti_entropy_interval_ms, 1000);
        assert_eq!(config.counter.strategy, CounterStrategy::Aggregate);
        assert_eq!(config.counter.kv_service, "lin-kv");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "workload": "broadcast",
            "gossip": {
                "fanout": "cluster",
                "reconcile": "pull-diff",
                "anti_entropy_interval_ms": 250,
                "immediate_fanout": false
            },
            "rpc_timeout_ms": 500
        }"#;

        let config = NodeConfig::from_json(json).expect("should parse full config");
        assert_eq!(config.gossip.fanout, FanoutStrategy::Cluster);
        assert_eq!(config.gossip.anti_entropy_interval(), Duration::from_millis(250));
        assert!(!config.gossip.immediate_fanout);
        assert_eq!(config.rpc_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let result = NodeConfig::from_json("{ not json");
        assert!(matches!(result, Err(NodeError::Config(msg)) if msg.contains("invalid JSON")));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = NodeConfig::from_json(r#"{"gossip": {"fanout": "random"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = NodeConfig::from_json(r#"{"gossip": {"anti_entropy_interval_ms": 0}}"#);
        assert!(
            matches!(result, Err(NodeError::Config(msg)) if msg.contains("anti_entropy_interval_ms"))
        );
    }

    #[test]
    fn test_zero_rpc_timeout_rejected() {
        let config = NodeConfig {
            rpc_timeout_ms: 0,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_kv_service_rejected() {
        let mut config = NodeConfig::default();
        config.counter.kv_service = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let file = create_temp_config(r#"{"workload": "counter"}"#);
        let config = NodeConfig::from_file(file.path()).expect("should load config file");
        assert_eq!(config.workload, Workload::Counter);
    }

    #[test]
    fn test_from_missing_file() {
        let result = NodeConfig::from_file("/nonexistent/murmur.json");
        assert!(
            matches!(result, Err(NodeError::Config(msg)) if msg.contains("failed to read config file"))
        );
    }

    #[test]
    fn test_gossip_builders() {
        let gossip = GossipConfig::default()
            .with_fanout(FanoutStrategy::Cluster)
            .with_reconcile(ReconcileStrategy::PushAll)
            .with_interval_ms(50)
            .with_immediate_fanout(false);
        assert_eq!(gossip.fanout, FanoutStrategy::Cluster);
        assert_eq!(gossip.reconcile, ReconcileStrategy::PushAll);
        assert_eq!(gossip.anti_entropy_interval_ms, 50);
        assert!(!gossip.immediate_fanout);
    }
}
