// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_NAME: &str = "rowcache";
const DEFAULT_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);
const DEFAULT_NOT_FOUND_EXPIRY: Duration = Duration::from_secs(60);
const DEFAULT_EXPIRY_DEVIATION: f64 = 0.05;

/// A single cache store node.
///
/// Keys are distributed across nodes in proportion to their weights. A node with
/// weight zero receives no keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Identifies the node, for example a host address.
    pub name: String,
    /// Relative share of the key space, where 100 is the nominal weight.
    #[serde(default = "NodeConfig::default_weight")]
    pub weight: u32,
}

impl NodeConfig {
    /// Creates a node with the nominal weight of 100.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: Self::default_weight(),
        }
    }

    /// Sets the weight of this node.
    #[must_use]
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    const fn default_weight() -> u32 {
        100
    }
}

/// Configuration of the cache-aside layer.
///
/// Durations are written as seconds, with fractions allowed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rowcache::{CacheConfig, NodeConfig};
///
/// let config = CacheConfig::new()
///     .node(NodeConfig::new("cache-a"))
///     .node(NodeConfig::new("cache-b").weight(50))
///     .expiry(Duration::from_secs(3600));
///
/// assert!(config.is_enabled());
/// assert_eq!(config.total_weight(), 150);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Label used in logs and stats.
    pub name: String,
    /// The store nodes. Empty disables caching.
    pub nodes: Vec<NodeConfig>,
    /// Base TTL of cached rows and index entries.
    #[serde(with = "secs_f64")]
    pub expiry: Duration,
    /// TTL of not-found placeholders. Zero disables negative caching.
    #[serde(with = "secs_f64")]
    pub not_found_expiry: Duration,
    /// Fraction by which TTLs are randomly spread around their base value.
    pub expiry_deviation: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            nodes: Vec::new(),
            expiry: DEFAULT_EXPIRY,
            not_found_expiry: DEFAULT_NOT_FOUND_EXPIRY,
            expiry_deviation: DEFAULT_EXPIRY_DEVIATION,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values and no nodes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a single-node configuration.
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self::new().node(NodeConfig::new(name))
    }

    /// Sets the label used in logs and stats.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a store node.
    #[must_use]
    pub fn node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Sets the base TTL.
    #[must_use]
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Sets the placeholder TTL. Zero disables negative caching.
    #[must_use]
    pub fn not_found_expiry(mut self, expiry: Duration) -> Self {
        self.not_found_expiry = expiry;
        self
    }

    /// Sets the TTL deviation fraction.
    #[must_use]
    pub fn expiry_deviation(mut self, deviation: f64) -> Self {
        self.expiry_deviation = deviation;
        self
    }

    /// Returns the sum of all node weights.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.nodes.iter().map(|node| u64::from(node.weight)).sum()
    }

    /// Returns true if this configuration enables caching.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.total_weight() > 0
    }

    /// The deviation clamped to `[0, 1]`, with non-finite values treated as zero.
    pub(crate) fn clamped_deviation(&self) -> f64 {
        if self.expiry_deviation.is_finite() {
            self.expiry_deviation.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

mod secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.name, "rowcache");
        assert!(config.nodes.is_empty());
        assert_eq!(config.expiry, Duration::from_secs(604_800));
        assert_eq!(config.not_found_expiry, Duration::from_secs(60));
        assert!((config.expiry_deviation - 0.05).abs() < f64::EPSILON);
        assert!(!config.is_enabled());
    }

    #[test]
    fn zero_weight_nodes_do_not_enable_caching() {
        let config = CacheConfig::new().node(NodeConfig::new("a").weight(0));
        assert_eq!(config.total_weight(), 0);
        assert!(!config.is_enabled());
    }

    #[test]
    fn single_node_is_enabled() {
        let config = CacheConfig::single("local");
        assert_eq!(config.nodes, vec![NodeConfig::new("local")]);
        assert!(config.is_enabled());
    }

    #[test]
    fn deviation_is_clamped() {
        assert!((CacheConfig::new().expiry_deviation(2.5).clamped_deviation() - 1.0).abs() < f64::EPSILON);
        assert!(CacheConfig::new().expiry_deviation(-1.0).clamped_deviation().abs() < f64::EPSILON);
        assert!(CacheConfig::new().expiry_deviation(f64::NAN).clamped_deviation().abs() < f64::EPSILON);
    }

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "name": "users",
                "nodes": [{ "name": "a" }, { "name": "b", "weight": 40 }],
                "expiry": 1.5
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "users");
        assert_eq!(config.nodes[0].weight, 100);
        assert_eq!(config.nodes[1].weight, 40);
        assert_eq!(config.expiry, Duration::from_millis(1500));
        assert_eq!(config.not_found_expiry, Duration::from_secs(60));
    }

    #[test]
    fn serializes_durations_as_seconds() {
        let config = CacheConfig::new().expiry(Duration::from_secs(30)).not_found_expiry(Duration::ZERO);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["expiry"], serde_json::json!(30.0));
        assert_eq!(value["not_found_expiry"], serde_json::json!(0.0));

        let back: CacheConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn rejects_negative_durations_and_unknown_fields() {
        assert!(serde_json::from_str::<CacheConfig>(r#"{ "expiry": -1.0 }"#).is_err());
        assert!(serde_json::from_str::<CacheConfig>(r#"{ "ttl": 5 }"#).is_err());
    }
}
