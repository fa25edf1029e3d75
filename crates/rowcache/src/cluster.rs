// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Weighted sharding of keys across cache store nodes.

use std::{fmt, time::Duration};

use bytes::Bytes;
use ohno::EnrichableExt as _;
use rowcache_tier::{CacheStore, Error};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::NodeConfig;

/// Virtual points placed on the ring for a node of nominal weight.
pub(crate) const REPLICAS: u64 = 100;

/// A set of weighted [`CacheStore`] nodes presented as a single store.
///
/// Each key is routed to one node through a consistent-hash ring, so adding or removing
/// a node only remaps the keys owned by that node. A node receives roughly
/// `weight / total_weight` of the key space; nodes with weight zero receive none.
///
/// # Examples
///
/// ```
/// use rowcache::{Cluster, NodeConfig};
/// use rowcache_tier::testing::MockStore;
///
/// let cluster = Cluster::new(vec![
///     (NodeConfig::new("a"), MockStore::new()),
///     (NodeConfig::new("b").weight(200), MockStore::new()),
/// ]);
///
/// assert_eq!(cluster.len(), 2);
/// let owner = cluster.node_for("row:42").unwrap();
/// assert!(owner == "a" || owner == "b");
/// ```
pub struct Cluster<S> {
    nodes: Vec<(NodeConfig, S)>,
    ring: Vec<(u64, usize)>,
}

impl<S> fmt::Debug for Cluster<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.nodes.iter().map(|(node, _)| node).collect::<Vec<_>>())
            .field("points", &self.ring.len())
            .finish()
    }
}

impl<S> Cluster<S> {
    /// Builds a cluster from nodes and their stores. Nodes with weight zero are skipped.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = (NodeConfig, S)>) -> Self {
        let nodes: Vec<_> = nodes.into_iter().filter(|(node, _)| node.weight > 0).collect();

        let mut ring = Vec::new();
        for (index, (node, _)) in nodes.iter().enumerate() {
            let points = (REPLICAS * u64::from(node.weight) / 100).max(1);
            for point in 0..points {
                ring.push((xxh3_64(format!("{}#{point}", node.name).as_bytes()), index));
            }
        }
        ring.sort_unstable();

        Self { nodes, ring }
    }

    /// Returns the number of nodes receiving keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node receives keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the name of the node owning `key`.
    #[must_use]
    pub fn node_for(&self, key: &str) -> Option<&str> {
        self.route(key).map(|index| self.nodes[index].0.name.as_str())
    }

    /// Returns the store owning `key`.
    #[must_use]
    pub fn store_for(&self, key: &str) -> Option<&S> {
        self.route(key).map(|index| &self.nodes[index].1)
    }

    fn route(&self, key: &str) -> Option<usize> {
        match self.nodes.len() {
            0 => None,
            1 => Some(0),
            _ => {
                let hash = xxh3_64(key.as_bytes());
                let position = self.ring.partition_point(|(point, _)| *point < hash);
                self.ring.get(position).or_else(|| self.ring.first()).map(|(_, index)| *index)
            }
        }
    }

    fn owner(&self, key: &str) -> Result<(&str, &S), Error> {
        self.route(key)
            .map(|index| (self.nodes[index].0.name.as_str(), &self.nodes[index].1))
            .ok_or_else(|| Error::unrouted(key))
    }
}

fn on_node(node: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |error| error.enrich_with(|| format!("cache node {node}"))
}

impl<S> CacheStore for Cluster<S>
where
    S: CacheStore,
{
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let (node, store) = self.owner(key)?;
        store.get(key).await.map_err(on_node(node))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), Error> {
        let (node, store) = self.owner(key)?;
        store.set(key, value).await.map_err(on_node(node))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        let (node, store) = self.owner(key)?;
        store.set_with_ttl(key, value, ttl).await.map_err(on_node(node))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), Error> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut groups: Vec<Vec<String>> = vec![Vec::new(); self.nodes.len()];
        for key in keys {
            if let Some(index) = self.route(key) {
                groups[index].push(key.clone());
            }
        }

        let mut first_error = None;
        for (index, group) in groups.iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            let (config, store) = &self.nodes[index];
            if let Err(error) = store.delete(group).await {
                first_error.get_or_insert_with(|| on_node(&config.name)(error));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
