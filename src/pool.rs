//! Registry of nodes and balancing between them.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use tracing::{debug, info, warn};

use crate::node::{Node, NodeOptions, SessionHandle};
use crate::{Error, Result};

static REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+(?:-[a-z]+)*)").expect("region pattern is valid"));

/// Extracts the region code from a voice endpoint such as
/// `us-east1234.discord.media:443`.
pub fn endpoint_region(endpoint: &str) -> Option<String> {
    let host = endpoint
        .trim_start_matches("wss://")
        .trim_start_matches("https://")
        .to_lowercase();
    REGION
        .captures(&host)
        .and_then(|captures| captures.get(1))
        .map(|region| region.as_str().to_string())
}

struct Registered {
    node: Arc<Node>,
    // Registration order, used to break load ties.
    order: u64,
}

struct PoolInner {
    user_id: u64,
    nodes: DashMap<String, Registered>,
    assignments: DashMap<u64, String>,
    next_order: AtomicU64,
}

/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct NodePool {
    inner: Arc<PoolInner>,
}

impl NodePool {
    pub fn new(user_id: u64) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                user_id,
                nodes: DashMap::new(),
                assignments: DashMap::new(),
                next_order: AtomicU64::new(0),
            }),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.inner.user_id
    }

    pub fn register(&self, node: Arc<Node>) -> Result<()> {
        let label = node.label().to_string();
        match self.inner.nodes.entry(label.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateNode(label)),
            Entry::Vacant(slot) => {
                let order = self.inner.next_order.fetch_add(1, Ordering::Relaxed);
                slot.insert(Registered { node, order });
                debug!(node = %label, "node registered");
                Ok(())
            }
        }
    }

    /// Builds a node, registers it and connects it. A node that fails to
    /// connect is removed again.
    pub async fn create_node(&self, options: NodeOptions) -> Result<Arc<Node>> {
        let node = Node::new(options, self.inner.user_id)?;
        self.register(Arc::clone(&node))?;

        if let Err(e) = node.connect().await {
            warn!("❌ Node {} failed to connect: {}", node.label(), e);
            self.unregister(node.label()).await;
            return Err(e);
        }

        info!("🎼 Node {} added to the pool", node.label());
        Ok(node)
    }

    /// Removes and closes a node. Players assigned to it pick a new node on
    /// their next voice server update.
    pub async fn unregister(&self, label: &str) -> Option<Arc<Node>> {
        let (_, registered) = self.inner.nodes.remove(label)?;
        self.inner.assignments.retain(|_, assigned| assigned.as_str() != label);
        for player in registered.node.take_players() {
            player.detach();
        }
        registered.node.close().await;
        info!("👋 Node {} removed from the pool", label);
        Some(registered.node)
    }

    pub fn get(&self, label: &str) -> Option<Arc<Node>> {
        self.inner
            .nodes
            .get(label)
            .map(|registered| Arc::clone(&registered.node))
    }

    /// All nodes, in registration order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes = self.ranked(|_| true);
        nodes.sort_by_key(|(_, order, _)| *order);
        nodes.into_iter().map(|(_, _, node)| node).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    /// Picks the least loaded connected node for a voice endpoint.
    ///
    /// Nodes serving the endpoint's region are preferred; if none is
    /// connected, any connected node will do.
    pub fn select_node(&self, endpoint: &str) -> Result<Arc<Node>> {
        let candidates = self.ranked(|node| node.is_connected());
        if candidates.is_empty() {
            return Err(Error::NoNodesAvailable);
        }

        let region = endpoint_region(endpoint);
        let regional = region.as_deref().and_then(|region| {
            candidates
                .iter()
                .find(|(_, _, node)| node.serves_region(region))
        });

        let (load, _, node) = match regional {
            Some(best) => best,
            None => {
                if let Some(region) = &region {
                    debug!(region = %region, "no node for region, using best overall");
                }
                &candidates[0]
            }
        };
        debug!(node = %node.label(), load, endpoint, "node selected");
        Ok(Arc::clone(node))
    }

    pub fn select_random_node(&self) -> Result<Arc<Node>> {
        let candidates = self.ranked(|node| node.is_connected());
        candidates
            .choose(&mut rand::thread_rng())
            .map(|(_, _, node)| Arc::clone(node))
            .ok_or(Error::NoNodesAvailable)
    }

    /// `(load, order, node)` sorted ascending.
    fn ranked(&self, keep: impl Fn(&Node) -> bool) -> Vec<(u64, u64, Arc<Node>)> {
        let mut ranked: Vec<_> = self
            .inner
            .nodes
            .iter()
            .filter(|entry| keep(&entry.node))
            .map(|entry| (entry.node.load(), entry.order, Arc::clone(&entry.node)))
            .collect();
        ranked.sort_by_key(|(load, order, _)| (*load, *order));
        ranked
    }

    /// Records that `guild_id` is served by `node`, moving it off any
    /// previous node.
    pub(crate) fn assign(&self, guild_id: u64, node: &Arc<Node>, handle: Weak<dyn SessionHandle>) {
        let previous = self
            .inner
            .assignments
            .insert(guild_id, node.label().to_string());

        if let Some(previous) = previous.filter(|previous| previous != node.label()) {
            if let Some(old) = self.get(&previous) {
                old.unregister_player(guild_id);
            }
        }
        node.register_player(guild_id, handle);
    }

    /// The node serving `guild_id`. An assignment left behind by a player
    /// dropped without `destroy` is cleared here.
    pub fn assignment(&self, guild_id: u64) -> Option<Arc<Node>> {
        let label = self.inner.assignments.get(&guild_id)?.clone();
        let node = self.get(&label)?;
        if node.has_dropped_player(guild_id) {
            debug!(node = %label, guild = guild_id, "releasing dropped player");
            self.release(guild_id);
            return None;
        }
        Some(node)
    }

    pub(crate) fn release(&self, guild_id: u64) -> Option<Arc<Node>> {
        let (_, label) = self.inner.assignments.remove(&guild_id)?;
        let node = self.get(&label)?;
        node.unregister_player(guild_id);
        Some(node)
    }

    pub async fn close_all(&self) {
        for node in self.nodes() {
            node.close().await;
        }
    }
}
