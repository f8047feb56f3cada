//! Connection tables: `device → node → device → node → [Connection]`.
//!
//! A table stores every link twice, once per endpoint, so both devices see it
//! in their own row.  A bidirectional link is stored with metadata naming the
//! row it is stored under as its `from` endpoint.  A one-way link keeps its
//! declared orientation in both rows, so the far end can see it but never
//! traverse it backwards.

use std::collections::BTreeMap;

use super::{Connection, ConnectionError, EndpointRef};
use crate::domain::ids::DeviceId;

/// Connections towards one peer device, keyed by the peer's node name.
pub type PeerNodes = BTreeMap<String, Vec<Connection>>;
/// Connections leaving one node, keyed by peer device.
pub type PeerMap = BTreeMap<DeviceId, PeerNodes>;
/// One device row, keyed by the device's own node name.
pub type NodeMap = BTreeMap<String, PeerMap>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionTable {
    rows: BTreeMap<DeviceId, NodeMap>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, from: &EndpointRef, to: &EndpointRef, connection: Connection) {
        self.rows
            .entry(from.device)
            .or_default()
            .entry(from.node.clone())
            .or_default()
            .entry(to.device)
            .or_default()
            .entry(to.node.clone())
            .or_default()
            .push(connection);
    }

    /// Stores `connection` under both endpoints.
    ///
    /// The forward copy is anchored `from → to`.  The backward copy is its
    /// mirror, or an identical copy for a one-way link.
    pub fn insert_symmetric(&mut self, from: EndpointRef, to: EndpointRef, connection: &Connection) {
        let forward = connection.specialize_for(from.clone(), to.clone());
        let backward = peer_copy(&forward);
        self.push(&from, &to, forward);
        self.push(&to, &from, backward);
    }

    /// Replaces the connections of `from → to` and the matching entry stored
    /// under `to`.
    pub fn set_symmetric(&mut self, from: &EndpointRef, to: &EndpointRef, connections: Vec<Connection>) {
        let backward = connections.iter().map(peer_copy).collect();
        self.set(from, to, connections);
        self.set(to, from, backward);
    }

    /// Connections stored for the ordered endpoint pair.
    pub fn get(&self, from: &EndpointRef, to: &EndpointRef) -> &[Connection] {
        self.rows
            .get(&from.device)
            .and_then(|nodes| nodes.get(&from.node))
            .and_then(|peers| peers.get(&to.device))
            .and_then(|peer_nodes| peer_nodes.get(&to.node))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replaces the connections of one ordered endpoint pair.
    ///
    /// An empty list removes the entry together with any map left empty.
    pub fn set(&mut self, from: &EndpointRef, to: &EndpointRef, connections: Vec<Connection>) {
        if !connections.is_empty() {
            let slot = self
                .rows
                .entry(from.device)
                .or_default()
                .entry(from.node.clone())
                .or_default()
                .entry(to.device)
                .or_default()
                .entry(to.node.clone())
                .or_default();
            *slot = connections;
            return;
        }

        let Some(nodes) = self.rows.get_mut(&from.device) else {
            return;
        };
        if let Some(peers) = nodes.get_mut(&from.node) {
            if let Some(peer_nodes) = peers.get_mut(&to.device) {
                peer_nodes.remove(&to.node);
                if peer_nodes.is_empty() {
                    peers.remove(&to.device);
                }
            }
            if peers.is_empty() {
                nodes.remove(&from.node);
            }
        }
        if nodes.is_empty() {
            self.rows.remove(&from.device);
        }
    }

    pub fn row(&self, device: DeviceId) -> Option<&NodeMap> {
        self.rows.get(&device)
    }

    /// Returns `true` if `device` has at least one link.
    pub fn has_connections(&self, device: DeviceId) -> bool {
        self.rows.contains_key(&device)
    }

    /// Devices with at least one link, ascending.
    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.rows.keys().copied()
    }

    /// Node names of `device` that carry links, ascending.
    pub fn nodes(&self, device: DeviceId) -> Vec<&str> {
        self.rows
            .get(&device)
            .map(|nodes| nodes.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Every directed entry in ascending `(from, to)` order.
    pub fn entries(&self) -> impl Iterator<Item = (EndpointRef, EndpointRef, &[Connection])> + '_ {
        self.rows.iter().flat_map(|(device, nodes)| {
            nodes.iter().flat_map(move |(node, peers)| {
                peers.iter().flat_map(move |(peer, peer_nodes)| {
                    peer_nodes.iter().map(move |(peer_node, list)| {
                        (
                            EndpointRef::new(*device, node.clone()),
                            EndpointRef::new(*peer, peer_node.clone()),
                            list.as_slice(),
                        )
                    })
                })
            })
        })
    }

    /// Every connection leaving the given endpoint.
    pub fn outgoing(&self, from: &EndpointRef) -> impl Iterator<Item = &Connection> + '_ {
        self.rows
            .get(&from.device)
            .and_then(|nodes| nodes.get(&from.node))
            .into_iter()
            .flat_map(|peers| peers.values())
            .flat_map(|peer_nodes| peer_nodes.values())
            .flatten()
    }

    /// Every connection from any node of `a` to any node of `b`.
    pub fn between(&self, a: DeviceId, b: DeviceId) -> Vec<&Connection> {
        self.rows
            .get(&a)
            .into_iter()
            .flat_map(|nodes| nodes.values())
            .filter_map(|peers| peers.get(&b))
            .flat_map(|peer_nodes| peer_nodes.values())
            .flatten()
            .collect()
    }

    /// Ordered node pairs that link `a` to `b`.
    pub fn node_pairs(&self, a: DeviceId, b: DeviceId) -> Vec<(EndpointRef, EndpointRef)> {
        let Some(nodes) = self.rows.get(&a) else {
            return Vec::new();
        };
        nodes
            .iter()
            .filter_map(|(node, peers)| peers.get(&b).map(|peer_nodes| (node, peer_nodes)))
            .flat_map(|(node, peer_nodes)| {
                peer_nodes.keys().map(move |peer_node| {
                    (EndpointRef::new(a, node.clone()), EndpointRef::new(b, peer_node.clone()))
                })
            })
            .collect()
    }

    /// OR of everything linking `a` to `b`, without endpoint metadata.
    ///
    /// `None` when the devices are not linked.
    pub fn available_between(&self, a: DeviceId, b: DeviceId) -> Option<Connection> {
        let items: Vec<Connection> = self
            .between(a, b)
            .into_iter()
            .map(|c| c.clone().without_metadata())
            .collect();
        if items.is_empty() {
            return None;
        }
        Connection::based_on(items).ok()
    }

    /// Number of stored directed connections.
    pub fn len(&self) -> usize {
        self.entries().map(|(_, _, list)| list.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Expands every entry into its single alternatives.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::DuplicateConnection`] if one ordered endpoint pair
    /// holds more than one declared connection.
    pub fn expand_singles(&self) -> Result<ConnectionTable, ConnectionError> {
        let mut expanded = ConnectionTable::new();
        for (from, to, list) in self.entries() {
            if list.len() > 1 {
                return Err(ConnectionError::DuplicateConnection {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            let singles: Vec<Connection> = list.iter().flat_map(Connection::get_singles).collect();
            expanded.set(&from, &to, singles);
        }
        Ok(expanded)
    }

    /// Copy of this table with device ids translated through `rename`.
    ///
    /// Entries touching a device that `rename` maps to `None` are dropped.
    pub fn remapped<F>(&self, rename: F) -> ConnectionTable
    where
        F: Fn(DeviceId) -> Option<DeviceId>,
    {
        let mut out = ConnectionTable::new();
        for (from, to, list) in self.entries() {
            let (Some(new_from), Some(new_to)) = (rename(from.device), rename(to.device)) else {
                continue;
            };
            let moved = list
                .iter()
                .map(|c| match c.metadata() {
                    // Metadata may point the other way for one-way links.
                    Some(meta) if meta.from.device == to.device => c.specialize_for(
                        EndpointRef::new(new_to, meta.from.node.clone()),
                        EndpointRef::new(new_from, meta.to.node.clone()),
                    ),
                    _ => c.specialize_for(
                        EndpointRef::new(new_from, from.node.clone()),
                        EndpointRef::new(new_to, to.node.clone()),
                    ),
                })
                .collect();
            out.set(
                &EndpointRef::new(new_from, from.node),
                &EndpointRef::new(new_to, to.node),
                moved,
            );
        }
        out
    }
}

/// The copy of `forward` stored under its far endpoint.
fn peer_copy(forward: &Connection) -> Connection {
    match forward.metadata() {
        Some(meta) if !meta.bidirectional => forward.clone(),
        _ => forward.mirrored(),
    }
}
