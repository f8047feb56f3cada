//! Routing of scenario connections through a setup's wiring.
//!
//! A scenario may ask for `A ↔ C` while the setup only has `A ↔ B ↔ C`.  A
//! [`RoutingPath`] is a chain of setup links where each link starts at the
//! endpoint the previous one ended on.  Its *virtual connection* is the
//! running intersection of everything traversed: the guarantee the whole
//! chain can still give.
//!
//! [`route_through`] searches breadth-first.  Each round extends every open
//! path by every outgoing link of its end endpoint, then:
//!
//! - drops paths that visit a `(device, node)` endpoint twice,
//! - drops paths whose virtual connection no longer satisfies the requirement,
//! - completes paths that reached the target device.
//!
//! The search ends when no open path is left.  A one-way link is only ever
//! traversed in its declared direction.

use thiserror::Error;
use tracing::debug;

use testbed_core::{Connection, ConnectionError, ConnectionMetadata, ConnectionTable, DeviceId, EndpointRef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The appended link does not start where the path ends.
    #[error("chain break: path ends at {path_end} but the link starts at {link_start}")]
    ChainBreak { path_end: String, link_start: String },

    /// Links without endpoint metadata cannot be chained.
    #[error("link `{link}` is not anchored to any endpoint")]
    Unanchored { link: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

// ── RoutingPath ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoutingPath {
    start: EndpointRef,
    /// Links in traversal order, each oriented from its start to its end.
    links: Vec<Connection>,
    /// Running intersection, without metadata.  `None` while empty.
    virtual_connection: Option<Connection>,
}

impl RoutingPath {
    pub fn new(start: EndpointRef) -> Self {
        Self {
            start,
            links: Vec::new(),
            virtual_connection: None,
        }
    }

    pub fn start(&self) -> &EndpointRef {
        &self.start
    }

    /// Endpoint the next link must start at.
    pub fn end(&self) -> &EndpointRef {
        self.links
            .last()
            .and_then(Connection::metadata)
            .map_or(&self.start, |m| &m.to)
    }

    pub fn links(&self) -> &[Connection] {
        &self.links
    }

    pub fn virtual_connection(&self) -> Option<&Connection> {
        self.virtual_connection.as_ref()
    }

    /// Appends `link`, turning a bidirectional link around if it was stored
    /// from the other side.
    ///
    /// # Errors
    ///
    /// [`RouteError::ChainBreak`] if neither end of the link is the path's
    /// current end, [`RouteError::Unanchored`] if the link has no metadata.
    pub fn append(&mut self, link: &Connection) -> Result<(), RouteError> {
        let Some(meta) = link.metadata() else {
            return Err(RouteError::Unanchored {
                link: link.to_string(),
            });
        };
        let end = self.end().clone();
        let oriented = if meta.from == end {
            link.clone()
        } else if meta.bidirectional && meta.to == end {
            link.mirrored()
        } else {
            return Err(RouteError::ChainBreak {
                path_end: end.to_string(),
                link_start: meta.from.to_string(),
            });
        };

        let stripped = oriented.clone().without_metadata();
        self.virtual_connection = Some(match &self.virtual_connection {
            Some(current) => current.intersection(&stripped)?,
            None => stripped,
        });
        self.links.push(oriented);
        Ok(())
    }

    /// Returns `true` if some `(device, node)` endpoint occurs twice.
    pub fn has_loop(&self) -> bool {
        let mut seen = vec![&self.start];
        for link in &self.links {
            let Some(meta) = link.metadata() else {
                continue;
            };
            if seen.contains(&&meta.to) {
                return true;
            }
            seen.push(&meta.to);
        }
        false
    }

    /// Returns `true` if every traversed link works in both directions.
    pub fn is_bidirectional(&self) -> bool {
        self.links
            .iter()
            .all(|l| l.metadata().map_or(true, |m| m.bidirectional))
    }

    /// Returns `true` if the virtual connection still satisfies `requirement`.
    pub fn satisfies(&self, requirement: &Connection) -> bool {
        self.virtual_connection
            .as_ref()
            .is_some_and(|v| v.satisfies(requirement))
    }

    /// The alternatives of `requirement` this path can deliver, anchored at
    /// the path's start and end.  `None` if there are none.
    pub fn resolved_connection(&self, requirement: &Connection) -> Option<Connection> {
        let virtual_connection = self.virtual_connection.as_ref()?;
        let offered = virtual_connection.single_alternatives();
        let delivered: Vec<_> = requirement
            .single_alternatives()
            .iter()
            .filter(|r| offered.iter().any(|o| r.covered_by(o)))
            .cloned()
            .collect();
        let metadata = ConnectionMetadata {
            from: self.start.clone(),
            to: self.end().clone(),
            bidirectional: self.is_bidirectional(),
        };
        Connection::from_singles(delivered, Some(metadata)).ok()
    }

    fn reverses_last(&self, link: &Connection) -> bool {
        let (Some(last), Some(meta)) = (self.links.last(), link.metadata()) else {
            return false;
        };
        last.metadata().is_some_and(|m| m.matches(meta)) && last.equal_with(link, true)
    }
}

// ── Search ────────────────────────────────────────────────────────────────────

/// Every loop-free path from any node of `start` to any node of `target`
/// whose virtual connection satisfies `requirement`.
pub fn route_through(
    table: &ConnectionTable,
    requirement: &Connection,
    start: DeviceId,
    target: DeviceId,
) -> Vec<RoutingPath> {
    let mut frontier: Vec<RoutingPath> = table
        .nodes(start)
        .into_iter()
        .map(|node| RoutingPath::new(EndpointRef::new(start, node)))
        .collect();
    let mut completed = Vec::new();
    let mut round = 0usize;

    while !frontier.is_empty() {
        round += 1;
        let mut next = Vec::new();
        for path in &frontier {
            for link in table.outgoing(path.end()) {
                if path.reverses_last(link) {
                    continue;
                }
                let mut extended = path.clone();
                if let Err(err) = extended.append(link) {
                    debug!("skipping link {link}: {err}");
                    continue;
                }
                next.push(extended);
            }
        }

        let expanded = next.len();
        next.retain(|p| !p.has_loop() && p.satisfies(requirement));
        let (done, open): (Vec<_>, Vec<_>) = next.into_iter().partition(|p| p.end().device == target);
        debug!(
            "route round {round}: {expanded} expanded, {} completed, {} open",
            done.len(),
            open.len()
        );
        completed.extend(done);
        frontier = open;
    }

    completed
}
