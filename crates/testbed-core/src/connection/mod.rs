//! Connection algebra: the tree value describing how two device endpoints may
//! communicate.
//!
//! # The model (for beginners)
//!
//! A [`Connection`] is an immutable tree.  Its leaves are [`Single`] links,
//! each carrying a set of *property tags* such as `tcp` or `ipv4`.  Inner
//! nodes combine children:
//!
//! - **AND** – every child is guaranteed at the same time.  An AND of the
//!   singles `tcp` and `usb` is equivalent to the single `tcp+usb`.
//! - **OR** – any one child suffices.  `tcp | usb` offers either link.
//!
//! A single with no tags is the *bare* link ("connected somehow"); every other
//! single refines it.  Single `a` is *covered by* single `b` when every tag of
//! `a` is also a tag of `b`, i.e. `b` guarantees at least what `a` asks for.
//!
//! Every tree can be flattened into its list of non-composite alternatives
//! ([`Connection::get_singles`]).  Containment and intersection are defined on
//! those alternatives, which is what makes the algebra independent of how a
//! particular tree happens to be nested.
//!
//! An OR keeps every distinct alternative, including ones another alternative
//! covers: `tcp | tcp+ipv4` as a requirement is met by a plain `tcp` link.
//! Only equality reduces both sides to their maximal alternatives, so two
//! connections are equal exactly when each is contained in the other.
//!
//! # Endpoints
//!
//! Endpoint information ([`ConnectionMetadata`]) is attached to the root of a
//! tree and shared by every leaf below it.  Combining trees anchored at
//! different endpoints is rejected with
//! [`ConnectionError::IncompatibleEndpoints`].  Equality ignores metadata;
//! [`Connection::equal_with`] and [`Connection::contained_in`] compare it only
//! when asked to.

pub mod expr;
pub mod table;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::domain::ids::DeviceId;

/// Node name used whenever a declaration omits one.
///
/// Every link declared without a node name on a device attaches to this node,
/// so default links on one device share a single bus.
pub const DEFAULT_NODE: &str = "n0";

/// Errors raised while building or combining connections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// A composition was requested over zero alternatives.
    #[error("cannot build a connection from an empty set of alternatives")]
    Empty,

    /// Two connections anchored at different endpoints were combined.
    #[error("connections are anchored at incompatible endpoints: {left} vs {right}")]
    IncompatibleEndpoints { left: String, right: String },

    /// The same ordered device/node pair was declared more than once.
    #[error("duplicate connection declared between {from} and {to}")]
    DuplicateConnection { from: String, to: String },

    /// A textual connection expression could not be parsed.
    #[error("invalid connection expression `{input}` at offset {offset}: {message}")]
    Parse {
        input: String,
        offset: usize,
        message: String,
    },
}

// ── Endpoints ─────────────────────────────────────────────────────────────────

/// One end of a link: a device and a node name on that device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointRef {
    pub device: DeviceId,
    pub node: String,
}

impl EndpointRef {
    pub fn new(device: DeviceId, node: impl Into<String>) -> Self {
        Self {
            device,
            node: node.into(),
        }
    }

    /// Endpoint on the device's [`DEFAULT_NODE`].
    pub fn default_node(device: DeviceId) -> Self {
        Self::new(device, DEFAULT_NODE)
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.node)
    }
}

/// Endpoint information attached to the root of a connection tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionMetadata {
    pub from: EndpointRef,
    pub to: EndpointRef,
    /// Links are bidirectional unless explicitly declared otherwise.
    pub bidirectional: bool,
}

impl ConnectionMetadata {
    /// Creates bidirectional metadata.
    pub fn new(from: EndpointRef, to: EndpointRef) -> Self {
        Self {
            from,
            to,
            bidirectional: true,
        }
    }

    /// Creates metadata for a link that only works `from` → `to`.
    pub fn unidirectional(from: EndpointRef, to: EndpointRef) -> Self {
        Self {
            from,
            to,
            bidirectional: false,
        }
    }

    /// Same link seen from the other end.
    pub fn mirrored(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            bidirectional: self.bidirectional,
        }
    }

    /// Returns `true` if both describe the same link.
    ///
    /// Bidirectional links match their mirrored form as well.
    pub fn matches(&self, other: &ConnectionMetadata) -> bool {
        if self == other {
            return true;
        }
        self.bidirectional && other.bidirectional && self.mirrored() == *other
    }

    /// Returns `true` if the link joins `a` and `b` (in either direction).
    pub fn joins(&self, a: DeviceId, b: DeviceId) -> bool {
        (self.from.device == a && self.to.device == b)
            || (self.from.device == b && self.to.device == a)
    }
}

impl fmt::Display for ConnectionMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.bidirectional { "<->" } else { "->" };
        write!(f, "{} {arrow} {}", self.from, self.to)
    }
}

// ── Single links ──────────────────────────────────────────────────────────────

/// A non-composite link alternative: the set of property tags it guarantees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Single {
    properties: BTreeSet<String>,
}

impl Single {
    /// The bare link, covered by every other single.
    pub fn bare() -> Self {
        Self::default()
    }

    pub fn new<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(String::as_str)
    }

    pub fn is_bare(&self) -> bool {
        self.properties.is_empty()
    }

    /// Returns `true` if `other` guarantees at least every property of `self`.
    pub fn covered_by(&self, other: &Single) -> bool {
        self.properties.is_subset(&other.properties)
    }

    /// Conjunction: both singles at once.
    pub fn merge(&self, other: &Single) -> Single {
        Single {
            properties: self.properties.union(&other.properties).cloned().collect(),
        }
    }

    /// The properties both singles guarantee.
    pub fn common(&self, other: &Single) -> Single {
        Single {
            properties: self
                .properties
                .intersection(&other.properties)
                .cloned()
                .collect(),
        }
    }
}

// ── Connection trees ──────────────────────────────────────────────────────────

/// Shape of a connection tree node.
#[derive(Debug, Clone)]
pub enum ConnectionNode {
    Single(Single),
    /// All children at the same time.
    And(Vec<Connection>),
    /// Any one child.
    Or(Vec<Connection>),
}

/// Immutable connection tree.  See the [module documentation](self).
#[derive(Debug, Clone)]
pub struct Connection {
    node: ConnectionNode,
    metadata: Option<ConnectionMetadata>,
    /// Normalized single alternatives, computed on first use.
    singles: OnceLock<Vec<Single>>,
}

impl Connection {
    fn from_node(node: ConnectionNode, metadata: Option<ConnectionMetadata>) -> Self {
        Self {
            node,
            metadata,
            singles: OnceLock::new(),
        }
    }

    /// The bare link: "connected somehow".
    pub fn bare() -> Self {
        Self::from_single(Single::bare())
    }

    /// A single link guaranteeing the given properties.
    pub fn single<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_single(Single::new(properties))
    }

    pub fn from_single(single: Single) -> Self {
        Self::from_node(ConnectionNode::Single(single), None)
    }

    /// AND-composition: every item is required simultaneously.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Empty`] for an empty list and
    /// [`ConnectionError::IncompatibleEndpoints`] if the items carry
    /// metadata for different links.
    pub fn and<I>(items: I) -> Result<Self, ConnectionError>
    where
        I: IntoIterator<Item = Connection>,
    {
        Self::compose(items, ConnectionNode::And)
    }

    /// OR-composition built from a flat list of alternatives.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::and`].
    pub fn based_on<I>(items: I) -> Result<Self, ConnectionError>
    where
        I: IntoIterator<Item = Connection>,
    {
        Self::compose(items, ConnectionNode::Or)
    }

    fn compose<I>(items: I, make: fn(Vec<Connection>) -> ConnectionNode) -> Result<Self, ConnectionError>
    where
        I: IntoIterator<Item = Connection>,
    {
        let mut items: Vec<Connection> = items.into_iter().collect();
        if items.is_empty() {
            return Err(ConnectionError::Empty);
        }

        let mut metadata: Option<ConnectionMetadata> = None;
        for item in &items {
            metadata = merge_metadata(metadata.as_ref(), item.metadata.as_ref())?;
        }

        if items.len() == 1 {
            let mut only = items.remove(0);
            only.metadata = metadata;
            return Ok(only);
        }

        let children = items.into_iter().map(Connection::without_metadata).collect();
        Ok(Self::from_node(make(children), metadata))
    }

    /// Builds an OR of the given singles.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Empty`] if `singles` is empty.
    pub fn from_singles(
        singles: Vec<Single>,
        metadata: Option<ConnectionMetadata>,
    ) -> Result<Self, ConnectionError> {
        let connection =
            Self::based_on(singles.into_iter().map(Connection::from_single))?;
        Ok(connection.with_metadata_opt(metadata))
    }

    pub fn with_metadata(self, metadata: ConnectionMetadata) -> Self {
        self.with_metadata_opt(Some(metadata))
    }

    fn with_metadata_opt(mut self, metadata: Option<ConnectionMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn without_metadata(self) -> Self {
        self.with_metadata_opt(None)
    }

    pub fn metadata(&self) -> Option<&ConnectionMetadata> {
        self.metadata.as_ref()
    }

    pub fn node(&self) -> &ConnectionNode {
        &self.node
    }

    pub fn is_single(&self) -> bool {
        matches!(self.node, ConnectionNode::Single(_))
    }

    /// Clone of this connection anchored at a concrete endpoint pair.
    ///
    /// The direction flag of existing metadata is preserved.
    pub fn specialize_for(&self, from: EndpointRef, to: EndpointRef) -> Connection {
        let bidirectional = self.metadata.as_ref().map_or(true, |m| m.bidirectional);
        self.clone().with_metadata(ConnectionMetadata {
            from,
            to,
            bidirectional,
        })
    }

    /// The same connection seen from its other endpoint.
    pub fn mirrored(&self) -> Connection {
        let metadata = self.metadata.as_ref().map(ConnectionMetadata::mirrored);
        self.clone().with_metadata_opt(metadata)
    }

    // ── Alternatives ──────────────────────────────────────────────────────────

    /// Distinct non-composite alternatives of this tree.
    ///
    /// AND distributes over OR and each conjunction is merged into one
    /// single.  The list is sorted, deduplicated and never empty.
    pub fn single_alternatives(&self) -> &[Single] {
        self.singles.get_or_init(|| self.expand())
    }

    /// The alternatives as stand-alone connections carrying this tree's
    /// metadata.
    pub fn get_singles(&self) -> Vec<Connection> {
        self.single_alternatives()
            .iter()
            .map(|s| Connection::from_single(s.clone()).with_metadata_opt(self.metadata.clone()))
            .collect()
    }

    fn expand(&self) -> Vec<Single> {
        match &self.node {
            ConnectionNode::Single(single) => vec![single.clone()],
            ConnectionNode::Or(children) => normalize(
                children
                    .iter()
                    .flat_map(|c| c.single_alternatives().iter().cloned())
                    .collect(),
            ),
            ConnectionNode::And(children) => {
                let mut acc = vec![Single::bare()];
                for child in children {
                    let theirs = child.single_alternatives();
                    acc = normalize(
                        acc.iter()
                            .flat_map(|mine| theirs.iter().map(move |t| mine.merge(t)))
                            .collect(),
                    );
                }
                acc
            }
        }
    }

    // ── Algebra ───────────────────────────────────────────────────────────────

    /// Returns `true` if every alternative of `self` is covered by some
    /// alternative of `other`.
    ///
    /// Unless `ignore_metadata` is set, both sides must also describe the same
    /// link.
    pub fn contained_in(&self, other: &Connection, ignore_metadata: bool) -> bool {
        if !ignore_metadata && !metadata_equal(self.metadata(), other.metadata()) {
            return false;
        }
        let theirs = other.single_alternatives();
        self.single_alternatives()
            .iter()
            .all(|mine| theirs.iter().any(|t| mine.covered_by(t)))
    }

    /// Strictest common guarantee of both connections.
    ///
    /// The result keeps only its maximal alternatives.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::IncompatibleEndpoints`] if both sides carry metadata
    /// for different links.
    pub fn intersection(&self, other: &Connection) -> Result<Connection, ConnectionError> {
        let metadata = merge_metadata(self.metadata(), other.metadata())?;
        let theirs = other.single_alternatives();
        let common = self
            .single_alternatives()
            .iter()
            .flat_map(|mine| theirs.iter().map(move |t| mine.common(t)))
            .collect();
        Connection::from_singles(maximal(&normalize(common)), metadata)
    }

    /// OR of both connections.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::based_on`].
    pub fn union(&self, other: &Connection) -> Result<Connection, ConnectionError> {
        Connection::based_on([self.clone(), other.clone()])
    }

    /// Alternatives not covered by any other alternative of this tree.
    ///
    /// Containment answers never change when the covered ones are dropped.
    pub fn maximal_alternatives(&self) -> Vec<Single> {
        maximal(self.single_alternatives())
    }

    /// Equivalence (containment both ways), optionally including metadata.
    pub fn equal_with(&self, other: &Connection, ignore_metadata: bool) -> bool {
        if !ignore_metadata && !metadata_equal(self.metadata(), other.metadata()) {
            return false;
        }
        self.maximal_alternatives() == other.maximal_alternatives()
    }

    /// Returns `true` if at least one alternative of `requirement` is covered
    /// by an alternative of `self`.
    pub fn satisfies(&self, requirement: &Connection) -> bool {
        let mine = self.single_alternatives();
        requirement
            .single_alternatives()
            .iter()
            .any(|r| mine.iter().any(|m| r.covered_by(m)))
    }

    /// Containment in either orientation, metadata ignored.
    pub fn compatible_with(&self, other: &Connection) -> bool {
        self.contained_in(other, true) || other.contained_in(self, true)
    }

    /// Stable textual key of the alternatives, used for caching.
    pub fn canonical_key(&self) -> String {
        self.single_alternatives()
            .iter()
            .map(expr::single_to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl PartialEq for Connection {
    /// Metadata is ignored; use [`Connection::equal_with`] to compare it.
    fn eq(&self, other: &Self) -> bool {
        self.equal_with(other, true)
    }
}

impl Eq for Connection {}

// ── Private helpers ───────────────────────────────────────────────────────────

fn normalize(mut singles: Vec<Single>) -> Vec<Single> {
    singles.sort();
    singles.dedup();
    singles
}

/// Singles not covered by another single of the same list.
fn maximal(singles: &[Single]) -> Vec<Single> {
    singles
        .iter()
        .filter(|s| !singles.iter().any(|o| o != *s && s.covered_by(o)))
        .cloned()
        .collect()
}

fn metadata_equal(a: Option<&ConnectionMetadata>, b: Option<&ConnectionMetadata>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.matches(b),
        _ => false,
    }
}

fn merge_metadata(
    a: Option<&ConnectionMetadata>,
    b: Option<&ConnectionMetadata>,
) -> Result<Option<ConnectionMetadata>, ConnectionError> {
    match (a, b) {
        (Some(a), Some(b)) if !a.matches(b) => Err(ConnectionError::IncompatibleEndpoints {
            left: a.to_string(),
            right: b.to_string(),
        }),
        (Some(a), _) => Ok(Some(a.clone())),
        (None, b) => Ok(b.cloned()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
