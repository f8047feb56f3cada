//! Error taxonomy shared by the declaration graph and the resolver.
//!
//! Every variant names the offending declaration by its dotted path
//! (`Scenario.Device`, `Capability.LogicalDevice`, ...) so the message can be
//! shown to the person who wrote the declarations without further context.

use thiserror::Error;

use crate::connection::ConnectionError;

/// A declaration placed outside its required nesting or referring to
/// something it may not reference.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// A scenario specializing a setup, or vice versa.
    #[error("{child} cannot specialize {parent}: scenarios only specialize scenarios and setups only setups")]
    KindMismatch { child: String, parent: String },

    /// A parent must be declared before its child.
    #[error("{child} cannot specialize {parent}: the parent is declared after the child")]
    ParentOrder { child: String, parent: String },

    /// Two entities with the same name in one scope.
    #[error("duplicate {kind} `{name}` in {scope}")]
    DuplicateName {
        kind: &'static str,
        name: String,
        scope: String,
    },

    /// Connections only join devices of the same scenario or setup.
    #[error("cannot connect {from} with {to}: devices belong to different containers")]
    CrossContainerConnection { from: String, to: String },

    /// A device cannot be connected with itself.
    #[error("cannot connect {device} with itself")]
    SelfConnection { device: String },

    /// Binding targets must live in the same container as the bound device.
    #[error("cannot bind {instance} to {target}: devices belong to different containers")]
    CrossContainerBinding { instance: String, target: String },

    /// A capability instance cannot be bound to the device carrying it.
    #[error("cannot bind {instance} to its own device")]
    SelfBinding { instance: String },

    /// Capabilities required by a logical device are never bound themselves.
    #[error("{instance} belongs to a logical device and cannot carry a binding")]
    BindingOnLogicalDevice { instance: String },

    /// A binding or variant names a logical device its capability does not have.
    #[error("capability `{capability}` has no logical device named `{name}`")]
    UnknownLogicalDevice { capability: String, name: String },

    /// An id that was not handed out by this builder.
    #[error("unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: String },

    /// A node name must not be empty.
    #[error("empty node name on {device}")]
    EmptyNodeName { device: String },
}

/// Violation of the override discipline between a specialization and its
/// parent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    /// More than one specialization parent.
    #[error("{entity} specializes more than one parent ({})", .parents.join(", "))]
    MultiParent { entity: String, parents: Vec<String> },

    /// A partial re-declaration: some but not all parent items re-declared.
    #[error("{entity} re-declares items of {parent} but is missing `{missing}`; re-declare all of them or none")]
    MissingRedeclaration {
        entity: String,
        parent: String,
        missing: String,
    },

    /// A re-declared item is not a specialization of the item it replaces.
    #[error("{entity} overrides `{item}` with {found}, which is not a subtype of {expected}")]
    NotSubtype {
        entity: String,
        item: String,
        expected: String,
        found: String,
    },
}

/// Failure while resolving one (scenario, setup) pair.
///
/// These never abort a whole run; the pair or mapping is recorded as
/// discarded with the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Variant resolution did not end with exactly one outermost match.
    #[error("unclear variant for {capability}::{method} with active logical device `{logical_device}`: {} candidate(s) [{}]", .candidates.len(), .candidates.join(", "))]
    UnclearVariant {
        capability: String,
        method: String,
        logical_device: String,
        candidates: Vec<String>,
    },

    /// More than one parallel connection matches a capability requirement.
    #[error("unclear assignable connection between {from} and {to} for {capability}: {matching} parallel connections match `{requirement}`")]
    UnclearAssignableConnection {
        capability: String,
        from: String,
        to: String,
        requirement: String,
        matching: usize,
    },

    /// Capability requirements leave no viable alternative for a device pair.
    #[error("connection between {from} and {to} cannot satisfy `{requirement}` required by {capability}")]
    ConnectionIntersection {
        capability: String,
        from: String,
        to: String,
        requirement: String,
    },

    /// A required capability has no implementation on the real device.
    #[error("{device} does not implement capability `{capability}`")]
    MissingCapability { device: String, capability: String },

    /// More than one implementation candidate on the real device.
    #[error("{device} implements capability `{capability}` more than once: {}", .candidates.join(", "))]
    AmbiguousImplementation {
        device: String,
        capability: String,
        candidates: Vec<String>,
    },

    /// A setup binding disagrees with the scenario binding under the mapping.
    #[error("binding of {instance} is `{found}` but the scenario requires `{expected}`")]
    BindingMismatch {
        instance: String,
        expected: String,
        found: String,
    },

    /// No route in the setup satisfies a scenario connection.
    #[error("no route from {from} to {to} satisfies `{requirement}`")]
    NoRoute {
        from: String,
        to: String,
        requirement: String,
    },

    /// Operation needs an active binding but the instance has none.
    #[error("{instance} has no active binding")]
    Unbound { instance: String },

    /// No capability instance under that attribute.
    #[error("{device} has no capability attribute `{attr}`")]
    UnknownAttribute { device: String, attr: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
