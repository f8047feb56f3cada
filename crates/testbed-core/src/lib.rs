//! # testbed-core
//!
//! Shared library for the testbed resolver containing the connection algebra,
//! the declaration graph and the entity registry.
//!
//! This crate performs no I/O.  It is used by the resolver library, which
//! implements the resolution use cases on top of it.
//!
//! # Architecture overview (for beginners)
//!
//! A test is written against a *scenario*: abstract devices, the capabilities
//! they need and how they must be connected.  A lab offers *setups*: real
//! devices, the capabilities they implement and how they are actually wired.
//! The resolver decides which scenario can run on which setup, under which
//! device mapping, and which implementation and wiring path each capability
//! uses.
//!
//! This crate (`testbed-core`) is the shared foundation.  It defines:
//!
//! - **`connection`** – The connection algebra.  A connection is an immutable
//!   tree of single links combined with AND/OR, with containment and
//!   intersection defined on its flattened alternatives.
//!
//! - **`domain`** – The declaration graph: scenarios, setups, devices,
//!   capability types and logical devices, built through an explicit
//!   builder, plus the error taxonomy.
//!
//! - **`registry`** – One lazily created controller per declared entity,
//!   holding everything derived from the declarations so the declarations
//!   themselves stay passive.

pub mod connection;
pub mod domain;
pub mod registry;

// Re-export the most-used types at the crate root so callers can write
// `testbed_core::Connection` instead of `testbed_core::connection::Connection`.
pub use connection::table::ConnectionTable;
pub use connection::{
    Connection, ConnectionError, ConnectionMetadata, ConnectionNode, EndpointRef, Single,
    DEFAULT_NODE,
};
pub use domain::builder::GraphBuilder;
pub use domain::errors::{DeclarationError, HierarchyError, ResolveError};
pub use domain::graph::{ContainerKind, DeclarationGraph, InstanceOwner};
pub use domain::ids::{CapabilityId, ContainerId, DeviceId, InstanceId, LogicalDeviceId};
pub use registry::controller::{ResolutionWarning, ResolvedConnections};
pub use registry::Registry;
