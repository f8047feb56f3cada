//! Application layer use cases for the resolver.
//!
//! # What is the "application" layer? (for beginners)
//!
//! `testbed-core` only describes what was declared.  The use cases in this
//! layer answer questions about those declarations:
//!
//! - They **work through a [`ResolutionSession`]**, which pairs the read-only
//!   declaration graph with the registry that caches everything derived.
//! - They **contain no file system access and no printing**.  Loading
//!   declarations and rendering reports live in `infrastructure`.
//!
//! # Sub-modules
//!
//! - **`session`**   – The graph plus its registry.
//! - **`hierarchy`** – One-time validation of every specialization chain.
//! - **`binding`**   – Capability requirements, active bindings and method
//!   variant selection.
//! - **`reduction`** – Absolute connections, single expansion and
//!   capability-driven reduction per scenario or setup.
//! - **`routing`**   – Breadth-first search for setup paths that satisfy a
//!   scenario connection.
//! - **`matching`**  – Device mappings for every scenario/setup pair, with
//!   discard reasons for the rejected ones.

pub mod binding;
pub mod hierarchy;
pub mod matching;
pub mod reduction;
pub mod routing;
pub mod session;

pub use session::ResolutionSession;
