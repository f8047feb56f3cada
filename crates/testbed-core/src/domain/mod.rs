//! Declarations and the errors raised about them.
//!
//! Declarations are the input of every resolution.  They describe what was
//! written down, never what was derived:
//!
//! - **`ids`** – typed arena indices, handed out in declaration order.
//! - **`graph`** – the declaration records and the read-only graph.
//! - **`builder`** – explicit, one-call-per-entity registration.
//! - **`errors`** – the error taxonomy shared with the resolver.

pub mod builder;
pub mod errors;
pub mod graph;
pub mod ids;
