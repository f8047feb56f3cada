//! Infrastructure layer for the resolver.
//!
//! Contains the file-facing adapters: the declaration file loader, the
//! configuration file and the report renderer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `testbed_core`, but MUST NOT be imported by the `application` layer.

pub mod collector;
pub mod report;
pub mod storage;
