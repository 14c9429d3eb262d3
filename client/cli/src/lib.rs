//! Buffered CAS client library backing the `tangle` CLI binary.
//!
//! Mirrors the shape of the teacher's `client/cli` module split (a REST transport module
//! plus a higher-level sync/staging module driving it), retargeted at the CAS engine's
//! buffered-write protocol instead of path-based file sync.

pub mod config;
pub mod error;
pub mod rest;
pub mod writer;

pub use error::ClientError;
pub use rest::{Credential, NodeInfoWire, RestClient, TreeResponseWire};
pub use writer::{BufferedWriter, FsResolver, PathResolver, ResolvedEntry};
