//! Sigpath Core - Shared types and traits
//!
//! This crate defines the core abstractions used by the orchestrator and by
//! the HTTP clients that talk to the three remote systems:
//! - stream-routing broadcasters (one per redundant path)
//! - the VM/service control API that drives encoder hosts
//! - the device directory that maps source ids to encoder hosts
//!
//! Key types:
//! - `BroadcasterApi`, `ControlApi`, `DirectoryApi` traits
//! - Source ids, stream endpoints and encoder status
//! - Error types

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
