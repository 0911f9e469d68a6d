//! Release-State: persistence for the release control plane
//!
//! This crate owns every row the release engine writes: release targets,
//! version releases, variable-set releases, releases and jobs.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: uniqueness guarantees, atomic multi-row writes, and history reads.
//!
//! ## Key Components
//!
//! - `ReleaseTargetStore` / `ReleaseStore` / `ReleaseTxn`: backend-agnostic seams
//! - `MemoryReleaseStore`: in-process backend used by tests and the CLI
//! - `SurrealReleaseStore`: SurrealDB backend (`mem://`, `ws://`, `surrealkv://`)

mod error;
mod handle;
pub mod ids;
pub mod memory;
pub mod records;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{SurrealConfig, SurrealHandle};
pub use ids::*;
pub use memory::MemoryReleaseStore;
pub use records::{
    JobRecord, JobStatus, JobUpdate, ReleaseRecord, ReleaseTargetRecord, VariableSetReleaseRecord,
    VariableSnapshot, VersionReleaseRecord,
};
pub use storage_traits::{ReleaseStore, ReleaseTargetStore, ReleaseTxn, StorageResult};
pub use surreal_store::SurrealReleaseStore;

/// Result type for release-state connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
