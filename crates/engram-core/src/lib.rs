//! # Engram Core
//!
//! Federated semantic memory for LLM assistants. Memories are partitioned
//! across specialised domain modules (technical, personal, work, learning,
//! communication, creative), each owning full-fidelity vectors plus
//! domain-specific metadata enrichment, while a **Central Memory Index**
//! holds one compressed vector per memory and routes queries to the modules
//! worth asking.
//!
//! - **Dual-fidelity vectors**: full-precision embeddings for module-side
//!   search, compressed embeddings for cheap cross-module routing
//! - **Uniform module contract**: one store/search/update/delete surface;
//!   modules differ only in metadata enrichment
//! - **Federated search**: CMI routing, parallel fan-out under a deadline,
//!   score-merged results with honest `partial` flagging
//! - **Supervision**: periodic health probes; unhealthy modules are hidden
//!   from routing until they recover
//! - **Reconciliation**: background repair of the module <-> index
//!   correspondence; no write is lost to a transient index failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{CoreConfig, MemoryService, SearchOptions};
//!
//! let config = CoreConfig::from_env()?;
//! let (service, _report) = MemoryService::start(config).await?;
//!
//! // Store a memory through the owning module
//! let receipt = service
//!     .federation()
//!     .store("user-1", "learning", "The derivative of sin(x) is cos(x)", None)
//!     .await?;
//!
//! // Search across all modules; the CMI decides which to consult
//! let results = service
//!     .federation()
//!     .search("user-1", "what is d/dx sin x?", &SearchOptions::default())
//!     .await?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cache;
pub mod cmi;
pub mod config;
pub mod embedding;
pub mod error;
pub mod federation;
pub mod loader;
pub mod memory;
pub mod module;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod store;
pub mod supervisor;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Configuration and assembly
pub use config::{CoreConfig, CACHE_TTL, DEFAULT_COMPRESSED_DIM, DEFAULT_FULL_DIM, MAX_CONTENT_BYTES};
pub use service::MemoryService;

// Errors
pub use error::{CmiError, CoreError, EmbeddingError, ErrorKind, ModuleError, Result, StoreError};

// Memory types
pub use memory::{
    ElidedModule, FederatedSearchResult, Memory, MemoryPatch, Metadata, ModuleStats, SearchHit,
    SearchOptions, StoreReceipt,
};

// Embeddings
pub use embedding::{
    cosine_similarity, provider_from_config, DualEmbedding, Embedding, EmbeddingProvider,
    MockEmbedder, Projection, RemoteEmbedder,
};

// Storage layer
pub use store::{Database, MetricsSnapshot, NewRow, SqliteVectorStore};

// Central Memory Index
pub use cmi::{CmiEntry, CmiFields, CmiHit, CmiIndex, ModuleRoute, Router, RouterWeights};

// Modules
pub use module::{
    BaseModule, Enricher, Enrichment, MemoryModule, ModuleConfig, ModuleDependencies, ModuleDeps,
    ModuleMetadataSpec, ModuleType,
};

// Registry, loader, supervision
pub use loader::{catalogue, LoadReport, LoadState, ModuleFactory, ModuleLoader};
pub use registry::{ModuleDescriptor, ModuleRegistry};
pub use supervisor::{HealthMetrics, HealthStatus, ModuleHealth, SupervisorConfig};

// Federation and reconciliation
pub use federation::{Federation, ScoreCalibration};
pub use reconcile::{ReconcileQueue, ReconcileReport, ReconcileTask, Reconciler};

// Cache
pub use cache::MemoryCache;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CoreConfig, CoreError, ErrorKind, Federation, FederatedSearchResult, Memory, MemoryModule,
        MemoryPatch, MemoryService, Metadata, ModuleConfig, ModuleLoader, ModuleRegistry,
        ModuleStats, Result, SearchHit, SearchOptions, StoreReceipt,
    };

    pub use crate::{Embedding, EmbeddingProvider, MockEmbedder};

    pub use crate::{HealthStatus, ModuleHealth, ReconcileReport, Reconciler};
}
