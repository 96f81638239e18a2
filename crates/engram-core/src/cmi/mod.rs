//! Central Memory Index
//!
//! One compressed-vector pointer per memory across all modules. The index
//! stores indices, not content: each row is a back-reference
//! `(user, module, remote id)` plus the compressed embedding and a handful of
//! tracked text fields. Routing scans this single table instead of touching
//! any module, then the orchestrator issues full-precision searches against
//! only the modules that matter.

mod index;
mod routing;

pub use index::{CmiEntry, CmiFields, CmiHit, CmiIndex};
pub use routing::{ModuleRoute, Router, RouterWeights, NO_INDEX_FALLBACK, ROUTE_REASON};
