//! Error types for the federated memory core.
//!
//! Each layer owns its error enum (adapter, embedding, CMI); `CoreError`
//! unifies them at the operation surface and classifies every failure into
//! an [`ErrorKind`] so callers can branch on retryability without matching
//! on layer internals.

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

/// Failure classification shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed input - oversized content, dimension mismatch, unknown module.
    /// Never retried.
    Invalid,
    /// The caller has no such row. Deliberately indistinguishable from
    /// "exists under another user".
    NotFound,
    /// Adapter timeout, provider 5xx, lock contention. Retried within the
    /// request budget.
    Transient,
    /// Partial federation result - one or more modules slow or unhealthy.
    Degraded,
    /// Unrecoverable - schema missing, required config absent, dimension
    /// mismatch after probe. Surfaced at startup.
    Fatal,
    /// Second step of a two-step mutation failed; the first step persists
    /// and a reconciliation task is queued.
    Reconcile,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transient => "transient",
            ErrorKind::Degraded => "degraded",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Reconcile => "reconcile",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// ADAPTER LAYER
// ============================================================================

/// Vector store adapter error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Row not found for this user
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// Stored or supplied vector has the wrong dimension
    #[error("Invalid vector dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
    /// Content exceeds the 50 KB ceiling
    #[error("Content too large: {size} bytes (limit {limit})")]
    ContentTooLarge { size: usize, limit: usize },
    /// A connection mutex was poisoned by a panicking holder
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl StoreError {
    /// Classify for the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Database(_) | StoreError::Io(_) | StoreError::LockPoisoned(_) => {
                ErrorKind::Transient
            }
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidDimensions { .. } | StoreError::ContentTooLarge { .. } => {
                ErrorKind::Invalid
            }
            StoreError::Init(_) => ErrorKind::Fatal,
        }
    }
}

// ============================================================================
// EMBEDDING LAYER
// ============================================================================

/// Embedding provider error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// No API key configured and mock mode not enabled
    #[error("Embedding provider credentials missing (set EMBEDDING_KEY or ALLOW_MOCK_EMBED=1)")]
    MissingCredentials,
    /// Transport-level failure talking to the provider
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider answered with a non-success status
    #[error("Embedding provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    /// Provider answered with a vector of the wrong length
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// All retry attempts exhausted
    #[error("Embedding failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    /// Invalid input (empty text)
    #[error("Invalid embedding input: {0}")]
    InvalidInput(String),
}

impl EmbeddingError {
    /// Classify for the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmbeddingError::MissingCredentials => ErrorKind::Fatal,
            EmbeddingError::Http(_) | EmbeddingError::Exhausted { .. } => ErrorKind::Transient,
            EmbeddingError::Provider { status, .. } if *status >= 500 => ErrorKind::Transient,
            EmbeddingError::Provider { .. } => ErrorKind::Fatal,
            EmbeddingError::DimensionMismatch { .. } | EmbeddingError::InvalidInput(_) => {
                ErrorKind::Invalid
            }
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// ============================================================================
// CMI LAYER
// ============================================================================

/// Central Memory Index error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CmiError {
    /// Database error
    #[error("CMI database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Compressed vector has the wrong dimension
    #[error("CMI vector dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
    /// A connection mutex was poisoned
    #[error("CMI {0} lock poisoned")]
    LockPoisoned(&'static str),
    /// Index entry missing
    #[error("CMI entry not found: {0}")]
    NotFound(String),
    /// Initialization error
    #[error("CMI initialization error: {0}")]
    Init(String),
}

impl CmiError {
    /// Classify for the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CmiError::Database(_) | CmiError::LockPoisoned(_) => ErrorKind::Transient,
            CmiError::InvalidDimensions { .. } => ErrorKind::Invalid,
            CmiError::NotFound(_) => ErrorKind::NotFound,
            CmiError::Init(_) => ErrorKind::Fatal,
        }
    }
}

// ============================================================================
// CORE ERROR
// ============================================================================

/// Unified operation-surface error.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input rejected before any side effect
    #[error("Invalid request: {0}")]
    Invalid(String),
    /// No such row for this user
    #[error("Not found: {0}")]
    NotFound(String),
    /// Unknown module id
    #[error("Unknown module: {0}")]
    UnknownModule(String),
    /// Adapter failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Embedding failure
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// CMI failure
    #[error(transparent)]
    Cmi(#[from] CmiError),
    /// Backpressure rejection - the bounded queue is full
    #[error("Service busy: {0}")]
    Busy(&'static str),
    /// A soft deadline elapsed
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),
    /// Required configuration absent or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
    /// The service is shutting down
    #[error("Shutting down")]
    Shutdown,
    /// Unexpected runtime failure (worker panic, join error)
    #[error("Internal error: {0}")]
    Internal(String),
    /// A module-layer failure surfaced through a federation entry point
    #[error(transparent)]
    Module(Box<ModuleError>),
}

impl CoreError {
    /// Classify for the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Invalid(_) | CoreError::UnknownModule(_) => ErrorKind::Invalid,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Store(e) => e.kind(),
            CoreError::Embedding(e) => e.kind(),
            CoreError::Cmi(e) => e.kind(),
            CoreError::Busy(_) | CoreError::DeadlineExceeded(_) => ErrorKind::Transient,
            CoreError::Config(_) => ErrorKind::Fatal,
            CoreError::Shutdown => ErrorKind::Fatal,
            CoreError::Internal(_) => ErrorKind::Transient,
            CoreError::Module(e) => e.kind(),
        }
    }
}

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// MODULE ERROR
// ============================================================================

/// A core error wrapped with the module it came from.
///
/// The orchestrator never propagates one of these as a request failure; it
/// logs, skips the module, and records it in the partial-set metadata.
#[derive(Debug, thiserror::Error)]
#[error("module {module_id}: {source}")]
pub struct ModuleError {
    /// Id of the module that failed
    pub module_id: String,
    /// Underlying failure
    #[source]
    pub source: CoreError,
}

impl ModuleError {
    /// Wrap a core error with its module id.
    pub fn new(module_id: impl Into<String>, source: impl Into<CoreError>) -> Self {
        Self {
            module_id: module_id.into(),
            source: source.into(),
        }
    }

    /// Classification of the underlying failure.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl From<ModuleError> for CoreError {
    fn from(e: ModuleError) -> Self {
        CoreError::Module(Box::new(e))
    }
}

// ============================================================================
// TESTS
// ============================================================================
