//! Deterministic text fixtures.
//!
//! The mock embedder is a bag-of-tokens hash, so relatedness between a
//! fixture and a query is exactly their vocabulary overlap. Corpora below
//! are built so in-domain queries overlap heavily and cross-domain queries
//! barely at all.

/// Study notes for the learning module
pub const LEARNING_NOTES: &[&str] = &[
    "The derivative of sin x is cos x",
    "Integration by parts technique for calculus integrals",
    "The quadratic formula solves second degree equations",
    "Photosynthesis converts light energy into chemical sugar",
];

/// Poems and drafts for the creative module
pub const CREATIVE_DRAFTS: &[&str] = &[
    "A poem about moonlight dancing on silver tides",
    "Story draft where the dragon befriends the cartographer",
    "Rough lyrics for a chorus about summer rain",
];

/// Engineering notes for the technical module
pub const TECHNICAL_NOTES: &[&str] = &[
    "Rust borrow checker error with overlapping mutable references",
    "The tokio runtime panicked inside the worker loop",
    "Postgres index scan regression after the schema migration",
];

/// Status notes for the work module
pub const WORK_NOTES: &[&str] = &[
    "Project falcon launch checklist is due 2026-09-01",
    "Blocked on the platform team for api credentials",
    "Quarterly planning document shipped and completed",
];

/// Journal entries for the personal module
pub const PERSONAL_NOTES: &[&str] = &[
    "Wonderful hiking trip with family in the mountains",
    "Worried about the doctor appointment next week",
];

/// A query with heavy overlap against `LEARNING_NOTES[0]`
pub const CALCULUS_QUERY: &str = "what is the derivative of sin x";

/// A query with heavy overlap against `LEARNING_NOTES[1]`
pub const INTEGRATION_QUERY: &str = "integration by parts";

/// Content of an exact size in bytes
pub fn content_of_size(bytes: usize) -> String {
    "x".repeat(bytes)
}
