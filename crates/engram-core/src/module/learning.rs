//! Learning memory - study notes, progress, and comprehension tracking.
//!
//! Enrichment derives subject, difficulty, and an understanding estimate in
//! [0,1] from hedging or mastery language, plus a review-needed flag for
//! open questions.

use std::sync::Arc;

use serde_json::json;

use super::base::{BaseModule, ModuleDeps};
use super::enrich::{
    contains_any, derive_summary, derive_title, tokens, top_keywords, Enricher, Enrichment,
};
use super::{MemoryModule, ModuleConfig, ModuleType};
use crate::error::CoreError;
use crate::memory::Metadata;

const SUBJECTS: &[(&str, &[&str])] = &[
    ("math", &["derivative", "integral", "calculus", "algebra", "theorem", "equation", "matrix"]),
    ("programming", &["code", "function", "compiler", "algorithm", "recursion", "variable"]),
    ("science", &["physics", "chemistry", "biology", "photosynthesis", "molecule", "energy"]),
    ("language", &["vocabulary", "grammar", "spanish", "french", "conjugation", "pronunciation"]),
    ("history", &["history", "century", "empire", "revolution", "war", "treaty"]),
    ("music", &["chord", "scale", "melody", "rhythm", "tempo"]),
];

const ADVANCED_MARKERS: &[&str] = &["advanced", "complex", "proof", "rigorous", "graduate"];
const BEGINNER_MARKERS: &[&str] = &["basic", "intro", "beginner", "simple", "fundamentals"];

const CONFUSED_MARKERS: &[&str] = &["confused", "unclear", "lost", "stuck", "struggling"];
const GRASPED_MARKERS: &[&str] = &["understand", "understood", "clear", "makes", "got"];
const MASTERED_MARKERS: &[&str] = &["mastered", "fluent", "memorized", "solid"];

/// Enricher for the learning module
pub struct LearningEnricher;

impl LearningEnricher {
    /// Understanding estimate from the strongest confidence signal
    fn understanding(token_list: &[String]) -> f64 {
        if contains_any(token_list, MASTERED_MARKERS) {
            0.95
        } else if contains_any(token_list, CONFUSED_MARKERS) {
            0.2
        } else if contains_any(token_list, GRASPED_MARKERS) {
            0.7
        } else {
            0.5
        }
    }
}

impl Enricher for LearningEnricher {
    fn module_id(&self) -> &'static str {
        "learning"
    }

    fn module_name(&self) -> &'static str {
        "Learning Memory"
    }

    fn description(&self) -> &'static str {
        "Study notes, subjects, difficulty, and comprehension"
    }

    fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
        let token_list = tokens(content);

        let subject = SUBJECTS
            .iter()
            .map(|(subject, markers)| {
                let hits = token_list
                    .iter()
                    .filter(|t| markers.contains(&t.as_str()))
                    .count();
                (*subject, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .max_by_key(|(_, hits)| *hits)
            .map(|(subject, _)| subject);

        let difficulty = if contains_any(&token_list, ADVANCED_MARKERS) {
            "advanced"
        } else if contains_any(&token_list, BEGINNER_MARKERS) {
            "beginner"
        } else {
            "intermediate"
        };

        let understanding = Self::understanding(&token_list);
        let review_needed = content.contains('?') || token_list.iter().any(|t| t == "review");

        let mut categories = vec!["learning".to_string()];
        if let Some(subject) = subject {
            categories.push(subject.to_string());
        }

        // Shaky material needs to surface; mastered material can fade
        let importance_score = (0.5 + (0.5 - understanding) * 0.4
            + if review_needed { 0.15 } else { 0.0 })
        .clamp(0.0, 1.0) as f32;

        let mut extra = Metadata::new();
        extra.insert("difficulty".into(), json!(difficulty));
        extra.insert("understanding".into(), json!(understanding));
        extra.insert("reviewNeeded".into(), json!(review_needed));
        if let Some(subject) = subject {
            extra.insert("subject".into(), json!(subject));
        }

        Enrichment {
            title: derive_title(content, 60),
            summary: derive_summary(content, 120),
            keywords: top_keywords(content, 8),
            categories,
            importance_score,
            extra,
        }
    }
}

/// Construct the learning module over the shared services.
pub fn module(deps: &ModuleDeps) -> Result<Arc<dyn MemoryModule>, CoreError> {
    let enricher = Arc::new(LearningEnricher);
    let config = ModuleConfig::for_type(
        enricher.module_id(),
        enricher.module_name(),
        enricher.description(),
        ModuleType::Standard,
    );
    let module: Arc<dyn MemoryModule> = BaseModule::new(deps, enricher, config)?;
    Ok(module)
}
