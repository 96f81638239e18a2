//! Technical memory - code, errors, and engineering notes.
//!
//! Enrichment detects the programming language (code fences first, then
//! keyword evidence), the framework in play, and error signatures. Error
//! content is fingerprinted so repeated failures of the same shape share a
//! stable `errorPattern` tag.

use std::sync::Arc;

use serde_json::json;

use super::base::{BaseModule, ModuleDeps};
use super::enrich::{
    derive_summary, derive_title, fingerprint, tokens, top_keywords, Enricher, Enrichment,
};
use super::{MemoryModule, ModuleConfig, ModuleType};
use crate::error::CoreError;
use crate::memory::Metadata;

/// Keyword evidence per language, checked when no code fence names one
const LANGUAGES: &[(&str, &[&str])] = &[
    ("rust", &["rust", "cargo", "impl", "borrow", "lifetime", "crate"]),
    ("python", &["python", "def", "pip", "django", "numpy"]),
    ("javascript", &["javascript", "const", "npm", "node", "async"]),
    ("typescript", &["typescript", "interface", "tsconfig"]),
    ("go", &["golang", "goroutine", "func"]),
    ("sql", &["select", "join", "sql", "query", "index"]),
];

/// Framework markers
const FRAMEWORKS: &[&str] = &[
    "react", "vue", "svelte", "django", "flask", "rails", "axum", "tokio", "express", "spring",
];

/// Words that mark error content, in ascending severity
const ERROR_MARKERS: &[&str] = &["warning", "error", "exception", "panic", "segfault", "fatal"];

/// Enricher for the technical module
pub struct TechnicalEnricher;

impl TechnicalEnricher {
    /// Language named by a code fence (```rust), if any
    fn fenced_language(content: &str) -> Option<String> {
        content.lines().find_map(|line| {
            let rest = line.trim().strip_prefix("```")?;
            let label: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            (!label.is_empty()).then(|| label.to_lowercase())
        })
    }

    /// Best keyword-evidence language
    fn keyword_language(token_list: &[String]) -> Option<String> {
        LANGUAGES
            .iter()
            .map(|(lang, markers)| {
                let hits = token_list
                    .iter()
                    .filter(|t| markers.contains(&t.as_str()))
                    .count();
                (*lang, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .max_by_key(|(_, hits)| *hits)
            .map(|(lang, _)| lang.to_string())
    }

    /// Severity from the strongest error marker present
    fn severity(token_list: &[String]) -> Option<&'static str> {
        let strongest = ERROR_MARKERS
            .iter()
            .rposition(|marker| token_list.iter().any(|t| t == marker))?;
        Some(match strongest {
            0 => "low",
            1 | 2 => "medium",
            _ => "high",
        })
    }

    /// Stable fingerprint of the first error-bearing line
    fn error_pattern(content: &str) -> Option<String> {
        let line = content.lines().find(|line| {
            let lower = line.to_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })?;
        Some(fingerprint(line.trim()))
    }
}

impl Enricher for TechnicalEnricher {
    fn module_id(&self) -> &'static str {
        "technical"
    }

    fn module_name(&self) -> &'static str {
        "Technical Memory"
    }

    fn description(&self) -> &'static str {
        "Code snippets, error diagnoses, and engineering knowledge"
    }

    fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
        let token_list = tokens(content);
        let language =
            Self::fenced_language(content).or_else(|| Self::keyword_language(&token_list));
        let framework = FRAMEWORKS
            .iter()
            .find(|f| token_list.iter().any(|t| t == *f))
            .map(|f| f.to_string());
        let severity = Self::severity(&token_list);
        let error_pattern = Self::error_pattern(content);

        let mut categories = vec!["technical".to_string()];
        if let Some(language) = &language {
            categories.push(language.clone());
        }
        if let Some(framework) = &framework {
            categories.push(framework.clone());
        }

        // Errors outrank plain notes; high severity most of all
        let importance_score = match severity {
            Some("high") => 0.85,
            Some("medium") => 0.7,
            Some("low") => 0.6,
            _ => 0.5,
        };

        let mut extra = Metadata::new();
        if let Some(language) = language {
            extra.insert("language".into(), json!(language));
        }
        if let Some(framework) = framework {
            extra.insert("framework".into(), json!(framework));
        }
        if let Some(severity) = severity {
            extra.insert("severity".into(), json!(severity));
        }
        if let Some(pattern) = error_pattern {
            extra.insert("errorPattern".into(), json!(pattern));
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

    fn analyze(&self, content: &str) -> Option<serde_json::Value> {
        let token_list = tokens(content);
        let severity = Self::severity(&token_list)?;
        let error_line = content.lines().find(|line| {
            let lower = line.to_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })?;

        let stack_frames = content
            .lines()
            .filter(|line| line.trim_start().starts_with("at "))
            .count();

        Some(json!({
            "kind": "errorDiagnosis",
            "severity": severity,
            "errorLine": error_line.trim(),
            "stackFrames": stack_frames,
        }))
    }
}

/// Construct the technical module over the shared services.
pub fn module(deps: &ModuleDeps) -> Result<Arc<dyn MemoryModule>, CoreError> {
    let enricher = Arc::new(TechnicalEnricher);
    let config = ModuleConfig::for_type(
        enricher.module_id(),
        enricher.module_name(),
        enricher.description(),
        ModuleType::Standard,
    );
    let module: Arc<dyn MemoryModule> = BaseModule::new(deps, enricher, config)?;
    Ok(module)
}

// ============================================================================
// TESTS
// ============================================================================
