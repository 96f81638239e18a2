//! Creative memory - ideas, drafts, and works in progress.

use std::sync::Arc;

use serde_json::json;

use super::base::{BaseModule, ModuleDeps};
use super::enrich::{
    contains_any, derive_summary, derive_title, tokens, top_keywords, Enricher, Enrichment,
};
use super::{MemoryModule, ModuleConfig, ModuleType};
use crate::error::CoreError;
use crate::memory::Metadata;

const CATEGORY_MARKERS: &[(&str, &[&str])] = &[
    ("poem", &["poem", "verse", "stanza", "haiku"]),
    ("story", &["story", "chapter", "character", "plot", "novel"]),
    ("song", &["song", "lyrics", "melody", "chorus"]),
    ("design", &["design", "sketch", "layout", "logo", "palette"]),
    ("idea", &["idea", "concept", "brainstorm", "pitch"]),
];

const MEDIUM_BY_CATEGORY: &[(&str, &str)] = &[
    ("poem", "text"),
    ("story", "text"),
    ("song", "audio"),
    ("design", "visual"),
    ("idea", "text"),
];

const FINAL_MARKERS: &[&str] = &["final", "finished", "published", "complete"];
const REVISION_MARKERS: &[&str] = &["revision", "editing", "revised", "rework"];

/// Enricher for the creative module
pub struct CreativeEnricher;

impl Enricher for CreativeEnricher {
    fn module_id(&self) -> &'static str {
        "creative"
    }

    fn module_name(&self) -> &'static str {
        "Creative Memory"
    }

    fn description(&self) -> &'static str {
        "Ideas, drafts, and creative works with stage tracking"
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Specialised
    }

    fn dependencies(&self) -> super::ModuleDependencies {
        super::ModuleDependencies {
            requires: Vec::new(),
            optional: vec!["personal"],
        }
    }

    fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
        let token_list = tokens(content);

        let category = CATEGORY_MARKERS
            .iter()
            .find(|(_, markers)| contains_any(&token_list, markers))
            .map(|(category, _)| *category)
            .unwrap_or("idea");
        let medium = MEDIUM_BY_CATEGORY
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, m)| *m)
            .unwrap_or("text");

        let (stage, completion) = if contains_any(&token_list, FINAL_MARKERS) {
            ("final", 1.0)
        } else if contains_any(&token_list, REVISION_MARKERS) {
            ("revision", 0.6)
        } else {
            ("draft", 0.3)
        };

        // Vocabulary richness as a crude quality/originality proxy
        let total = token_list.len().max(1) as f64;
        let unique = {
            let mut sorted = token_list.clone();
            sorted.sort();
            sorted.dedup();
            sorted.len() as f64
        };
        let originality = unique / total;
        let quality = (originality * 0.5 + completion * 0.5).clamp(0.0, 1.0);

        let mut extra = Metadata::new();
        extra.insert("creativeCategory".into(), json!(category));
        extra.insert("medium".into(), json!(medium));
        extra.insert("stage".into(), json!(stage));
        extra.insert("completion".into(), json!(completion));
        extra.insert("originality".into(), json!((originality * 100.0).round() / 100.0));
        extra.insert("quality".into(), json!((quality * 100.0).round() / 100.0));

        Enrichment {
            title: derive_title(content, 60),
            summary: derive_summary(content, 120),
            keywords: top_keywords(content, 8),
            categories: vec!["creative".to_string(), category.to_string()],
            importance_score: (0.4 + completion * 0.2) as f32,
            extra,
        }
    }
}

/// Construct the creative module over the shared services.
pub fn module(deps: &ModuleDeps) -> Result<Arc<dyn MemoryModule>, CoreError> {
    let enricher = Arc::new(CreativeEnricher);
    let config = ModuleConfig::for_type(
        enricher.module_id(),
        enricher.module_name(),
        enricher.description(),
        enricher.module_type(),
    );
    let module: Arc<dyn MemoryModule> = BaseModule::new(deps, enricher, config)?;
    Ok(module)
}
