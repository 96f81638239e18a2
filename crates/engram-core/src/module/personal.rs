//! Personal memory - life events, feelings, private notes.
//!
//! Enrichment classifies mood, life area, and flags sensitive content so
//! front-ends can treat it carefully.

use std::sync::Arc;

use serde_json::json;

use super::base::{BaseModule, ModuleDeps};
use super::enrich::{
    contains_any, derive_summary, derive_title, sentiment, tokens, top_keywords, Enricher,
    Enrichment,
};
use super::{MemoryModule, ModuleConfig, ModuleType};
use crate::error::CoreError;
use crate::memory::Metadata;

const LIFE_AREAS: &[(&str, &[&str])] = &[
    ("family", &["family", "mom", "dad", "sister", "brother", "kids", "parents"]),
    ("health", &["health", "doctor", "sleep", "exercise", "gym", "diet", "therapy"]),
    ("relationships", &["friend", "partner", "wife", "husband", "date"]),
    ("travel", &["trip", "travel", "flight", "vacation", "visit"]),
    ("finance", &["money", "budget", "savings", "rent", "salary", "invest"]),
];

const SENSITIVE_MARKERS: &[&str] = &[
    "password", "medical", "diagnosis", "salary", "ssn", "secret", "private", "therapy",
];

/// Enricher for the personal module
pub struct PersonalEnricher;

impl Enricher for PersonalEnricher {
    fn module_id(&self) -> &'static str {
        "personal"
    }

    fn module_name(&self) -> &'static str {
        "Personal Memory"
    }

    fn description(&self) -> &'static str {
        "Life events, reflections, and private notes"
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Specialised
    }

    fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
        let token_list = tokens(content);

        let polarity = sentiment(&token_list);
        let mood = if polarity > 0.3 {
            "positive"
        } else if polarity < -0.3 {
            "negative"
        } else {
            "neutral"
        };

        let life_area = LIFE_AREAS
            .iter()
            .find(|(_, markers)| contains_any(&token_list, markers))
            .map(|(area, _)| *area);

        let sensitive = contains_any(&token_list, SENSITIVE_MARKERS);

        let mut categories = vec!["personal".to_string()];
        if let Some(area) = life_area {
            categories.push(area.to_string());
        }

        // Sensitive and emotionally loaded memories matter more
        let mut importance_score: f32 = 0.5;
        if sensitive {
            importance_score += 0.25;
        }
        importance_score += polarity.abs() * 0.15;

        let mut extra = Metadata::new();
        extra.insert("mood".into(), json!(mood));
        extra.insert("sensitive".into(), json!(sensitive));
        if let Some(area) = life_area {
            extra.insert("lifeArea".into(), json!(area));
        }

        Enrichment {
            title: derive_title(content, 60),
            summary: derive_summary(content, 120),
            keywords: top_keywords(content, 8),
            categories,
            importance_score: importance_score.min(1.0),
            extra,
        }
    }
}

/// Construct the personal module over the shared services.
pub fn module(deps: &ModuleDeps) -> Result<Arc<dyn MemoryModule>, CoreError> {
    let enricher = Arc::new(PersonalEnricher);
    let config = ModuleConfig::for_type(
        enricher.module_id(),
        enricher.module_name(),
        enricher.description(),
        enricher.module_type(),
    );
    let module: Arc<dyn MemoryModule> = BaseModule::new(deps, enricher, config)?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrich(content: &str) -> Enrichment {
        PersonalEnricher.enrich(content, &Metadata::new())
    }

    #[test]
    fn mood_tracks_sentiment() {
        assert_eq!(
            enrich("had a wonderful happy day with family").extra.get("mood"),
            Some(&json!("positive"))
        );
        assert_eq!(
            enrich("feeling sad and anxious about everything").extra.get("mood"),
            Some(&json!("negative"))
        );
        assert_eq!(
            enrich("went to the store").extra.get("mood"),
            Some(&json!("neutral"))
        );
    }

    #[test]
    fn life_area_classification() {
        let e = enrich("doctor said my sleep schedule needs work");
        assert_eq!(e.extra.get("lifeArea"), Some(&json!("health")));
        assert!(e.categories.contains(&"health".to_string()));
    }

    #[test]
    fn sensitive_content_flagged_and_weighted() {
        let e = enrich("new diagnosis from the doctor today");
        assert_eq!(e.extra.get("sensitive"), Some(&json!(true)));
        assert!(e.importance_score > 0.7);

        let plain = enrich("watered the plants");
        assert_eq!(plain.extra.get("sensitive"), Some(&json!(false)));
    }
}
