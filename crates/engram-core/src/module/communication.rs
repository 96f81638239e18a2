//! Communication memory - messages, threads, and correspondence.

use std::sync::Arc;

use serde_json::json;

use super::base::{BaseModule, ModuleDeps};
use super::enrich::{
    derive_summary, derive_title, fingerprint, sentiment, token_after, tokens, top_keywords,
    Enricher, Enrichment,
};
use super::{MemoryModule, ModuleConfig, ModuleType};
use crate::error::CoreError;
use crate::memory::Metadata;

/// Enricher for the communication module
pub struct CommunicationEnricher;

impl CommunicationEnricher {
    /// Thread id: fingerprint of the normalised first line, with "re"
    /// prefixes stripped so replies land in the sender's thread
    fn thread_id(content: &str) -> String {
        let first = content.lines().next().unwrap_or("").to_lowercase();
        let normalised = first
            .trim()
            .trim_start_matches("re:")
            .trim_start_matches("fwd:")
            .trim();
        fingerprint(normalised)
    }
}

impl Enricher for CommunicationEnricher {
    fn module_id(&self) -> &'static str {
        "communication"
    }

    fn module_name(&self) -> &'static str {
        "Communication Memory"
    }

    fn description(&self) -> &'static str {
        "Messages, senders, threads, and tone"
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::External
    }

    fn dependencies(&self) -> super::ModuleDependencies {
        super::ModuleDependencies {
            requires: Vec::new(),
            optional: vec!["personal"],
        }
    }

    fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
        let token_list = tokens(content);

        let sender = token_after(&token_list, "from");
        let recipient = token_after(&token_list, "to");
        let thread_id = Self::thread_id(content);

        let polarity = sentiment(&token_list);
        let tone = if polarity > 0.3 {
            "positive"
        } else if polarity < -0.3 {
            "negative"
        } else {
            "neutral"
        };

        let mut extra = Metadata::new();
        extra.insert("threadId".into(), json!(thread_id));
        extra.insert("tone".into(), json!(tone));
        if let Some(sender) = sender {
            extra.insert("sender".into(), json!(sender));
        }
        if let Some(recipient) = recipient {
            extra.insert("recipient".into(), json!(recipient));
        }

        Enrichment {
            title: derive_title(content, 60),
            summary: derive_summary(content, 120),
            keywords: top_keywords(content, 8),
            categories: vec!["communication".to_string(), tone.to_string()],
            // Charged messages are worth resurfacing
            importance_score: (0.5 + polarity.abs() * 0.2).min(1.0),
            extra,
        }
    }
}

/// Construct the communication module over the shared services.
pub fn module(deps: &ModuleDeps) -> Result<Arc<dyn MemoryModule>, CoreError> {
    let enricher = Arc::new(CommunicationEnricher);
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
        CommunicationEnricher.enrich(content, &Metadata::new())
    }

    #[test]
    fn sender_and_recipient_tags() {
        let e = enrich("Message from alice to bob about the meeting");
        assert_eq!(e.extra.get("sender"), Some(&json!("alice")));
        assert_eq!(e.extra.get("recipient"), Some(&json!("bob")));
    }

    #[test]
    fn replies_share_a_thread() {
        let original = enrich("Quarterly budget review\nNumbers attached.");
        let reply = enrich("Re: Quarterly budget review\nLooks good.");
        assert_eq!(original.extra.get("threadId"), reply.extra.get("threadId"));
    }

    #[test]
    fn tone_classification() {
        assert_eq!(enrich("thanks, great news, love it").extra.get("tone"), Some(&json!("positive")));
        assert_eq!(enrich("this is terrible and frustrating").extra.get("tone"), Some(&json!("negative")));
    }
}
