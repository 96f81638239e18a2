//! Metadata enrichment.
//!
//! The sole polymorphic step of the module contract. An [`Enricher`] derives
//! the tracked CMI fields (title, summary, keywords, categories, importance)
//! plus domain extras from content alone, so enrichment is pure and
//! idempotent: enriching already-enriched metadata changes nothing.

use serde_json::json;

use crate::cmi::CmiFields;
use crate::memory::{keys, Metadata};
use super::{ModuleDependencies, ModuleType};

// ============================================================================
// ENRICHER CONTRACT
// ============================================================================

/// Per-module metadata derivation
pub trait Enricher: Send + Sync {
    /// Stable module id
    fn module_id(&self) -> &'static str;

    /// Human-readable module name
    fn module_name(&self) -> &'static str;

    /// What the module stores
    fn description(&self) -> &'static str;

    /// Module classification (drives config defaults)
    fn module_type(&self) -> ModuleType {
        ModuleType::Standard
    }

    /// Dependency declaration
    fn dependencies(&self) -> ModuleDependencies {
        ModuleDependencies::default()
    }

    /// Derive tracked fields and domain extras from content.
    ///
    /// Must be pure: the same `(content, metadata)` always produces the same
    /// output, and enriching its own output is a no-op.
    fn enrich(&self, content: &str, metadata: &Metadata) -> Enrichment;

    /// Optional deeper content analysis, stored under the `analysis` key.
    ///
    /// Pure, like `enrich`. Most modules have no analysis beyond their
    /// enrichment and return `None`.
    fn analyze(&self, _content: &str) -> Option<serde_json::Value> {
        None
    }
}

/// Output of one enrichment pass
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    /// Display title
    pub title: String,
    /// One-line summary
    pub summary: String,
    /// Derived keywords
    pub keywords: Vec<String>,
    /// Derived categories
    pub categories: Vec<String>,
    /// Importance in [0,1]
    pub importance_score: f32,
    /// Domain-specific metadata merged alongside the tracked keys
    pub extra: Metadata,
}

impl Enrichment {
    /// Merge this enrichment over caller metadata.
    ///
    /// Caller-provided title/summary/importance win; keyword and category
    /// sets are the deduplicated union of caller values and derivations,
    /// capped at ten. Applying the result to the same enricher again yields
    /// the same map.
    pub fn apply(&self, metadata: &Metadata) -> Metadata {
        let mut merged = metadata.clone();

        for (key, value) in &self.extra {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }

        merged
            .entry(keys::TITLE.to_string())
            .or_insert_with(|| json!(self.title));
        merged
            .entry(keys::SUMMARY.to_string())
            .or_insert_with(|| json!(self.summary));
        merged
            .entry(keys::IMPORTANCE_SCORE.to_string())
            .or_insert_with(|| json!(self.importance_score));

        let keywords = union_capped(
            crate::memory::string_set(metadata, keys::KEYWORDS),
            &self.keywords,
        );
        merged.insert(keys::KEYWORDS.to_string(), json!(keywords));

        let categories = union_capped(
            crate::memory::string_set(metadata, keys::CATEGORIES),
            &self.categories,
        );
        merged.insert(keys::CATEGORIES.to_string(), json!(categories));

        merged
    }

    /// The tracked fields as they will appear in the CMI, read back from a
    /// merged metadata map so caller overrides are respected.
    pub fn cmi_fields(metadata: &Metadata) -> CmiFields {
        CmiFields {
            title: crate::memory::string_field(metadata, keys::TITLE).unwrap_or_default(),
            summary: crate::memory::string_field(metadata, keys::SUMMARY).unwrap_or_default(),
            keywords: crate::memory::string_set(metadata, keys::KEYWORDS),
            categories: crate::memory::string_set(metadata, keys::CATEGORIES),
            importance_score: crate::memory::importance_score(metadata),
        }
    }
}

/// Sorted, deduplicated union of two keyword sets, capped at ten
fn union_capped(existing: Vec<String>, derived: &[String]) -> Vec<String> {
    let mut all: Vec<String> = existing;
    for term in derived {
        if !all.contains(term) {
            all.push(term.clone());
        }
    }
    all.sort();
    all.dedup();
    all.truncate(10);
    all
}

// ============================================================================
// SHARED TEXT HEURISTICS
// ============================================================================

/// Common English words excluded from keyword derivation
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "i",
    "in", "is", "it", "its", "my", "of", "on", "or", "our", "so", "that", "the", "their", "this",
    "to", "was", "we", "were", "what", "will", "with", "you", "your",
];

/// Words carrying positive sentiment
const POSITIVE_WORDS: &[&str] = &[
    "great", "good", "happy", "love", "excellent", "wonderful", "excited", "success", "thanks",
    "glad", "enjoy", "proud", "amazing",
];

/// Words carrying negative sentiment
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "sad", "angry", "hate", "terrible", "awful", "worried", "failure", "frustrated",
    "annoyed", "upset", "anxious", "afraid",
];

/// Lowercased alphanumeric tokens
pub(crate) fn tokens(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// First line, trimmed and capped, as a display title
pub(crate) fn derive_title(content: &str, max_chars: usize) -> String {
    let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    line.trim().chars().take(max_chars).collect()
}

/// First sentence or line as a summary
pub(crate) fn derive_summary(content: &str, max_chars: usize) -> String {
    let text = content.trim();
    let sentence_end = text
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, _)| i + 1)
        .unwrap_or(text.len());
    text[..sentence_end].trim().chars().take(max_chars).collect()
}

/// Most frequent non-stopword tokens, ties broken alphabetically
pub(crate) fn top_keywords(content: &str, n: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for token in tokens(content) {
        if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        match counts.iter_mut().find(|(t, _)| *t == token) {
            Some((_, c)) => *c += 1,
            None => counts.push((token, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.into_iter().take(n).map(|(t, _)| t).collect()
}

/// Whether any of the needles appears as a token
pub(crate) fn contains_any(token_list: &[String], needles: &[&str]) -> bool {
    token_list.iter().any(|t| needles.contains(&t.as_str()))
}

/// Crude sentiment polarity in [-1,1]
pub(crate) fn sentiment(token_list: &[String]) -> f32 {
    let positive = token_list
        .iter()
        .filter(|t| POSITIVE_WORDS.contains(&t.as_str()))
        .count() as f32;
    let negative = token_list
        .iter()
        .filter(|t| NEGATIVE_WORDS.contains(&t.as_str()))
        .count() as f32;
    let total = positive + negative;
    if total == 0.0 {
        0.0
    } else {
        (positive - negative) / total
    }
}

/// The token immediately following a trigger word ("project alpha" -> "alpha")
pub(crate) fn token_after(token_list: &[String], trigger: &str) -> Option<String> {
    token_list
        .windows(2)
        .find(|w| w[0] == trigger)
        .map(|w| w[1].clone())
}

/// First `YYYY-MM-DD` date in the raw content
pub(crate) fn find_iso_date(content: &str) -> Option<String> {
    for (i, _) in content.char_indices() {
        let candidate = &content[i..];
        if candidate.len() < 10 {
            break;
        }
        let bytes = candidate.as_bytes();
        let shape_ok = bytes[..10]
            .iter()
            .enumerate()
            .all(|(j, b)| match j {
                4 | 7 => *b == b'-',
                _ => b.is_ascii_digit(),
            });
        if shape_ok && candidate[..10].parse::<chrono::NaiveDate>().is_err() {
            continue;
        }
        if shape_ok {
            return Some(candidate[..10].to_string());
        }
    }
    None
}

/// Stable 32-bit fingerprint of a string (FNV-1a), hex encoded
pub(crate) fn fingerprint(text: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for b in text.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    format!("{hash:08x}")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEnricher;

    impl Enricher for FixedEnricher {
        fn module_id(&self) -> &'static str {
            "fixed"
        }
        fn module_name(&self) -> &'static str {
            "Fixed"
        }
        fn description(&self) -> &'static str {
            ""
        }
        fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
            Enrichment {
                title: derive_title(content, 60),
                summary: derive_summary(content, 120),
                keywords: top_keywords(content, 5),
                categories: vec!["fixed".into()],
                importance_score: 0.5,
                extra: Metadata::new(),
            }
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let enricher = FixedEnricher;
        let content = "Rust borrow checker notes. Lifetimes bind references to scopes.";

        let once = enricher.enrich(content, &Metadata::new()).apply(&Metadata::new());
        let twice = enricher.enrich(content, &once).apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn caller_title_wins() {
        let enricher = FixedEnricher;
        let mut supplied = Metadata::new();
        supplied.insert("title".into(), json!("my own title"));

        let merged = enricher.enrich("some content here", &supplied).apply(&supplied);
        assert_eq!(merged.get("title"), Some(&json!("my own title")));
    }

    #[test]
    fn keyword_union_caps_at_ten() {
        let existing: Vec<String> = (0..8).map(|i| format!("have{i}")).collect();
        let derived: Vec<String> = (0..8).map(|i| format!("new{i}")).collect();
        let merged = union_capped(existing, &derived);
        assert_eq!(merged.len(), 10);
    }

    #[test]
    fn title_and_summary_derivation() {
        let content = "First line title\nSecond line. More text follows here.";
        assert_eq!(derive_title(content, 60), "First line title");
        assert_eq!(derive_summary(content, 120), "First line title");

        let content = "One sentence. Another sentence.";
        assert_eq!(derive_summary(content, 120), "One sentence.");
    }

    #[test]
    fn keywords_skip_stopwords_and_short_tokens() {
        let kws = top_keywords("the cat sat on the mat with the cat", 3);
        assert_eq!(kws[0], "cat");
        assert!(!kws.contains(&"the".to_string()));
        assert!(!kws.contains(&"on".to_string()));
    }

    #[test]
    fn sentiment_polarity() {
        assert!(sentiment(&tokens("this is great and wonderful")) > 0.9);
        assert!(sentiment(&tokens("terrible awful day")) < -0.9);
        assert_eq!(sentiment(&tokens("neutral statement")), 0.0);
    }

    #[test]
    fn iso_date_extraction() {
        assert_eq!(
            find_iso_date("due on 2026-03-14 at noon"),
            Some("2026-03-14".to_string())
        );
        assert_eq!(find_iso_date("no date here"), None);
        // Shape matches but not a real date
        assert_eq!(find_iso_date("9999-99-99"), None);
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }
}
