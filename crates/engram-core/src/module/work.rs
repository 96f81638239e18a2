//! Work memory - projects, tasks, and deadlines.

use std::sync::Arc;

use serde_json::json;

use super::base::{BaseModule, ModuleDeps};
use super::enrich::{
    contains_any, derive_summary, derive_title, find_iso_date, token_after, tokens, top_keywords,
    Enricher, Enrichment,
};
use super::{MemoryModule, ModuleConfig, ModuleType};
use crate::error::CoreError;
use crate::memory::Metadata;

const DONE_MARKERS: &[&str] = &["done", "completed", "shipped", "closed", "resolved"];
const BLOCKED_MARKERS: &[&str] = &["blocked", "waiting", "stuck", "paused"];
const ACTIVE_MARKERS: &[&str] = &["started", "progress", "working", "ongoing"];

/// Enricher for the work module
pub struct WorkEnricher;

impl Enricher for WorkEnricher {
    fn module_id(&self) -> &'static str {
        "work"
    }

    fn module_name(&self) -> &'static str {
        "Work Memory"
    }

    fn description(&self) -> &'static str {
        "Projects, tasks, status, and deadlines"
    }

    fn enrich(&self, content: &str, _metadata: &Metadata) -> Enrichment {
        let token_list = tokens(content);

        let project = token_after(&token_list, "project");
        let due_date = find_iso_date(content);

        let status = if contains_any(&token_list, DONE_MARKERS) {
            "done"
        } else if contains_any(&token_list, BLOCKED_MARKERS) {
            "blocked"
        } else if contains_any(&token_list, ACTIVE_MARKERS) {
            "in_progress"
        } else {
            "todo"
        };

        let mut categories = vec!["work".to_string(), status.to_string()];
        if let Some(project) = &project {
            categories.push(project.clone());
        }

        // Deadlines and blockers push a task up the routing order
        let importance_score = match (due_date.is_some(), status) {
            (_, "blocked") => 0.8,
            (true, _) => 0.7,
            (_, "done") => 0.3,
            _ => 0.5,
        };

        let mut extra = Metadata::new();
        extra.insert("status".into(), json!(status));
        if let Some(project) = project {
            extra.insert("project".into(), json!(project));
        }
        if let Some(due) = due_date {
            extra.insert("dueDate".into(), json!(due));
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

/// Construct the work module over the shared services.
pub fn module(deps: &ModuleDeps) -> Result<Arc<dyn MemoryModule>, CoreError> {
    let enricher = Arc::new(WorkEnricher);
    let config = ModuleConfig::for_type(
        enricher.module_id(),
        enricher.module_name(),
        enricher.description(),
        ModuleType::Standard,
    );
    let module: Arc<dyn MemoryModule> = BaseModule::new(deps, enricher, config)?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrich(content: &str) -> Enrichment {
        WorkEnricher.enrich(content, &Metadata::new())
    }

    #[test]
    fn project_and_due_date_extraction() {
        let e = enrich("Project atlas report is due 2026-09-01");
        assert_eq!(e.extra.get("project"), Some(&json!("atlas")));
        assert_eq!(e.extra.get("dueDate"), Some(&json!("2026-09-01")));
        assert!(e.importance_score >= 0.7);
    }

    #[test]
    fn status_detection_precedence() {
        assert_eq!(enrich("task completed yesterday").extra.get("status"), Some(&json!("done")));
        assert_eq!(enrich("blocked on the api team").extra.get("status"), Some(&json!("blocked")));
        assert_eq!(enrich("started the migration").extra.get("status"), Some(&json!("in_progress")));
        assert_eq!(enrich("draft the proposal").extra.get("status"), Some(&json!("todo")));
    }

    #[test]
    fn finished_work_drops_in_importance() {
        assert!(enrich("shipped the release, all done").importance_score < 0.5);
    }
}
