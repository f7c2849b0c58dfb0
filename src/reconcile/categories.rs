//! Category Reconciler
//!
//! Two-pass hierarchy resolution over the fully collected source listing.
//! Parents become target category groups, children become categories inside
//! their parent's group.
//!
//! # Invariants
//!
//! 1. **Complete listing**: every page is collected before any write, so a
//!    child listed before its parent still resolves in the same run
//! 2. **Parents first**: a child is only written once its parent's mapping
//!    exists, and its mapping carries both parent ids
//! 3. **No duplicates**: an id seen on several pages is reconciled once

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Budget, ReconcileError, ReconcileReport};
use crate::clients::{SourceApi, SourceCategory, TargetApi};
use crate::core_types::{MappingKind, TargetId};
use crate::mapping::{CategoryMapping, MappingStore};

pub struct CategoryReconciler {
    source: Arc<dyn SourceApi>,
    target: Arc<dyn TargetApi>,
    mappings: Arc<dyn MappingStore>,
    budget: Duration,
    max_pages: usize,
}

/// Result of attempting one category
enum Step {
    Done,
    /// Parent not mapped yet
    Waiting,
}

impl CategoryReconciler {
    pub fn new(
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        mappings: Arc<dyn MappingStore>,
        budget: Duration,
        max_pages: usize,
    ) -> Self {
        Self {
            source,
            target,
            mappings,
            budget,
            max_pages,
        }
    }

    /// Collect every page, following the cursor until none is returned.
    ///
    /// A repeated cursor ends pagination. Duplicate ids keep their first occurrence.
    pub async fn collect_all(&self) -> Result<Vec<SourceCategory>, ReconcileError> {
        let mut seen_cursors = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            if pages >= self.max_pages {
                return Err(ReconcileError::PageLimit(self.max_pages));
            }
            let page = self
                .source
                .list_categories(cursor.as_deref())
                .await
                .map_err(|source| ReconcileError::Listing {
                    entity: "categories",
                    source,
                })?;
            pages += 1;

            for item in page.items {
                if seen_ids.insert(item.id.clone()) {
                    all.push(item);
                } else {
                    debug!(source_category_id = %item.id, "Duplicate category across pages");
                }
            }

            match page.next_cursor {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "Category cursor repeated, ending pagination");
                    break;
                }
                None => break,
            }
        }

        debug!(pages, count = all.len(), "Collected source categories");
        Ok(all)
    }

    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let budget = Budget::start(self.budget);
        let categories = self.collect_all().await?;
        info!(count = categories.len(), "Reconciling source categories");

        let mut report = ReconcileReport::new(MappingKind::Category, categories.len());
        let (parents, mut pending): (Vec<_>, Vec<_>) =
            categories.into_iter().partition(|c| c.parent_id.is_none());

        // Pass 1: top-level categories
        for (i, category) in parents.iter().enumerate() {
            if budget.exhausted() {
                Self::abandon(&mut report, parents[i..].iter().chain(&pending));
                report.log_summary();
                return Ok(report);
            }
            self.reconcile_one(category, None, &mut report).await;
        }

        // Pass 2: children, repeated while some child's parent got mapped last round
        let mut round = 0;
        while !pending.is_empty() {
            round += 1;
            let before = pending.len();
            let mut waiting = Vec::new();

            for (i, category) in pending.iter().enumerate() {
                if budget.exhausted() {
                    Self::abandon(&mut report, waiting.iter().chain(&pending[i..]));
                    report.log_summary();
                    return Ok(report);
                }
                match self.reconcile_child(category, &mut report).await {
                    Step::Done => {}
                    Step::Waiting => waiting.push(category.clone()),
                }
            }

            pending = waiting;
            debug!(
                round,
                resolved = before - pending.len(),
                remaining = pending.len(),
                "Child pass"
            );
            if pending.len() == before {
                break;
            }
        }

        for orphan in &pending {
            let parent = orphan.parent_id.as_deref().unwrap_or_default();
            report.record_failure(
                &orphan.id,
                format!("parent category {} is not mapped", parent),
            );
        }

        report.log_summary();
        Ok(report)
    }

    fn abandon<'a>(
        report: &mut ReconcileReport,
        remaining: impl Iterator<Item = &'a SourceCategory>,
    ) {
        report.budget_exhausted = true;
        for category in remaining {
            report.record_failure(&category.id, "invocation budget exhausted");
        }
    }

    async fn reconcile_child(
        &self,
        category: &SourceCategory,
        report: &mut ReconcileReport,
    ) -> Step {
        let Some(parent_id) = category.parent_id.as_deref() else {
            self.reconcile_one(category, None, report).await;
            return Step::Done;
        };

        match self.mappings.get(MappingKind::Category, parent_id).await {
            Ok(Some(target_parent)) => {
                self.reconcile_one(category, Some(target_parent), report).await;
                Step::Done
            }
            Ok(None) => Step::Waiting,
            Err(e) => {
                report.record_failure(&category.id, e.to_string());
                Step::Done
            }
        }
    }

    async fn reconcile_one(
        &self,
        category: &SourceCategory,
        target_parent: Option<TargetId>,
        report: &mut ReconcileReport,
    ) {
        match self.mappings.get_category(&category.id).await {
            Ok(Some(existing)) => {
                debug!(
                    source_category_id = %category.id,
                    target_category_id = existing.target_category_id,
                    "Category already mapped"
                );
                report.already_mapped += 1;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                report.record_failure(&category.id, e.to_string());
                return;
            }
        }

        let target_id = match self
            .target
            .create_or_find_category(&category.name, target_parent)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                report.record_failure(&category.id, e.to_string());
                return;
            }
        };

        let mapping = CategoryMapping {
            source_parent_id: category.parent_id.clone(),
            target_parent_id: target_parent,
            category_name: Some(category.name.clone()),
            ..CategoryMapping::new(category.id.clone(), target_id)
        };
        match self.mappings.put_category(&mapping).await {
            Ok(()) => {
                info!(
                    source_category_id = %category.id,
                    target_category_id = target_id,
                    target_parent_id = ?target_parent,
                    name = %category.name,
                    "Category mapped"
                );
                report.newly_mapped += 1;
            }
            Err(e) => report.record_failure(&category.id, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::CategoryPage;
    use crate::clients::mock::{MockSource, MockTarget};
    use crate::mapping::MemoryMappingStore;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    fn cat(id: &str, parent: Option<&str>) -> SourceCategory {
        SourceCategory {
            id: id.into(),
            name: id.replace('-', " "),
            parent_id: parent.map(str::to_string),
        }
    }

    fn setup() -> (
        Arc<MockSource>,
        Arc<MockTarget>,
        Arc<MemoryMappingStore>,
        CategoryReconciler,
    ) {
        let source = Arc::new(MockSource::new());
        let target = Arc::new(MockTarget::new());
        let mappings = Arc::new(MemoryMappingStore::new());
        let reconciler = CategoryReconciler::new(
            source.clone(),
            target.clone(),
            mappings.clone(),
            Duration::from_secs(300),
            100,
        );
        (source, target, mappings, reconciler)
    }

    #[tokio::test]
    async fn test_child_before_parent_resolves_in_one_run() {
        let (source, target, mappings, reconciler) = setup();
        source.set_category_pages(vec![
            vec![cat("restaurants-and-cafes", Some("good-life")), cat("home", None)],
            vec![cat("good-life", None)],
        ]);

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.newly_mapped, 3);
        assert!(report.is_clean());

        let parent = mappings.get_category("good-life").await.unwrap().unwrap();
        let child = mappings
            .get_category("restaurants-and-cafes")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child.target_parent_id, Some(parent.target_category_id));
        assert_eq!(child.source_parent_id.as_deref(), Some("good-life"));
        assert_eq!(child.category_name.as_deref(), Some("restaurants and cafes"));
        assert_eq!(
            target.category_id("restaurants and cafes", Some(parent.target_category_id)),
            Some(child.target_category_id)
        );
    }

    #[tokio::test]
    async fn test_collects_union_of_all_pages() {
        let (source, _target, mappings, reconciler) = setup();
        source.set_category_pages(vec![
            vec![cat("a", None), cat("b", None)],
            vec![cat("c", None), cat("b", None)],
            vec![cat("d", Some("a"))],
        ]);

        let collected = reconciler.collect_all().await.unwrap();
        let ids: Vec<_> = collected.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        assert_eq!(source.page_calls.load(Ordering::SeqCst), 3);

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(mappings.category_count(), 4);
    }

    #[tokio::test]
    async fn test_cursor_cycle_ends_pagination() {
        let (source, _target, _mappings, reconciler) = setup();
        let mut pages = BTreeMap::new();
        pages.insert(
            String::new(),
            CategoryPage {
                items: vec![cat("a", None)],
                next_cursor: Some("p1".into()),
            },
        );
        pages.insert(
            "p1".into(),
            CategoryPage {
                items: vec![cat("b", None)],
                next_cursor: Some("p1".into()),
            },
        );
        *source.category_pages.lock().unwrap() = pages;

        let collected = reconciler.collect_all().await.unwrap();
        assert_eq!(collected.len(), 2);
        assert_eq!(source.page_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_page_limit() {
        let (source, target, mappings, _) = setup();
        source.set_category_pages(vec![vec![cat("a", None)], vec![cat("b", None)], vec![]]);
        let reconciler =
            CategoryReconciler::new(source, target, mappings, Duration::from_secs(300), 2);

        assert!(matches!(
            reconciler.run().await,
            Err(ReconcileError::PageLimit(2))
        ));
    }

    #[tokio::test]
    async fn test_rerun_keeps_one_mapping_per_source() {
        let (source, target, mappings, reconciler) = setup();
        source.set_category_pages(vec![vec![cat("good-life", None), cat("games", Some("good-life"))]]);

        reconciler.run().await.unwrap();
        let first = mappings.categories();
        let report = reconciler.run().await.unwrap();

        assert_eq!(report.already_mapped, 2);
        assert_eq!(report.newly_mapped, 0);
        assert_eq!(mappings.categories(), first);
        assert_eq!(target.categories.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_parent_reports_its_children() {
        let (source, target, mappings, reconciler) = setup();
        source.set_category_pages(vec![vec![
            cat("good-life", None),
            cat("games", Some("good-life")),
            cat("home", None),
            cat("groceries", Some("home")),
        ]]);
        target.fail_categories.lock().unwrap().insert("good life".into());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.newly_mapped, 2);
        assert_eq!(report.failed, 2);
        let failed: Vec<_> = report.errors.iter().map(|e| e.source_id.as_str()).collect();
        assert_eq!(failed, ["good-life", "games"]);
        assert!(mappings.get_category("groceries").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_orphan_child_is_reported_not_fatal() {
        let (source, _target, mappings, reconciler) = setup();
        source.set_category_pages(vec![vec![cat("home", None), cat("games", Some("missing"))]]);

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.newly_mapped, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].reason.contains("missing"));
        assert!(mappings.get_category("games").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let (source, _target, mappings, reconciler) = setup();
        *source.fail_category_listing.lock().unwrap() = true;

        assert!(matches!(
            reconciler.run().await,
            Err(ReconcileError::Listing { .. })
        ));
        assert_eq!(mappings.category_count(), 0);
    }
}
