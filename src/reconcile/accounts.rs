//! Account Reconciler
//!
//! Source accounts become target assets, matched by exact name.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{Budget, ReconcileError, ReconcileReport};
use crate::clients::{AssetRequest, SourceAccount, SourceApi, TargetApi};
use crate::core_types::MappingKind;
use crate::mapping::{AccountMapping, MappingStore};

/// Every synced account is tracked as a manually managed cash asset
pub const ASSET_TYPE_NAME: &str = "cash";

pub struct AccountReconciler {
    source: Arc<dyn SourceApi>,
    target: Arc<dyn TargetApi>,
    mappings: Arc<dyn MappingStore>,
    budget: Duration,
}

impl AccountReconciler {
    pub fn new(
        source: Arc<dyn SourceApi>,
        target: Arc<dyn TargetApi>,
        mappings: Arc<dyn MappingStore>,
        budget: Duration,
    ) -> Self {
        Self {
            source,
            target,
            mappings,
            budget,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let budget = Budget::start(self.budget);
        let accounts = self
            .source
            .list_accounts()
            .await
            .map_err(|source| ReconcileError::Listing {
                entity: "accounts",
                source,
            })?;

        info!(count = accounts.len(), "Reconciling source accounts");
        let mut report = ReconcileReport::new(MappingKind::Account, accounts.len());

        for (i, account) in accounts.iter().enumerate() {
            if budget.exhausted() {
                report.budget_exhausted = true;
                for skipped in &accounts[i..] {
                    report.record_failure(&skipped.id, "invocation budget exhausted");
                }
                break;
            }
            self.reconcile_one(account, &mut report).await;
        }

        report.log_summary();
        Ok(report)
    }

    async fn reconcile_one(&self, account: &SourceAccount, report: &mut ReconcileReport) {
        match self.mappings.get_account(&account.id).await {
            Ok(Some(existing)) => {
                debug!(
                    source_account_id = %account.id,
                    target_asset_id = existing.target_asset_id,
                    "Account already mapped"
                );
                report.already_mapped += 1;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                report.record_failure(&account.id, e.to_string());
                return;
            }
        }

        let request = AssetRequest {
            name: account.display_name.clone(),
            type_name: ASSET_TYPE_NAME.to_string(),
            balance_minor: account.balance_minor,
            currency: account.currency.to_lowercase(),
        };
        let asset_id = match self.target.create_or_find_asset(&request).await {
            Ok(id) => id,
            Err(e) => {
                report.record_failure(&account.id, e.to_string());
                return;
            }
        };

        let mapping = AccountMapping {
            account_name: Some(account.display_name.clone()),
            account_type: Some(account.account_type.clone()),
            ..AccountMapping::new(account.id.clone(), asset_id)
        };
        match self.mappings.put_account(&mapping).await {
            Ok(()) => {
                info!(
                    source_account_id = %account.id,
                    target_asset_id = asset_id,
                    name = %account.display_name,
                    "Account mapped"
                );
                report.newly_mapped += 1;
            }
            Err(e) => report.record_failure(&account.id, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{MockSource, MockTarget};
    use crate::mapping::MemoryMappingStore;

    fn account(id: &str, name: &str) -> SourceAccount {
        SourceAccount {
            id: id.into(),
            display_name: name.into(),
            account_type: "TRANSACTIONAL".into(),
            balance_minor: 12_345,
            currency: "AUD".into(),
        }
    }

    fn setup() -> (
        Arc<MockSource>,
        Arc<MockTarget>,
        Arc<MemoryMappingStore>,
        AccountReconciler,
    ) {
        let source = Arc::new(MockSource::new());
        let target = Arc::new(MockTarget::new());
        let mappings = Arc::new(MemoryMappingStore::new());
        let reconciler = AccountReconciler::new(
            source.clone(),
            target.clone(),
            mappings.clone(),
            Duration::from_secs(300),
        );
        (source, target, mappings, reconciler)
    }

    #[tokio::test]
    async fn test_maps_new_accounts() {
        let (source, target, mappings, reconciler) = setup();
        source.set_accounts(vec![account("acc_1", "Spending"), account("acc_2", "Savings")]);

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.newly_mapped, 2);
        assert!(report.is_clean());

        let mapping = mappings.get_account("acc_1").await.unwrap().unwrap();
        assert_eq!(
            Some(mapping.target_asset_id),
            target.assets.lock().unwrap().get("Spending").copied()
        );
        assert_eq!(mapping.account_name.as_deref(), Some("Spending"));
        assert_eq!(mapping.account_type.as_deref(), Some("TRANSACTIONAL"));
    }

    #[tokio::test]
    async fn test_rerun_skips_mapped_accounts() {
        let (source, target, mappings, reconciler) = setup();
        source.set_accounts(vec![account("acc_1", "Spending")]);

        reconciler.run().await.unwrap();
        let report = reconciler.run().await.unwrap();

        assert_eq!(report.already_mapped, 1);
        assert_eq!(report.newly_mapped, 0);
        assert_eq!(mappings.account_count(), 1);
        assert_eq!(target.assets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let (source, target, mappings, reconciler) = setup();
        source.set_accounts(vec![
            account("acc_1", "Spending"),
            account("acc_2", "Broken"),
            account("acc_3", "Savings"),
        ]);
        target.fail_assets.lock().unwrap().insert("Broken".into());

        let report = reconciler.run().await.unwrap();

        assert_eq!(report.newly_mapped, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].source_id, "acc_2");
        assert!(mappings.get_account("acc_2").await.unwrap().is_none());
        assert!(mappings.get_account("acc_3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_existing_target_asset_is_reused() {
        let (source, target, mappings, reconciler) = setup();
        target.assets.lock().unwrap().insert("Spending".into(), 77);
        source.set_accounts(vec![account("acc_1", "Spending")]);

        reconciler.run().await.unwrap();

        assert_eq!(
            mappings.get(MappingKind::Account, "acc_1").await.unwrap(),
            Some(77)
        );
    }
}
