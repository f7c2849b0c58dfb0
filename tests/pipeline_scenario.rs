//! End-to-end pipeline: signed webhook → main queue → processor → Lunch Money,
//! with accounts reconciled first and a DLQ round trip.
//!
//! Both HTTP collaborators are wiremock servers; broker and mapping store are
//! the in-process implementations.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledger_sync::broker::{MemoryQueue, QueuePolicy};
use ledger_sync::clients::{LunchMoneyClient, UpBankClient};
use ledger_sync::config::ApiConfig;
use ledger_sync::core_types::MappingKind;
use ledger_sync::mapping::{MappingStore, MemoryMappingStore};
use ledger_sync::processor::{Processor, ProcessorSettings};
use ledger_sync::reconcile::AccountReconciler;
use ledger_sync::redrive::DlqRedrive;
use ledger_sync::webhook::signature::compute_signature;
use ledger_sync::webhook::{WebhookIngest, WebhookState, router};

const SECRET: &str = "whsec_scenario";
const HEADER: &str = "X-Up-Authenticity-Signature";
const COFFEE: &str =
    r#"{"source_transaction_id":"txn_1","source_account_id":"acc_1","amount":-500,"description":"Coffee"}"#;

// =============================================================================
// Helpers
// =============================================================================

struct Pipeline {
    up: MockServer,
    lunch_money: MockServer,
    main: Arc<MemoryQueue>,
    dlq: Arc<MemoryQueue>,
    mappings: Arc<MemoryMappingStore>,
    processor: Processor,
    app: axum::Router,
}

fn api_config(base_url: String) -> ApiConfig {
    ApiConfig {
        base_url,
        api_key_env: "UNUSED".to_string(),
        api_key: "token".to_string(),
        http_timeout_secs: 5,
    }
}

async fn pipeline(policy: QueuePolicy) -> Pipeline {
    let up = MockServer::start().await;
    let lunch_money = MockServer::start().await;

    let (main, dlq) = MemoryQueue::pair("main", "dlq", policy);
    let mappings = Arc::new(MemoryMappingStore::new());
    let source = Arc::new(UpBankClient::new(&api_config(up.uri())).unwrap());
    let target = Arc::new(LunchMoneyClient::new(&api_config(lunch_money.uri())).unwrap());

    let processor = Processor::new(
        main.clone(),
        source,
        target,
        mappings.clone(),
        ProcessorSettings::default(),
    );

    let ingest = WebhookIngest::new(main.clone(), SECRET);
    let state = Arc::new(WebhookState::new(ingest, HEADER).unwrap());

    Pipeline {
        up,
        lunch_money,
        main,
        dlq,
        mappings,
        processor,
        app: router(state, 256 * 1024),
    }
}

fn signed_webhook(body: &'static str) -> Request<Body> {
    let signature = compute_signature(SECRET.as_bytes(), body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header(HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

async fn mount_source(p: &Pipeline) {
    Mock::given(method("GET"))
        .and(path("/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "type": "accounts",
                "id": "acc_1",
                "attributes": {
                    "displayName": "Spending",
                    "accountType": "TRANSACTIONAL",
                    "balance": {"currencyCode": "AUD", "value": "100.00", "valueInBaseUnits": 10000}
                }
            }],
            "links": {"next": null}
        })))
        .mount(&p.up)
        .await;

    Mock::given(method("GET"))
        .and(path("/transactions/txn_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "type": "transactions",
                "id": "txn_1",
                "attributes": {
                    "status": "SETTLED",
                    "description": "Coffee",
                    "message": null,
                    "amount": {"currencyCode": "AUD", "value": "-5.00", "valueInBaseUnits": -500},
                    "roundUp": null,
                    "createdAt": "2025-12-10T08:00:00+11:00",
                    "settledAt": "2025-12-10T09:00:00+11:00"
                },
                "relationships": {
                    "account": {"data": {"type": "accounts", "id": "acc_1"}},
                    "category": {"data": null}
                }
            }
        })))
        .mount(&p.up)
        .await;
}

async fn mount_assets(p: &Pipeline) {
    Mock::given(method("GET"))
        .and(path("/assets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"assets": []})))
        .mount(&p.lunch_money)
        .await;
    Mock::given(method("POST"))
        .and(path("/assets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&p.lunch_money)
        .await;
}

fn coffee_post() -> wiremock::MockBuilder {
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .and(body_partial_json(json!({
            "transactions": [{
                "external_id": "txn_1",
                "asset_id": 7,
                "amount": "-5.00",
                "payee": "Coffee",
                "date": "2025-12-10"
            }],
            "debit_as_negative": true
        })))
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_coffee_is_synced_once() {
    let p = pipeline(QueuePolicy::default()).await;
    mount_source(&p).await;
    mount_assets(&p).await;

    // First delivery creates the record, the redelivery finds it
    coffee_post()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": [501]})))
        .up_to_n_times(1)
        .expect(1)
        .mount(&p.lunch_money)
        .await;
    coffee_post()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": []})))
        .expect(1)
        .mount(&p.lunch_money)
        .await;

    let accounts = AccountReconciler::new(
        Arc::new(UpBankClient::new(&api_config(p.up.uri())).unwrap()),
        Arc::new(LunchMoneyClient::new(&api_config(p.lunch_money.uri())).unwrap()),
        p.mappings.clone(),
        Duration::from_secs(60),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(accounts.newly_mapped, 1);
    assert_eq!(
        p.mappings.get(MappingKind::Account, "acc_1").await.unwrap(),
        Some(7)
    );

    let response = p.app.clone().oneshot(signed_webhook(COFFEE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(p.main.len(), 1);

    let report = p.processor.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(p.main.is_empty());

    // The bank retries the webhook; the ledger must not gain a second record
    let response = p.app.clone().oneshot(signed_webhook(COFFEE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = p.processor.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(p.main.is_empty());
}

#[tokio::test]
async fn test_unsigned_webhook_never_reaches_the_ledger() {
    let p = pipeline(QueuePolicy::default()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header(HEADER, "0".repeat(64))
        .body(Body::from(COFFEE))
        .unwrap();
    let response = p.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(p.main.is_empty());
    assert_eq!(p.processor.run_once().await.unwrap().received, 0);
}

#[tokio::test]
async fn test_rejected_message_is_dead_lettered_and_redriven() {
    // No visibility delay so every receive sees the message again
    let policy = QueuePolicy {
        visibility_timeout: Duration::ZERO,
        max_receive_count: 2,
        ..QueuePolicy::default()
    };
    let p = pipeline(policy).await;
    mount_source(&p).await;
    p.mappings
        .put(MappingKind::Account, "acc_1", 7, None)
        .await
        .unwrap();

    // The ledger refuses the record until the asset is fixed
    Mock::given(method("POST"))
        .and(path("/transactions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": ["asset_id 7 is archived"]
        })))
        .expect(2)
        .mount(&p.lunch_money)
        .await;

    let response = p.app.clone().oneshot(signed_webhook(COFFEE)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(p.processor.run_once().await.unwrap().failed, 1);
    assert_eq!(p.processor.run_once().await.unwrap().failed, 1);
    // Third receive finds the delivery budget spent
    assert_eq!(p.processor.run_once().await.unwrap().received, 0);
    assert!(p.main.is_empty());
    assert_eq!(p.dlq.len(), 1);

    p.lunch_money.reset().await;
    coffee_post()
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": [502]})))
        .expect(1)
        .mount(&p.lunch_money)
        .await;

    let redriven = DlqRedrive::new(p.dlq.clone(), p.main.clone())
        .run(10)
        .await
        .unwrap();
    assert_eq!(redriven.redriven_count, 1);
    assert!(p.dlq.is_empty());

    let report = p.processor.run_once().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(p.main.is_empty());
}
