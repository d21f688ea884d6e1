//! Orderly Sync demo - drives an order-editing session against an in-memory
//! order service and prints the reconciled collection.

use std::sync::Arc;
use std::time::Duration;

use orderly_engine::{Record, Snapshot};
use orderly_sync::{InMemoryService, RecordService, SyncConfig, SyncCoordinator};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn seed_orders() -> Result<Vec<Record>, orderly_engine::Error> {
    [
        json!({"id": 1, "customer": "Ada", "total": 42.5, "status": "Unpaid"}),
        json!({"id": 2, "customer": "Grace", "total": 18.0, "status": "Paid"}),
        json!({"_id": "a7f3", "customer": "Linus", "total": 7.25, "status": "Unpaid"}),
        json!({"orderId": "L-1009", "customer": "Barbara", "total": 99.0, "status": "Shipped"}),
    ]
    .into_iter()
    .map(Record::from_value)
    .collect()
}

fn patch(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderly_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;

    tracing::info!(
        optimistic = config.enable_optimistic,
        reconcile_delay_ms = config.reconcile_delay.as_millis() as u64,
        "Starting Orderly sync demo"
    );

    let service = Arc::new(
        InMemoryService::with_records(seed_orders()?).with_latency(Duration::from_millis(120)),
    );
    let coordinator = SyncCoordinator::from_config(config, service.loader());
    coordinator.load().await?;

    // Create
    let draft = Record::default()
        .with_field("customer", json!("Edsger"))
        .with_field("total", json!(12.0))
        .with_field("status", json!("Unpaid"));
    let payload = draft.to_value();
    let created = coordinator
        .fast_create(&draft, || service.create(payload))
        .await?;
    let created_id = created
        .record
        .as_ref()
        .and_then(|r| r.resolved_id())
        .map(str::to_string)
        .ok_or("created order has no id")?;
    tracing::info!(id = %created_id, "Order created");

    // Mark paid
    let paid = patch(json!({"status": "Paid"}));
    coordinator
        .fast_update(&created_id, &paid, || {
            service.update(created_id.clone(), Value::Object(paid.clone()))
        })
        .await?;

    // A rejected edit rolls back
    service.fail_next();
    let unpaid = patch(json!({"status": "Unpaid"}));
    if let Err(e) = coordinator
        .fast_update(&created_id, &unpaid, || {
            service.update(created_id.clone(), Value::Object(unpaid.clone()))
        })
        .await
    {
        tracing::warn!(error = %e, "Edit rejected by the order service");
    }

    // Delete a legacy-keyed order
    coordinator
        .fast_delete("L-1009", || service.delete("L-1009".to_string()))
        .await?;

    coordinator.wait_for_reconciliation().await?;

    let snapshot = Snapshot::new(
        coordinator.data().to_vec(),
        chrono::Utc::now().timestamp_millis().max(0) as u64,
    );
    println!("{}", snapshot.to_json_pretty()?);

    coordinator.cancel_all();
    tracing::info!("Session finished");

    Ok(())
}
