// [tests/mirror/libs/infra/db/usage_summary_idempotency.test.rs]
use std::collections::BTreeMap;
use std::sync::Arc;

use botplane_domain_metering::{summarize_window, MeterEvent};
use botplane_infra_db::{DbClient, MeteringRepository};
use uuid::Uuid;

fn event(tenant: &str, ts: i64, cost: i64, charge: i64) -> MeterEvent {
    MeterEvent {
        id: Uuid::new_v4(),
        tenant_id: tenant.into(),
        capability: "chat".into(),
        provider: "openai".into(),
        cost,
        charge,
        timestamp_ms: ts,
        session_id: None,
        duration_ms: Some(10),
        usage_units: Some(1.0),
        usage_unit_type: Some("call".into()),
        tier: None,
        metadata: BTreeMap::new(),
    }
}

#[tokio::test]
async fn rerunning_the_aggregator_over_the_same_window_does_not_duplicate_rows() {
    let client = DbClient::connect(":memory:", None).await.unwrap();
    let metering = MeteringRepository::new(Arc::new(client));

    let events = vec![event("tenant-1", 1_000, 5, 10), event("tenant-1", 2_000, 3, 6)];
    for e in &events {
        metering.insert_event_if_absent(e).await.unwrap();
    }

    let summaries = summarize_window(&events, 0, 60_000);
    metering.insert_summaries_if_absent(&summaries).await.unwrap();
    metering.insert_summaries_if_absent(&summaries).await.unwrap();

    let stored = metering.events_in_window(0, 60_000).await.unwrap();
    assert_eq!(stored.len(), 2, "replaying insert_event_if_absent must not duplicate events");

    assert_eq!(metering.high_water_mark().await.unwrap(), Some(0));
}

#[tokio::test]
async fn replaying_the_same_event_id_is_a_no_op() {
    let client = DbClient::connect(":memory:", None).await.unwrap();
    let metering = MeteringRepository::new(Arc::new(client));

    let e = event("tenant-2", 500, 1, 2);
    assert!(metering.insert_event_if_absent(&e).await.unwrap());
    assert!(!metering.insert_event_if_absent(&e).await.unwrap());

    let stored = metering.events_in_window(0, 60_000).await.unwrap();
    assert_eq!(stored.len(), 1);
}
