// [tests/mirror/apps/control-plane/autotopup_scenario.test.rs]
use std::sync::Arc;

use botplane_control_plane::services::AutoTopupController;
use botplane_control_plane::state::KeyedMutexMap;
use botplane_domain_billing::{AutoTopupSettings, TransactionType};
use botplane_domain_metering::{summarize_window, MeterEvent};
use botplane_infra_db::{DbClient, LedgerRepository, MeteringRepository, NotificationRepository};
use botplane_infra_payments::StripeLikeProcessor;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use uuid::Uuid;

const UNREACHABLE_PAYMENT_PROCESSOR: &str = "http://127.0.0.1:1";

async fn in_memory_ledger() -> Arc<LedgerRepository> {
    let client = DbClient::connect(":memory:", None).await.expect("in-memory database should bootstrap");
    Arc::new(LedgerRepository::new(Arc::new(client)))
}

async fn in_memory_notifications() -> Arc<NotificationRepository> {
    let client = DbClient::connect(":memory:", None).await.expect("in-memory database should bootstrap");
    Arc::new(NotificationRepository::new(Arc::new(client)))
}

async fn in_memory_metering() -> MeteringRepository {
    let client = DbClient::connect(":memory:", None).await.expect("in-memory database should bootstrap");
    MeteringRepository::new(Arc::new(client))
}

fn default_settings(tenant_id: &str) -> AutoTopupSettings {
    AutoTopupSettings {
        tenant_id: tenant_id.to_string(),
        usage_enabled: true,
        usage_threshold: 1_000,
        usage_topup_amount: 2_000,
        usage_consecutive_failures: 0,
        usage_charge_in_flight: false,
        schedule_enabled: false,
        schedule_amount: 0,
        schedule_interval_hours: 0,
        schedule_next_at: None,
        schedule_consecutive_failures: 0,
    }
}

fn controller_against_unreachable_processor(ledger: Arc<LedgerRepository>, notifications: Arc<NotificationRepository>) -> AutoTopupController {
    let processor = Arc::new(StripeLikeProcessor::new(UNREACHABLE_PAYMENT_PROCESSOR, "sk_test_unreachable"));
    AutoTopupController::new(ledger, notifications, processor, KeyedMutexMap::new(), "ops@botplane.dev".to_string())
}

fn event(tenant: &str, capability: &str, ts: i64, cost: i64, charge: i64) -> MeterEvent {
    MeterEvent {
        id: Uuid::new_v4(),
        tenant_id: tenant.into(),
        capability: capability.into(),
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

/// Invariante "Ledger concurrency": tres escrituras concurrentes al mismo
/// tenant, cada una detrás del candado por tenant (como lo hace todo
/// llamador real), dejan un saldo final igual a la suma de los montos con
/// signo sin importar el orden en que el planificador las intercale.
#[tokio::test]
async fn concurrent_writes_to_the_same_tenant_settle_to_a_consistent_balance() {
    let ledger = in_memory_ledger().await;
    let tenant_locks = KeyedMutexMap::new();
    let tenant_id = "tenant-concurrent";

    let mut handles = Vec::new();
    for (index, (amount, is_credit)) in [(100i64, true), (50, true), (30, false)].into_iter().enumerate() {
        let ledger = ledger.clone();
        let tenant_locks = tenant_locks.clone();
        handles.push(tokio::spawn(async move {
            let _guard = tenant_locks.acquire(tenant_id).await;
            let reference_id = format!("concurrent-ref-{index}");
            if is_credit {
                ledger.credit(tenant_id, amount, TransactionType::Purchase, None, Some(&reference_id), None, None).await.unwrap();
            } else {
                // The debit races against the two credits landing first or last; a
                // rejection (insufficient balance) is an acceptable outcome here,
                // the invariant under test is consistency, not this debit's success.
                let _ = ledger.debit(tenant_id, amount, TransactionType::BotRuntime, None, Some(&reference_id)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let history = ledger.history(tenant_id, 10).await.unwrap();
    let mut running = 0i64;
    for row in history.iter().rev() {
        running += row.amount;
        assert_eq!(row.balance_after, running, "balance_after must match the running sum in commit order");
    }
    assert_eq!(ledger.get_balance(tenant_id).await.unwrap(), running);
}

/// Invariante "Auto-top-up mutual exclusion": dos disparos concurrentes
/// del modo por uso para el mismo tenant nunca cobran dos veces; el
/// candado por tenant serializa ambas llamadas, y la segunda encuentra el
/// saldo ya por encima del umbral.
#[tokio::test]
async fn concurrent_usage_topup_triggers_never_double_charge() {
    let ledger = in_memory_ledger().await;
    let notifications = in_memory_notifications().await;
    let tenant_id = "tenant-mutex";

    // A reachable-but-always-failing processor would also prove exclusion,
    // but crediting manually between the lock hand-off keeps this test
    // focused on the mutex rather than on the payment round-trip.
    ledger.credit(tenant_id, 0, TransactionType::Purchase, None, Some("seed"), None, None).await.ok();
    ledger
        .upsert_auto_topup_settings(&AutoTopupSettings { usage_threshold: 1_000, ..default_settings(tenant_id) })
        .await
        .unwrap();

    let controller = Arc::new(controller_against_unreachable_processor(ledger.clone(), notifications.clone()));

    let a = controller.clone();
    let b = controller.clone();
    let (result_a, result_b) = tokio::join!(
        tokio::spawn(async move { a.maybe_trigger_usage_topup(tenant_id).await }),
        tokio::spawn(async move { b.maybe_trigger_usage_topup(tenant_id).await }),
    );

    // Both calls observe the unreachable processor and fail; what the test
    // certifies is that the tenant lock serialized them rather than letting
    // them race inside the same `usage_charge_in_flight` window.
    assert!(result_a.unwrap().is_err());
    assert!(result_b.unwrap().is_err());

    let settings = ledger.get_auto_topup_settings(tenant_id).await.unwrap().unwrap();
    assert!(!settings.usage_charge_in_flight, "the flag must never be left raised after both calls return");
    assert_eq!(settings.usage_consecutive_failures, 2);
}

/// Invariante "Auto-top-up circuit break": tres fallos consecutivos del
/// modo por uso deshabilitan la auto-recarga para ese tenant; un cuarto
/// disparo ya no intenta cobrar en absoluto.
#[tokio::test]
async fn three_consecutive_usage_failures_trip_the_circuit_breaker() {
    let ledger = in_memory_ledger().await;
    let notifications = in_memory_notifications().await;
    let tenant_id = "tenant-breaker";

    ledger
        .upsert_auto_topup_settings(&AutoTopupSettings { usage_threshold: 1_000, ..default_settings(tenant_id) })
        .await
        .unwrap();

    let controller = controller_against_unreachable_processor(ledger.clone(), notifications.clone());

    for attempt in 1..=3 {
        let outcome = controller.maybe_trigger_usage_topup(tenant_id).await;
        assert!(outcome.is_err(), "attempt {attempt} should fail against an unreachable processor");
    }

    let tripped = ledger.get_auto_topup_settings(tenant_id).await.unwrap().unwrap();
    assert_eq!(tripped.usage_consecutive_failures, 3);
    assert!(!tripped.usage_enabled, "three consecutive failures must disable usage auto-top-up");

    // A fourth trigger is now a silent no-op: usage_enabled is false, so the
    // controller returns Ok(()) without touching the processor at all.
    let fourth = controller.maybe_trigger_usage_topup(tenant_id).await;
    assert!(fourth.is_ok());
    let after_fourth = ledger.get_auto_topup_settings(tenant_id).await.unwrap().unwrap();
    assert_eq!(after_fourth.usage_consecutive_failures, 3, "a disabled controller must not attempt another charge");

    let admin_due = notifications.due_entries(chrono::Utc::now(), 10).await.unwrap();
    assert!(
        admin_due.iter().any(|entry| entry.email_type == "autotopup_circuit_broken"),
        "tripping the breaker must enqueue an admin notification"
    );
}

/// Invariante "Webhook idempotency": la misma sesión de checkout
/// completada, entregada dos veces por el procesador (reintento de
/// entrega de webhook, comportamiento normal de Stripe), acredita el
/// libro mayor una sola vez. Reproduce exactamente los dos pasos que
/// ejecuta el manejador HTTP tras validar la firma: comprobar
/// `has_reference_id` y, si falta, `credit`.
#[tokio::test]
async fn replaying_the_same_checkout_webhook_credits_only_once() {
    let ledger = in_memory_ledger().await;
    let tenant_id = "tenant-webhook";
    let event_id = "evt_test_123";
    let reference_id = format!("checkout-{event_id}");
    let amount_cents = 2_500i64;

    let raw_body = serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "tenant_id": tenant_id, "amount_cents": amount_cents },
    })
    .to_string();
    let webhook_secret = "whsec_test_autotopup";
    let timestamp = "1700000000";

    let signature = {
        let mut mac = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(raw_body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    };
    assert!(botplane_infra_payments::verify_webhook_signature(raw_body.as_bytes(), timestamp, &signature, webhook_secret));

    for delivery in 0..3 {
        if ledger.has_reference_id(&reference_id).await.unwrap() {
            continue;
        }
        ledger
            .credit(tenant_id, amount_cents, TransactionType::Purchase, Some("checkout session completed"), Some(reference_id.as_str()), Some("stripe_webhook"), None)
            .await
            .unwrap_or_else(|err| panic!("delivery {delivery} should either credit once or be skipped, got {err}"));
    }

    assert_eq!(ledger.get_balance(tenant_id).await.unwrap(), amount_cents);
    assert_eq!(ledger.history(tenant_id, 10).await.unwrap().len(), 1);
}

/// Escenario de agregación (rollup): varios eventos de medición del mismo
/// tenant dentro de una ventana se resumen en una sola fila con el costo,
/// el cargo y el conteo totales; reinyectar el mismo lote de resúmenes no
/// cambia nada (ya cubierto como invariante de idempotencia en el resto
/// de la suite de medición, aquí sólo se certifica la suma en sí).
#[tokio::test]
async fn a_window_with_several_events_rolls_up_into_one_summary_per_capability() {
    let metering = in_memory_metering().await;
    let events = vec![
        event("tenant-rollup", "chat", 1_000, 2, 4),
        event("tenant-rollup", "chat", 2_000, 3, 6),
        event("tenant-rollup", "chat", 5_000, 1, 2),
        event("tenant-rollup", "voice", 6_000, 10, 20),
        event("tenant-rollup", "voice", 8_000, 5, 10),
    ];
    for e in &events {
        metering.insert_event_if_absent(e).await.unwrap();
    }

    let summaries = summarize_window(&events, 0, 60_000);
    let chat = summaries.iter().find(|s| s.capability == "chat").expect("a chat summary must exist");
    assert_eq!(chat.total_cost, 6);
    assert_eq!(chat.total_charge, 12);
    assert_eq!(chat.event_count, 3);

    let voice = summaries.iter().find(|s| s.capability == "voice").expect("a voice summary must exist");
    assert_eq!(voice.total_cost, 15);
    assert_eq!(voice.total_charge, 30);
    assert_eq!(voice.event_count, 2);

    metering.insert_summaries_if_absent(&summaries).await.unwrap();
    let before_replay = metering.high_water_mark().await.unwrap();
    metering.insert_summaries_if_absent(&summaries).await.unwrap();
    assert_eq!(metering.high_water_mark().await.unwrap(), before_replay);
}
