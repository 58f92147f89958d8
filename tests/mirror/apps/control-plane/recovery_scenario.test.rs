// [tests/mirror/apps/control-plane/recovery_scenario.test.rs]
use std::sync::Arc;
use std::time::Duration;

use botplane_control_plane::services::{MigrationEngine, RecoveryManager};
use botplane_control_plane::state::NodeRegistry;
use botplane_domain_models::{
    BillingState, BotInstance, Node, NodeStatus, RecoveryEvent, RecoveryItem, RecoveryItemStatus, RecoveryStatus, RecoveryTrigger,
};
use botplane_infra_channel::{ChannelRegistry, ServerCommand};
use botplane_infra_db::{DbClient, FleetRepository, NotificationRepository, RecoveryRepository};
use botplane_infra_proxy::ReverseProxyClient;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

const UNREACHABLE_PROXY: &str = "http://127.0.0.1:1";

async fn harness() -> (Arc<FleetRepository>, Arc<RecoveryRepository>, Arc<NotificationRepository>, NodeRegistry, ChannelRegistry, Arc<ReverseProxyClient>) {
    let db = Arc::new(DbClient::connect(":memory:", None).await.expect("in-memory database should bootstrap"));
    let fleet_repo = Arc::new(FleetRepository::new(db.clone()));
    let recovery_repo = Arc::new(RecoveryRepository::new(db.clone()));
    let notification_repo = Arc::new(NotificationRepository::new(db.clone()));
    let node_registry = NodeRegistry::new(fleet_repo.clone());
    let channel_registry = ChannelRegistry::new();
    let routing = Arc::new(ReverseProxyClient::new(UNREACHABLE_PROXY, "test-token"));
    (fleet_repo, recovery_repo, notification_repo, node_registry, channel_registry, routing)
}

fn node(id: &str, host: &str, status: NodeStatus, capacity_mb: i64, used_mb: i64) -> Node {
    Node {
        id: id.to_string(),
        host: host.to_string(),
        status,
        capacity_mb,
        used_mb,
        last_heartbeat_at: Utc::now(),
        registered_at: Utc::now(),
    }
}

fn bot_instance(id: &str, tenant_id: &str, node_id: &str) -> BotInstance {
    BotInstance {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        name: format!("{tenant_id}-instance"),
        node_id: Some(node_id.to_string()),
        billing_state: BillingState::Active,
        destroy_after: None,
        created_at: Utc::now(),
    }
}

/// Conecta un nodo al registro de canal y responde `ok: true` a todo
/// mando que reciba, imitando el agente real sin abrir un socket.
fn spawn_compliant_node(channel_registry: &ChannelRegistry, node_id: &str) {
    let channel_registry = channel_registry.clone();
    let node_id = node_id.to_string();
    tokio::spawn(async move {
        let mut receiver = channel_registry.register(&node_id).await;
        while let Some(ServerCommand::Command { command_id, .. }) = receiver.recv().await {
            channel_registry.resolve_command(&command_id, true, json!({})).await;
        }
    });
}

// --- S1: migration happy path ---------------------------------------------

#[tokio::test]
async fn s1_migration_happy_path_moves_capacity_and_updates_routing() {
    let (fleet_repo, _recovery_repo, notification_repo, node_registry, channel_registry, routing) = harness().await;

    node_registry.register("node-1", "10.0.0.1:9100", 4096).await.unwrap();
    node_registry.register("node-2", "10.0.0.2:9100", 1600).await.unwrap();
    node_registry.add_node_capacity("node-2", 100).await.unwrap(); // leaves exactly 1500 free, per the scenario

    spawn_compliant_node(&channel_registry, "node-1");
    spawn_compliant_node(&channel_registry, "node-2");

    let engine = MigrationEngine::new(
        fleet_repo.clone(),
        notification_repo,
        node_registry.clone(),
        channel_registry,
        routing,
        "ops@botplane.dev".to_string(),
    );

    let instance = bot_instance("bot-123", "tenant-abc", "node-1");
    let result = engine.migrate_tenant(&instance, Some("node-2")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.source_node_id, "node-1");
    assert_eq!(result.target_node_id, "node-2");
    assert!(result.error.is_none());

    let node1 = node_registry.get("node-1").await.unwrap();
    let node2 = node_registry.get("node-2").await.unwrap();
    assert_eq!(node1.used_mb, -100, "source frees exactly the bot's footprint");
    assert_eq!(node2.used_mb, 200, "target gains exactly the bot's footprint");

    let moved = fleet_repo.instances_on_node("node-2").await.unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id, "bot-123");
}

/// Invariante "Migration atomicity": si cualquiera de las seis etapas
/// del canal falla, ni la capacidad de los nodos ni el `node_id`
/// persistido del tenant cambian.
#[tokio::test]
async fn migration_atomicity_leaves_no_partial_state_when_a_stage_fails() {
    let (fleet_repo, _recovery_repo, notification_repo, node_registry, channel_registry, routing) = harness().await;

    node_registry.register("node-1", "10.0.0.1:9100", 4096).await.unwrap();
    node_registry.register("node-2", "10.0.0.2:9100", 2000).await.unwrap();

    // Only the source node is reachable; the target is never registered
    // in the channel, so "backup.download" fails before anything is persisted.
    spawn_compliant_node(&channel_registry, "node-1");

    let engine = MigrationEngine::new(
        fleet_repo.clone(),
        notification_repo,
        node_registry.clone(),
        channel_registry,
        routing,
        "ops@botplane.dev".to_string(),
    );

    let instance = bot_instance("bot-999", "tenant-zzz", "node-1");
    let result = engine.migrate_tenant(&instance, Some("node-2")).await.unwrap();

    assert!(!result.success);
    assert!(result.error.is_some());

    let node1 = node_registry.get("node-1").await.unwrap();
    let node2 = node_registry.get("node-2").await.unwrap();
    assert_eq!(node1.used_mb, 0, "a failed migration must not touch source capacity");
    assert_eq!(node2.used_mb, 0, "a failed migration must not touch target capacity");

    let moved = fleet_repo.instances_on_node("node-2").await.unwrap();
    assert!(moved.is_empty(), "the instance must not be reassigned on a failed migration");
}

// --- S2: dead-node recovery with later capacity -----------------------------

#[tokio::test]
async fn s2_waiting_item_resolves_once_a_capable_node_registers() {
    let (fleet_repo, recovery_repo, notification_repo, node_registry, channel_registry, routing) = harness().await;

    let instance = bot_instance("bot-1", "tenant-1", "dead-node");
    fleet_repo.upsert_bot_instance(&instance).await.unwrap();

    let manager = RecoveryManager::new(
        fleet_repo,
        recovery_repo.clone(),
        notification_repo,
        node_registry.clone(),
        channel_registry.clone(),
        routing,
        "ops@botplane.dev".to_string(),
        24,
        5,
    );

    let event = manager.trigger_recovery("dead-node", RecoveryTrigger::HeartbeatTimeout).await.unwrap();
    assert_eq!(event.status, RecoveryStatus::Partial);
    assert_eq!(event.tenants_waiting, 1);

    let items = recovery_repo.items_for_event(&event.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, RecoveryItemStatus::Waiting);
    assert_eq!(items[0].reason.as_deref(), Some("no_capacity"));

    // A capable node joins the fleet; its registration hook re-checks waiting tenants.
    node_registry.register("new-node", "10.0.0.9:9100", 8192).await.unwrap();
    spawn_compliant_node(&channel_registry, "new-node");
    manager.on_node_registered("new-node").await.unwrap();

    let event = recovery_repo.items_for_event(&event.id).await.unwrap();
    assert_eq!(event.len(), 1);
    assert_eq!(event[0].status, RecoveryItemStatus::Retried);
    assert_eq!(event[0].target_node_id.as_deref(), Some("new-node"));
}

// --- S3: recovery retry exhaustion -----------------------------------------

/// Invariante "Recovery retry bound": un renglón que ya agotó su tope de
/// reintentos se marca `failed` sin volver a intentar colocarlo, sin
/// importar cuánta capacidad nueva aparezca.
#[tokio::test]
async fn s3_items_past_the_retry_cap_are_marked_failed_not_retried_again() {
    let (fleet_repo, recovery_repo, notification_repo, node_registry, channel_registry, routing) = harness().await;

    // Plenty of capacity is available, but both items have already
    // exhausted their retry budget and must not be placed again.
    node_registry.register("spare-node", "10.0.0.5:9100", 8192).await.unwrap();

    let manager = RecoveryManager::new(
        fleet_repo,
        recovery_repo.clone(),
        notification_repo.clone(),
        node_registry,
        channel_registry,
        routing,
        "ops@botplane.dev".to_string(),
        24,
        5,
    );

    let event = RecoveryEvent {
        id: "evt-1".to_string(),
        node_id: "dead-node".to_string(),
        trigger: RecoveryTrigger::HeartbeatTimeout,
        status: RecoveryStatus::InProgress,
        tenants_total: 2,
        tenants_recovered: 0,
        tenants_failed: 0,
        tenants_waiting: 2,
        started_at: Utc::now(),
        completed_at: None,
        report_json: None,
    };
    recovery_repo.insert_event(&event).await.unwrap();

    for (tenant_id, retry_count) in [("tenant-a", 5i64), ("tenant-b", 7i64)] {
        recovery_repo
            .insert_item(&RecoveryItem {
                id: Uuid::new_v4().to_string(),
                recovery_event_id: event.id.clone(),
                tenant_id: tenant_id.to_string(),
                source_node_id: "dead-node".to_string(),
                target_node_id: None,
                status: RecoveryItemStatus::Waiting,
                reason: Some("no_capacity".to_string()),
                retry_count,
                started_at: Utc::now(),
                completed_at: None,
            })
            .await
            .unwrap();
    }

    manager.check_and_retry_waiting().await.unwrap();

    let items = recovery_repo.items_for_event(&event.id).await.unwrap();
    assert_eq!(items.len(), 2);
    for item in &items {
        assert_eq!(item.status, RecoveryItemStatus::Failed);
        assert_eq!(item.reason.as_deref(), Some("max_retries_exceeded"));
    }

    let due = notification_repo.due_entries(Utc::now(), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].email_type, "waiting_tenants_expired");
    let payload: serde_json::Value = serde_json::from_str(&due[0].payload).unwrap();
    assert_eq!(payload["event_id"], "evt-1");
    assert_eq!(payload["count"], 2);
    assert_eq!(payload["reason"], "max_retries_exceeded");
}

/// Un evento cuya ventana de 24 horas ya venció cierra todos sus
/// renglones `waiting` restantes como `failed`, sin importar su
/// `retry_count` individual.
#[tokio::test]
async fn an_event_past_its_time_cap_closes_every_remaining_waiting_item() {
    let (fleet_repo, recovery_repo, notification_repo, node_registry, channel_registry, routing) = harness().await;

    let manager = RecoveryManager::new(
        fleet_repo,
        recovery_repo.clone(),
        notification_repo,
        node_registry,
        channel_registry,
        routing,
        "ops@botplane.dev".to_string(),
        24,
        5,
    );

    let event = RecoveryEvent {
        id: "evt-expired".to_string(),
        node_id: "dead-node".to_string(),
        trigger: RecoveryTrigger::HeartbeatTimeout,
        status: RecoveryStatus::Partial,
        tenants_total: 1,
        tenants_recovered: 0,
        tenants_failed: 0,
        tenants_waiting: 1,
        started_at: Utc::now() - chrono::Duration::hours(25),
        completed_at: None,
        report_json: None,
    };
    recovery_repo.insert_event(&event).await.unwrap();
    recovery_repo
        .insert_item(&RecoveryItem {
            id: Uuid::new_v4().to_string(),
            recovery_event_id: event.id.clone(),
            tenant_id: "tenant-stale".to_string(),
            source_node_id: "dead-node".to_string(),
            target_node_id: None,
            status: RecoveryItemStatus::Waiting,
            reason: Some("no_capacity".to_string()),
            retry_count: 0,
            started_at: Utc::now() - chrono::Duration::hours(25),
            completed_at: None,
        })
        .await
        .unwrap();

    manager.check_and_retry_waiting().await.unwrap();

    let items = recovery_repo.items_for_event(&event.id).await.unwrap();
    assert_eq!(items[0].status, RecoveryItemStatus::Failed);
    assert_eq!(items[0].reason.as_deref(), Some("max_retries_exceeded"));
}
