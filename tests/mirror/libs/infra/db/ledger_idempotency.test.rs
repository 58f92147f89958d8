// [tests/mirror/libs/infra/db/ledger_idempotency.test.rs]
use std::sync::Arc;

use botplane_domain_billing::TransactionType;
use botplane_infra_db::{DbClient, LedgerRepository};

async fn in_memory_ledger() -> LedgerRepository {
    let client = DbClient::connect(":memory:", None)
        .await
        .expect("in-memory database should bootstrap");
    LedgerRepository::new(Arc::new(client))
}

#[tokio::test]
async fn crediting_with_a_repeated_reference_id_is_rejected() {
    let ledger = in_memory_ledger().await;

    ledger
        .credit(
            "tenant-1",
            1000,
            TransactionType::Purchase,
            Some("initial purchase"),
            Some("stripe_pi_abc123"),
            Some("stripe"),
            None,
        )
        .await
        .expect("first credit with a fresh reference should succeed");

    let second = ledger
        .credit(
            "tenant-1",
            1000,
            TransactionType::Purchase,
            Some("duplicate webhook delivery"),
            Some("stripe_pi_abc123"),
            Some("stripe"),
            None,
        )
        .await;

    assert!(second.is_err(), "replaying the same reference_id must not double-credit");
    assert_eq!(ledger.get_balance("tenant-1").await.unwrap(), 1000);
}

#[tokio::test]
async fn debit_beyond_balance_is_rejected_without_allow_negative() {
    let ledger = in_memory_ledger().await;

    ledger
        .credit("tenant-2", 500, TransactionType::SignupGrant, None, None, None, None)
        .await
        .unwrap();

    let result = ledger
        .debit("tenant-2", 600, TransactionType::BotRuntime, Some("runtime charge"), None)
        .await;

    assert!(result.is_err());
    assert_eq!(ledger.get_balance("tenant-2").await.unwrap(), 500);
}

#[tokio::test]
async fn admin_correction_may_drive_balance_negative() {
    let ledger = in_memory_ledger().await;

    ledger
        .credit("tenant-3", 100, TransactionType::Purchase, None, None, None, None)
        .await
        .unwrap();

    ledger
        .correct("tenant-3", -250, "reversing erroneous refund", "admin@botplane.dev")
        .await
        .expect("admin corrections may push balance negative");

    assert_eq!(ledger.get_balance("tenant-3").await.unwrap(), -150);
}
