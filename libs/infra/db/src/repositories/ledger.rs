// [libs/infra/db/src/repositories/ledger.rs]
/*!
 * Libro mayor de créditos. Cada inserción en `credit_transactions` ocurre
 * dentro de la misma conexión que lee el saldo previo y actualiza la
 * caché de `credit_balances`, pero la serialización real por tenant
 * (para que dos escrituras concurrentes del mismo tenant no se pisen)
 * la impone el llamador tomando el mutex por tenant antes de invocar
 * `credit`/`debit` — este repositorio asume que ya se tiene esa exclusión.
 */

use std::sync::Arc;

use botplane_domain_billing::{
    compute_balance_after, validate_positive_amount, AutoTopupSettings, CreditTransaction,
    TransactionType,
};
use botplane_domain_errors::DomainError;
use chrono::{DateTime, Utc};
use libsql::params;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;

pub struct LedgerRepository {
    client: Arc<DbClient>,
}

fn enum_to_text<T: serde::Serialize>(value: &T) -> Result<String, DbError> {
    match serde_json::to_value(value).map_err(|e| DbError::MappingError(e.to_string()))? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(DbError::MappingError(format!("expected string enum, got {other}"))),
    }
}

fn text_to_enum<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, DbError> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::MappingError(e.to_string()))
}

impl LedgerRepository {
    pub fn new(client: Arc<DbClient>) -> Self {
        Self { client }
    }

    pub async fn get_balance(&self, tenant_id: &str) -> Result<i64, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT balance FROM credit_balances WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        match rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            Some(row) => row
                .get::<i64>(0)
                .map_err(|e| DomainError::from(DbError::QueryError(e))),
            None => Ok(0),
        }
    }

    pub async fn has_reference_id(&self, reference_id: &str) -> Result<bool, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT 1 FROM credit_transactions WHERE reference_id = ?1 LIMIT 1",
                params![reference_id],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
            .is_some())
    }

    /// Aplica un movimiento firmado (positivo para crédito, negativo para
    /// débito) al tenant. `allow_negative_balance` sólo debe ser `true`
    /// para correcciones administrativas explícitas; todo otro camino
    /// rechaza el movimiento si dejaría el saldo por debajo de cero.
    async fn record_transaction(
        &self,
        tenant_id: &str,
        signed_amount: i64,
        tx_type: TransactionType,
        description: Option<&str>,
        reference_id: Option<&str>,
        funding_source: Option<&str>,
        attributed_user_id: Option<&str>,
        allow_negative_balance: bool,
    ) -> Result<CreditTransaction, DomainError> {
        validate_positive_amount(signed_amount.abs())?;

        if let Some(reference_id) = reference_id {
            if self.has_reference_id(reference_id).await? {
                return Err(DomainError::InvalidInput(format!(
                    "reference_id {reference_id} already recorded"
                )));
            }
        }

        let prior_balance = self.get_balance(tenant_id).await?;
        let balance_after = compute_balance_after(prior_balance, signed_amount);

        if balance_after < 0 && !allow_negative_balance {
            return Err(DomainError::InsufficientBalance {
                tenant_id: tenant_id.to_string(),
                requested: signed_amount.abs(),
                available: prior_balance,
            });
        }

        let transaction = CreditTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            amount: signed_amount,
            balance_after,
            tx_type,
            description: description.map(str::to_string),
            reference_id: reference_id.map(str::to_string),
            funding_source: funding_source.map(str::to_string),
            attributed_user_id: attributed_user_id.map(str::to_string),
            created_at: Utc::now(),
        };

        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let tx_type_text = enum_to_text(&transaction.tx_type).map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO credit_transactions
                    (id, tenant_id, amount, balance_after, tx_type, description,
                     reference_id, funding_source, attributed_user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    transaction.id.clone(),
                    transaction.tenant_id.clone(),
                    transaction.amount,
                    transaction.balance_after,
                    tx_type_text,
                    transaction.description.clone(),
                    transaction.reference_id.clone(),
                    transaction.funding_source.clone(),
                    transaction.attributed_user_id.clone(),
                    transaction.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        connection
            .execute(
                "INSERT INTO credit_balances (tenant_id, balance) VALUES (?1, ?2)
                 ON CONFLICT(tenant_id) DO UPDATE SET balance = excluded.balance",
                params![transaction.tenant_id.clone(), balance_after],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        Ok(transaction)
    }

    pub async fn credit(
        &self,
        tenant_id: &str,
        amount: i64,
        tx_type: TransactionType,
        description: Option<&str>,
        reference_id: Option<&str>,
        funding_source: Option<&str>,
        attributed_user_id: Option<&str>,
    ) -> Result<CreditTransaction, DomainError> {
        self.record_transaction(
            tenant_id,
            amount,
            tx_type,
            description,
            reference_id,
            funding_source,
            attributed_user_id,
            false,
        )
        .await
    }

    pub async fn debit(
        &self,
        tenant_id: &str,
        amount: i64,
        tx_type: TransactionType,
        description: Option<&str>,
        reference_id: Option<&str>,
    ) -> Result<CreditTransaction, DomainError> {
        self.record_transaction(
            tenant_id,
            -amount,
            tx_type,
            description,
            reference_id,
            None,
            None,
            false,
        )
        .await
    }

    /// Corrección administrativa: puede dejar el saldo negativo a
    /// propósito, a diferencia de `credit`/`debit`.
    pub async fn correct(
        &self,
        tenant_id: &str,
        signed_amount: i64,
        description: &str,
        attributed_user_id: &str,
    ) -> Result<CreditTransaction, DomainError> {
        self.record_transaction(
            tenant_id,
            signed_amount,
            TransactionType::Correction,
            Some(description),
            None,
            None,
            Some(attributed_user_id),
            true,
        )
        .await
    }

    pub async fn history(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT id, tenant_id, amount, balance_after, tx_type, description,
                        reference_id, funding_source, attributed_user_id, created_at
                 FROM credit_transactions
                 WHERE tenant_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
                params![tenant_id, limit],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut transactions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            let tx_type_raw: String = row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            let created_at_raw: String = row.get(9).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
            transactions.push(CreditTransaction {
                id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tenant_id: row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                amount: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                balance_after: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                tx_type: text_to_enum(&tx_type_raw).map_err(DomainError::from)?,
                description: row.get(5).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                reference_id: row.get(6).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                funding_source: row.get(7).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                attributed_user_id: row.get(8).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                created_at: parse_timestamp(&created_at_raw).map_err(DomainError::from)?,
            });
        }
        Ok(transactions)
    }

    pub async fn get_auto_topup_settings(
        &self,
        tenant_id: &str,
    ) -> Result<Option<AutoTopupSettings>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT tenant_id, usage_enabled, usage_threshold, usage_topup_amount,
                        usage_consecutive_failures, usage_charge_in_flight,
                        schedule_enabled, schedule_amount, schedule_interval_hours,
                        schedule_next_at, schedule_consecutive_failures
                 FROM credit_auto_topup_settings WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        else {
            return Ok(None);
        };

        let schedule_next_raw: Option<String> =
            row.get(9).map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(Some(AutoTopupSettings {
            tenant_id: row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            usage_enabled: row.get::<i64>(1).map_err(|e| DomainError::from(DbError::QueryError(e)))? != 0,
            usage_threshold: row.get(2).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            usage_topup_amount: row.get(3).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            usage_consecutive_failures: row.get(4).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            usage_charge_in_flight: row.get::<i64>(5).map_err(|e| DomainError::from(DbError::QueryError(e)))? != 0,
            schedule_enabled: row.get::<i64>(6).map_err(|e| DomainError::from(DbError::QueryError(e)))? != 0,
            schedule_amount: row.get(7).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            schedule_interval_hours: row.get(8).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            schedule_next_at: schedule_next_raw
                .map(|raw| parse_timestamp(&raw))
                .transpose()
                .map_err(DomainError::from)?,
            schedule_consecutive_failures: row
                .get(10)
                .map_err(|e| DomainError::from(DbError::QueryError(e)))?,
        }))
    }

    pub async fn upsert_auto_topup_settings(
        &self,
        settings: &AutoTopupSettings,
    ) -> Result<(), DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        connection
            .execute(
                "INSERT INTO credit_auto_topup_settings
                    (tenant_id, usage_enabled, usage_threshold, usage_topup_amount,
                     usage_consecutive_failures, usage_charge_in_flight,
                     schedule_enabled, schedule_amount, schedule_interval_hours,
                     schedule_next_at, schedule_consecutive_failures)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    usage_enabled = excluded.usage_enabled,
                    usage_threshold = excluded.usage_threshold,
                    usage_topup_amount = excluded.usage_topup_amount,
                    usage_consecutive_failures = excluded.usage_consecutive_failures,
                    usage_charge_in_flight = excluded.usage_charge_in_flight,
                    schedule_enabled = excluded.schedule_enabled,
                    schedule_amount = excluded.schedule_amount,
                    schedule_interval_hours = excluded.schedule_interval_hours,
                    schedule_next_at = excluded.schedule_next_at,
                    schedule_consecutive_failures = excluded.schedule_consecutive_failures",
                params![
                    settings.tenant_id.clone(),
                    settings.usage_enabled as i64,
                    settings.usage_threshold,
                    settings.usage_topup_amount,
                    settings.usage_consecutive_failures,
                    settings.usage_charge_in_flight as i64,
                    settings.schedule_enabled as i64,
                    settings.schedule_amount,
                    settings.schedule_interval_hours,
                    settings.schedule_next_at.map(|t| t.to_rfc3339()),
                    settings.schedule_consecutive_failures,
                ],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;
        Ok(())
    }

    /// Tenants con auto-recarga por uso habilitada y saldo bajo el umbral,
    /// sin una carga ya en vuelo — candidatos a una corrida del
    /// controlador de auto-recarga.
    pub async fn tenants_due_for_usage_topup(&self) -> Result<Vec<(String, i64)>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT s.tenant_id, b.balance
                 FROM credit_auto_topup_settings s
                 JOIN credit_balances b ON b.tenant_id = s.tenant_id
                 WHERE s.usage_enabled = 1
                   AND s.usage_charge_in_flight = 0
                   AND s.usage_consecutive_failures < 3
                   AND b.balance < s.usage_threshold",
                (),
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut candidates = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            candidates.push((
                row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
                row.get(1).map_err(|e| DomainError::from(DbError::QueryError(e)))?,
            ));
        }
        Ok(candidates)
    }

    /// Tenants con auto-recarga por calendario habilitada cuyo próximo
    /// disparo ya venció — candidatos al sondeo periódico del controlador.
    pub async fn tenants_due_for_schedule_topup(&self, now: DateTime<Utc>) -> Result<Vec<String>, DomainError> {
        let connection = self.client.get_connection().map_err(DomainError::from)?;
        let mut rows = connection
            .query(
                "SELECT tenant_id FROM credit_auto_topup_settings
                 WHERE schedule_enabled = 1
                   AND schedule_consecutive_failures < 3
                   AND schedule_next_at IS NOT NULL
                   AND schedule_next_at <= ?1",
                params![now.to_rfc3339()],
            )
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?;

        let mut tenant_ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DomainError::from(DbError::QueryError(e)))?
        {
            tenant_ids.push(row.get(0).map_err(|e| DomainError::from(DbError::QueryError(e)))?);
        }
        Ok(tenant_ids)
    }
}
