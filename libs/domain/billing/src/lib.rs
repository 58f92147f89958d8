// [libs/domain/billing/src/lib.rs]
/*!
 * =================================================================
 * APARATO: CREDIT LEDGER DOMAIN MODEL (V1.0 - CONTROL PLANE GENESIS)
 * CLASIFICACIÓN: DOMINIO FINANCIERO (ESTRATO L2)
 * RESPONSABILIDAD: ENTIDADES Y REGLAS PURAS DEL LIBRO MAYOR DE CRÉDITOS
 *
 * El libro mayor es estrictamente append-only: este módulo define las
 * filas inmutables y las reglas de validación que no requieren acceso
 * a almacenamiento. La escritura serializada por tenant y la detección
 * de colisión de reference_id viven en el adaptador de infraestructura.
 * =================================================================
 */

use botplane_domain_errors::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tipo de movimiento. El conjunto es abierto (el sistema acepta nuevas
/// causas de movimiento sin romper la deserialización de filas previas).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Promo,
    SignupGrant,
    AutoTopupUsage,
    AutoTopupSchedule,
    Refund,
    Correction,
    BotRuntime,
    AdapterUsage,
    Dividend,
    #[serde(other)]
    Other,
}

/// Una fila del libro mayor. Nunca se actualiza ni se borra.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub tenant_id: String,
    pub amount: i64,
    pub balance_after: i64,
    pub tx_type: TransactionType,
    pub description: Option<String>,
    pub reference_id: Option<String>,
    pub funding_source: Option<String>,
    pub attributed_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caché derivada del saldo actual; reconstruible en todo momento
/// reproduciendo las transacciones del tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditBalance {
    pub tenant_id: String,
    pub balance: i64,
}

/// Configuración de auto-recarga por tenant, con sus dos modos
/// independientes (por umbral de uso y por calendario).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTopupSettings {
    pub tenant_id: String,
    pub usage_enabled: bool,
    pub usage_threshold: i64,
    pub usage_topup_amount: i64,
    pub usage_consecutive_failures: i32,
    pub usage_charge_in_flight: bool,
    pub schedule_enabled: bool,
    pub schedule_amount: i64,
    pub schedule_interval_hours: i64,
    pub schedule_next_at: Option<DateTime<Utc>>,
    pub schedule_consecutive_failures: i32,
}

/// Número de fallos consecutivos que dispara el cortacircuitos, en
/// ambos modos de auto-recarga.
pub const AUTO_TOPUP_FAILURE_CIRCUIT_BREAKER: i32 = 3;

impl AutoTopupSettings {
    pub fn usage_failures_trip_breaker(&self) -> bool {
        self.usage_consecutive_failures >= AUTO_TOPUP_FAILURE_CIRCUIT_BREAKER
    }

    pub fn schedule_failures_trip_breaker(&self) -> bool {
        self.schedule_consecutive_failures >= AUTO_TOPUP_FAILURE_CIRCUIT_BREAKER
    }
}

/// Valida que un monto de movimiento sea estrictamente positivo, la
/// única regla pura que `credit`/`debit` comparten antes de tocar
/// almacenamiento.
pub fn validate_positive_amount(amount: i64) -> Result<(), DomainError> {
    if amount <= 0 {
        return Err(DomainError::InvalidInput(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

/// Calcula el nuevo saldo tras un crédito o un débito, permitiendo
/// saldo negativo sólo cuando el llamador lo autoriza explícitamente.
pub fn compute_balance_after(prior_balance: i64, signed_amount: i64) -> i64 {
    prior_balance + signed_amount
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_negative_amounts() {
        assert!(validate_positive_amount(0).is_err());
        assert!(validate_positive_amount(-5).is_err());
        assert!(validate_positive_amount(1).is_ok());
    }

    #[test]
    fn balance_after_is_a_running_sum() {
        assert_eq!(compute_balance_after(0, 100), 100);
        assert_eq!(compute_balance_after(100, -30), 70);
        assert_eq!(compute_balance_after(10, -50), -40);
    }

    #[test]
    fn circuit_breaker_trips_at_three_consecutive_failures() {
        let mut settings = AutoTopupSettings {
            tenant_id: "t1".into(),
            usage_enabled: true,
            usage_threshold: 500,
            usage_topup_amount: 1000,
            usage_consecutive_failures: 2,
            usage_charge_in_flight: false,
            schedule_enabled: false,
            schedule_amount: 0,
            schedule_interval_hours: 0,
            schedule_next_at: None,
            schedule_consecutive_failures: 0,
        };
        assert!(!settings.usage_failures_trip_breaker());
        settings.usage_consecutive_failures = 3;
        assert!(settings.usage_failures_trip_breaker());
    }
}
