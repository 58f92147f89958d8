// [apps/control-plane/src/state/tenant_locks.rs]
/*!
 * Mapa de mutex por clave, creado perezosamente en el primer uso. Evita
 * el candado global: el libro mayor y el controlador de auto-recarga lo
 * usan para serializar el trabajo de un mismo tenant sin bloquear a los
 * demás.
 */

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Guard devuelto por `acquire`; posee su propio `Arc<Mutex<()>>`, así que
/// mantiene el candado vivo sin prestar de una referencia externa.
pub type TenantLockGuard = OwnedMutexGuard<()>;

#[derive(Clone, Default)]
pub struct KeyedMutexMap {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedMutexMap {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.read().await.get(key) {
            return existing.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Adquiere el candado de `key`, creándolo si es la primera vez que se
    /// pide. El guard devuelto mantiene al candado vivo mientras el
    /// llamador hace su trabajo serializado.
    pub async fn acquire(&self, key: &str) -> TenantLockGuard {
        let lock = self.lock_for(key).await;
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_work_for_the_same_key() {
        let locks = KeyedMutexMap::new();
        let counter = Arc::new(AtomicI64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("tenant-1").await;
                let before = counter.load(Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.store(before + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyedMutexMap::new();
        let _guard_a = locks.acquire("tenant-a").await;
        let guard_b = tokio::time::timeout(Duration::from_millis(200), locks.acquire("tenant-b")).await;
        assert!(guard_b.is_ok(), "a lock on a different key must not block");
    }
}
