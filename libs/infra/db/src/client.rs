// [libs/infra/db/src/client.rs]
/*!
 * Conexión a libSQL con tres modos: remoto (Turso), archivo local, y
 * memoria compartida entre hilos. El modo de memoria requiere anclar
 * una conexión viva durante toda la vida del cliente, porque SQLite
 * purga una base `:memory:` en cuanto su última conexión se cierra.
 */

use std::sync::Arc;

use libsql::{Builder, Connection, Database};
use tracing::{info, instrument};

use crate::errors::DbError;
use crate::schema;

pub struct DbClient {
    database: Database,
    _memory_persistence_anchor: Option<Arc<Connection>>,
}

impl DbClient {
    #[instrument(skip(auth_token))]
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self, DbError> {
        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:") || url.contains("mode=memory");

        let database = if is_remote {
            let token = auth_token
                .ok_or_else(|| DbError::ConfigurationError("falta auth_token para conexión remota".into()))?;
            Builder::new_remote(url.to_string(), token.to_string())
                .build()
                .await
                .map_err(|e| DbError::ConnectionError(e.to_string()))?
        } else {
            Builder::new_local(url)
                .build()
                .await
                .map_err(|e| DbError::ConnectionError(e.to_string()))?
        };

        let memory_persistence_anchor = if is_memory {
            let anchor_connection = database
                .connect()
                .map_err(|e| DbError::ConnectionError(e.to_string()))?;
            Some(Arc::new(anchor_connection))
        } else {
            None
        };

        let client = Self {
            database,
            _memory_persistence_anchor: memory_persistence_anchor,
        };

        schema::apply_full_schema(&client).await?;
        info!("🗄️ [DB_ONLINE]: Conexión establecida y esquema verificado.");
        Ok(client)
    }

    pub fn get_connection(&self) -> Result<Connection, DbError> {
        self.database
            .connect()
            .map_err(|e| DbError::ConnectionError(e.to_string()))
    }
}
