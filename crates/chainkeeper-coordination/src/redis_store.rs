//! Redis-backed coordination store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, FromRedisValue};
use tracing::info;

use crate::error::StoreError;
use crate::store::CoordinationStore;

/// Deployment shape of the Redis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedisTopology {
    Single,
    Cluster,
}

#[derive(Clone)]
enum RedisConn {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Coordination store over a single Redis server or a Redis cluster.
///
/// All keys are written under `key_prefix`.
#[derive(Clone)]
pub struct RedisStore {
    conn: RedisConn,
    key_prefix: String,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// In single mode only the first URL is used. The single-node connection
    /// reconnects on its own after a drop.
    pub async fn connect(
        urls: &[String],
        topology: RedisTopology,
        key_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let key_prefix = key_prefix.into();
        let conn = match topology {
            RedisTopology::Single => {
                let url = urls
                    .first()
                    .ok_or_else(|| StoreError::Connection("No Redis URL configured".to_string()))?;
                let client = redis::Client::open(url.as_str())?;
                RedisConn::Single(ConnectionManager::new(client).await?)
            }
            RedisTopology::Cluster => {
                let client = ClusterClient::new(urls.to_vec())?;
                RedisConn::Cluster(client.get_async_connection().await?)
            }
        };

        info!(
            "Connected to Redis ({:?}, {} node(s), prefix '{}')",
            topology,
            urls.len(),
            key_prefix
        );

        Ok(Self { conn, key_prefix })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, StoreError> {
        let value: T = match &self.conn {
            RedisConn::Single(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await?
            }
            RedisConn::Cluster(conn) => {
                let mut conn = conn.clone();
                cmd.query_async(&mut conn).await?
            }
        };
        Ok(value)
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.key(key));
        self.query(&cmd).await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        self.query(&cmd).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("NX");
        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.key(key));
        let _removed: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn refresh_ttl(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(self.key(key)).arg(ttl_secs);
        let updated: i64 = self.query(&cmd).await?;
        Ok(updated == 1)
    }
}
