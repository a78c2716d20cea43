// src/store.rs
use crate::Result;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Thin adapter over the shared Redis connection layer.
///
/// All queues share one store; atomicity for multi-step transitions comes
/// from Lua scripts run against it, never from client-side locking.
#[derive(Clone)]
pub struct Store {
    client: Client,
    conn: MultiplexedConnection,
}

impl Store {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    /// Shared connection for non-blocking commands.
    pub(crate) fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    pub async fn push_left(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    /// Dedicated connection for blocking commands, kept apart so the block
    /// never stalls commands multiplexed over the shared one. Callers hold
    /// it across polls rather than reconnecting each iteration.
    pub async fn blocking_connection(&self) -> Result<MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Blocking pop from the right end of the first non-empty key, scanned
    /// in the order given. Returns the matched key and the popped value, or
    /// `None` once the timeout elapses with every key empty.
    pub async fn blocking_pop_right(
        &self,
        conn: &mut MultiplexedConnection,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>> {
        let popped: Option<(String, String)> =
            conn.brpop(keys, timeout.as_secs_f64()).await?;
        Ok(popped)
    }

    pub async fn list_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    pub async fn zset_add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn zset_card(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection();
        let card: u64 = conn.zcard(key).await?;
        Ok(card)
    }

    pub async fn zset_range_by_score(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
    ) -> Result<Vec<String>> {
        let mut conn = self.connection();
        let members: Vec<String> = conn.zrangebyscore(key, min_score, max_score).await?;
        Ok(members)
    }

    /// Remove every member scored at or below `max_score`. Returns the
    /// number removed.
    pub async fn zset_remove_below(&self, key: &str, max_score: i64) -> Result<u64> {
        let mut conn = self.connection();
        let removed: u64 = conn.zrembyscore(key, i64::MIN, max_score).await?;
        Ok(removed)
    }

    pub async fn expire_key(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}
