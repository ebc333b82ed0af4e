use super::{ExistenceCache, SetStore};
use crate::{Error, Result, types::PhoneNumber};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

/// Prefix of the write-once keys marking a number as assigned.
pub const ASSIGNED_KEY_PREFIX: &str = "assigned-";

/// `SMOVE`s each member on its own so only members still in `KEYS[1]` land in
/// `KEYS[2]`.
const MOVE_PRESENT: &str = r"
local moved = 0
for _, member in ipairs(ARGV) do
    moved = moved + redis.call('SMOVE', KEYS[1], KEYS[2], member)
end
return moved
";

/// Drops the set only if `ARGV[1]` was still one of its members.
const CONSUME: &str = r"
if redis.call('SREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('DEL', KEYS[1])
return 1
";

/// Redis-backed [`SetStore`] and [`ExistenceCache`].
///
/// Eviction under memory pressure (`allkeys-lru`) is expected to be
/// configured on the server. Only the `assigned-*` keys are safe to evict;
/// deployments that share the instance should give the pool sets a
/// `noeviction` home.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connects to a `redis://` or `rediss://` URL with automatic reconnects.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| Error::store("redis open", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::store("redis connect", e))?;
        Ok(Self { conn })
    }

    pub const fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn assigned_key(number: &PhoneNumber) -> String {
        format!("{ASSIGNED_KEY_PREFIX}{number}")
    }
}

#[async_trait]
impl SetStore for RedisCache {
    async fn pop(&self, key: &str, count: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("SPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("spop", e))
    }

    async fn add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("sadd", e))?;
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("smembers", e))
    }

    async fn consume(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(CONSUME);
        let consumed: i64 = script
            .key(key)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::store("srem+del", e))?;
        Ok(consumed == 1)
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        redis::cmd("SCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("scard", e))
    }

    async fn move_members(&self, from: &str, to: &str, members: &[String]) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let script = redis::Script::new(MOVE_PRESENT);
        let moved: usize = script
            .key(from)
            .key(to)
            .arg(members)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::store("smove", e))?;
        Ok(moved)
    }
}

#[async_trait]
impl ExistenceCache for RedisCache {
    async fn contains(&self, number: &PhoneNumber) -> Result<bool> {
        let mut conn = self.conn.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(Self::assigned_key(number))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("exists", e))?;
        Ok(found > 0)
    }

    async fn warm(&self, number: &PhoneNumber) -> Result<()> {
        let mut conn = self.conn.clone();
        let (): () = redis::cmd("SET")
            .arg(Self::assigned_key(number))
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::store("set", e))?;
        Ok(())
    }
}
