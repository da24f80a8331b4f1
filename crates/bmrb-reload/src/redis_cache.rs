//! Redis implementation of [`CacheStore`].

use std::time::Duration;

use redis::{Commands, ConnectionInfo, IntoConnectionInfo, RedisError};

use bmrb_core::cache::CacheStore;
use bmrb_core::error::{BmrbError, Result};

fn cache_error(err: RedisError) -> BmrbError {
    BmrbError::Cache(err.to_string())
}

/// Opens connections to one logical redis database.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    info: ConnectionInfo,
}

impl RedisConnector {
    /// `db` overrides any database index embedded in the URL.
    pub fn new(url: &str, db: i64) -> Result<Self> {
        let mut info = url.into_connection_info().map_err(cache_error)?;
        info.redis.db = db;
        Ok(Self { info })
    }

    /// Address for diagnostics, without credentials.
    pub fn target(&self) -> String {
        format!("{}/{}", self.info.addr, self.info.redis.db)
    }

    /// Opens a new connection and checks it answers.
    pub fn connect(&self) -> Result<RedisCache> {
        let client = redis::Client::open(self.info.clone()).map_err(cache_error)?;
        let conn = client.get_connection().map_err(cache_error)?;
        let mut cache = RedisCache { conn };
        cache.ping()?;
        Ok(cache)
    }
}

/// One private redis connection.
pub struct RedisCache {
    conn: redis::Connection,
}

impl RedisCache {
    fn bgsave_in_progress(&mut self) -> Result<bool> {
        let info: String = redis::cmd("INFO")
            .arg("persistence")
            .query(&mut self.conn)
            .map_err(cache_error)?;
        Ok(info
            .lines()
            .any(|line| line.trim() == "rdb_bgsave_in_progress:1"))
    }
}

impl CacheStore for RedisCache {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn.get(key).map_err(cache_error)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.conn.set(key, value).map_err(cache_error)
    }

    fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.conn
            .set_ex(key, value, ttl.as_secs())
            .map_err(cache_error)
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        self.conn.exists(key).map_err(cache_error)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        self.conn
            .expire(key, ttl.as_secs() as i64)
            .map_err(cache_error)
    }

    fn delete(&mut self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn.del(keys).map_err(cache_error)
    }

    fn list_range(&mut self, key: &str) -> Result<Vec<String>> {
        self.conn.lrange(key, 0, -1).map_err(cache_error)
    }

    fn list_push(&mut self, key: &str, values: &[String]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.conn.rpush(key, values).map_err(cache_error)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.conn.rename(from, to).map_err(cache_error)
    }

    fn hash_set(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.conn.hset_multiple(key, fields).map_err(cache_error)
    }

    fn flush_db(&mut self) -> Result<()> {
        redis::cmd("FLUSHDB")
            .query(&mut self.conn)
            .map_err(cache_error)
    }

    fn ping(&mut self) -> Result<()> {
        let _: String = redis::cmd("PING")
            .query(&mut self.conn)
            .map_err(cache_error)?;
        Ok(())
    }

    fn request_background_save(&mut self) -> Result<bool> {
        if self.bgsave_in_progress()? {
            return Ok(false);
        }
        let _: String = redis::cmd("BGSAVE")
            .query(&mut self.conn)
            .map_err(cache_error)?;
        Ok(true)
    }
}
