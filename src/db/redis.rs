//! Redis backend via the `redis` crate's multiplexed tokio connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{Command, Connection, Connector};
use crate::error::Result;

/// Opens Redis connections for the pool.
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    /// Parse the URL; no connection is made until the pool asks for one.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisConnection { conn }))
    }
}

pub struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Connection for RedisConnection {
    async fn pipeline(&mut self, commands: &[Command]) -> Result<()> {
        let mut pipe = redis::pipe();
        for command in commands {
            match command {
                Command::Set(key, value) => pipe.cmd("SET").arg(key).arg(value).ignore(),
                Command::Del(key) => pipe.cmd("DEL").arg(key).ignore(),
                Command::SAdd(key, member) => pipe.cmd("SADD").arg(key).arg(member).ignore(),
                Command::SRem(key, member) => pipe.cmd("SREM").arg(key).arg(member).ignore(),
                Command::Incr(key) => pipe.cmd("INCR").arg(key).ignore(),
                Command::RPush(key, value) => pipe.cmd("RPUSH").arg(key).arg(value).ignore(),
                Command::LPush(key, value) => pipe.cmd("LPUSH").arg(key).arg(value).ignore(),
            };
        }
        let _: () = pipe.query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn lpop(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        // Raw bytes: the entry is already gone from the server, so decoding
        // must not fail here.
        let value: Option<Vec<u8>> = redis::cmd("LPOP")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn llen(&mut self, key: &str) -> Result<u64> {
        let len: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(len)
    }

    async fn lrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn)
            .await?;
        Ok(items)
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        members.sort();
        Ok(members)
    }
}
