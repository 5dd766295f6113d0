//! In-process store with Redis list/set/counter semantics.
//!
//! Backs tests and single-process embedding. Clones share the same data,
//! so a test can keep one handle for inspection while the pool owns another.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Command, Connection, Connector};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Data {
    values: HashMap<String, String>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Data {
    fn apply(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Set(key, value) => {
                self.values.insert(key.clone(), value.clone());
            }
            Command::Del(key) => {
                self.values.remove(key);
                self.lists.remove(key);
                self.sets.remove(key);
            }
            Command::SAdd(key, member) => {
                self.sets.entry(key.clone()).or_default().insert(member.clone());
            }
            Command::SRem(key, member) => {
                if let Some(set) = self.sets.get_mut(key) {
                    set.remove(member);
                    if set.is_empty() {
                        self.sets.remove(key);
                    }
                }
            }
            Command::Incr(key) => {
                let current = match self.values.get(key) {
                    Some(v) => v.parse::<i64>().map_err(|_| {
                        Error::Backend(format!("value at {key} is not an integer"))
                    })?,
                    None => 0,
                };
                self.values.insert(key.clone(), (current + 1).to_string());
            }
            Command::RPush(key, value) => {
                self.lists.entry(key.clone()).or_default().push_back(value.clone().into_bytes());
            }
            Command::LPush(key, value) => {
                self.lists.entry(key.clone()).or_default().push_front(value.clone().into_bytes());
            }
        }
        Ok(())
    }
}

/// Shared in-memory store. Acts as its own [`Connector`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Data>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, Data> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append arbitrary bytes to the tail of a list, as a foreign producer
    /// writing straight to Redis could.
    pub fn push_raw(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.data()
            .lists
            .entry(key.into())
            .or_default()
            .push_back(bytes.into());
    }

    /// Every key currently holding a value, list, or set.
    pub fn keys(&self) -> Vec<String> {
        let data = self.data();
        let mut keys: Vec<String> = data
            .values
            .keys()
            .chain(data.lists.keys())
            .chain(data.sets.keys())
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
        }))
    }
}

/// A "connection" is just another handle onto the shared data.
pub struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn pipeline(&mut self, commands: &[Command]) -> Result<()> {
        // Redis pipelines are not transactional either: earlier writes stay
        // applied when a later one fails.
        let mut data = self.store.data();
        for command in commands {
            data.apply(command)?;
        }
        Ok(())
    }

    async fn lpop(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut data = self.store.data();
        let Some(list) = data.lists.get_mut(key) else {
            return Ok(None);
        };
        let head = list.pop_front();
        if list.is_empty() {
            data.lists.remove(key);
        }
        Ok(head)
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.store.data().values.get(key).cloned())
    }

    async fn llen(&mut self, key: &str) -> Result<u64> {
        Ok(self
            .store
            .data()
            .lists
            .get(key)
            .map_or(0, |list| list.len() as u64))
    }

    async fn lrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let data = self.store.data();
        let Some(list) = data.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let resolve = |i: isize| if i < 0 { len + i } else { i };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        list.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|entry| {
                String::from_utf8(entry.clone())
                    .map_err(|e| Error::Backend(format!("list {key} holds non-UTF-8 data: {e}")))
            })
            .collect()
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .data()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn conn(store: &MemoryStore) -> Box<dyn Connection> {
        store.connect().await.unwrap()
    }

    #[tokio::test]
    async fn lists_push_tail_and_pop_head() {
        let store = MemoryStore::new();
        let mut c = conn(&store).await;
        c.pipeline(&[
            Command::RPush("q".into(), "a".into()),
            Command::RPush("q".into(), "b".into()),
            Command::LPush("q".into(), "z".into()),
        ])
        .await
        .unwrap();

        assert_eq!(c.llen("q").await.unwrap(), 3);
        assert_eq!(c.lrange("q", 0, -1).await.unwrap(), vec!["z", "a", "b"]);
        assert_eq!(c.lpop("q").await.unwrap().as_deref(), Some(&b"z"[..]));
        assert_eq!(c.lpop("q").await.unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(c.lpop("q").await.unwrap().as_deref(), Some(&b"b"[..]));
        assert_eq!(c.lpop("q").await.unwrap(), None);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn incr_counts_from_zero_and_rejects_non_integers() {
        let store = MemoryStore::new();
        let mut c = conn(&store).await;
        c.pipeline(&[Command::Incr("n".into()), Command::Incr("n".into())])
            .await
            .unwrap();
        assert_eq!(c.get("n").await.unwrap().as_deref(), Some("2"));

        c.pipeline(&[Command::Set("s".into(), "text".into())])
            .await
            .unwrap();
        assert!(c.pipeline(&[Command::Incr("s".into())]).await.is_err());
    }

    #[tokio::test]
    async fn sets_add_and_remove_members() {
        let store = MemoryStore::new();
        let mut c = conn(&store).await;
        c.pipeline(&[
            Command::SAdd("w".into(), "b".into()),
            Command::SAdd("w".into(), "a".into()),
            Command::SAdd("w".into(), "a".into()),
        ])
        .await
        .unwrap();
        assert_eq!(c.smembers("w").await.unwrap(), vec!["a", "b"]);

        c.pipeline(&[Command::SRem("w".into(), "a".into())])
            .await
            .unwrap();
        assert_eq!(c.smembers("w").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn raw_bytes_pop_unchanged() {
        let store = MemoryStore::new();
        store.push_raw("q", vec![0xff, 0xfe]);
        let mut c = conn(&store).await;
        assert!(c.lrange("q", 0, -1).await.is_err());
        assert_eq!(c.lpop("q").await.unwrap(), Some(vec![0xff, 0xfe]));
    }

    #[tokio::test]
    async fn lrange_clamps_out_of_range_indices() {
        let store = MemoryStore::new();
        let mut c = conn(&store).await;
        c.pipeline(&[Command::RPush("l".into(), "x".into())])
            .await
            .unwrap();
        assert_eq!(c.lrange("l", -10, 10).await.unwrap(), vec!["x"]);
        assert!(c.lrange("l", 3, 5).await.unwrap().is_empty());
        assert!(c.lrange("missing", 0, -1).await.unwrap().is_empty());
    }
}
