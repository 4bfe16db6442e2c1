// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redis-backed mailbox store.
//!
//! Each stream is a single Redis hash keyed by the stream name, holding the
//! `base` and `next` counters plus one `e:<offset>` field per materialised
//! element. All five operations run as Lua scripts touching only that one
//! key, so they are atomic against other gateway instances and legal on a
//! sharded cluster (single-key scripts never cross slot boundaries).
//!
//! Counters and offsets travel as strings inside the scripts to avoid any
//! integer coercion at the Lua boundary.

use async_trait::async_trait;
use redis::Script;

use super::{Element, Elements, Mailbox, MailboxError};

const NEXT_SCRIPT: &str = r#"
local next = redis.call('HINCRBY', KEYS[1], 'next', 1)
return next - 1
"#;

const INSERT_SCRIPT: &str = r#"
local base = tonumber(redis.call('HGET', KEYS[1], 'base') or '0')
local next = tonumber(redis.call('HGET', KEYS[1], 'next') or '0')
local offset = tonumber(ARGV[1])
local field = 'e:' .. ARGV[1]
if offset < base or offset >= next or redis.call('HEXISTS', KEYS[1], field) == 1 then
  return redis.error_reply('INVALIDOFFSET offset is outside the reserved window')
end
redis.call('HSET', KEYS[1], field, cjson.encode({ARGV[2], ARGV[3]}))
return 'OK'
"#;

const RETRIEVE_SCRIPT: &str = r#"
local base = tonumber(redis.call('HGET', KEYS[1], 'base') or '0')
local next = tonumber(redis.call('HGET', KEYS[1], 'next') or '0')
local from = tonumber(ARGV[1])
local count = tonumber(ARGV[2])
local start = math.max(from, base)
local out = {}
local first = nil
local i = start
while i < next and (#out / 3) < count do
  local raw = redis.call('HGET', KEYS[1], 'e:' .. tostring(i))
  if not raw then break end
  local el = cjson.decode(raw)
  table.insert(out, tostring(i))
  table.insert(out, el[1])
  table.insert(out, el[2])
  if not first then first = i end
  i = i + 1
end
return {tostring(first or base), out}
"#;

const DISCARD_SCRIPT: &str = r#"
local base = tonumber(redis.call('HGET', KEYS[1], 'base') or '0')
local next = tonumber(redis.call('HGET', KEYS[1], 'next') or '0')
local n = math.min(tonumber(ARGV[1]), next - base)
if n < 0 then n = 0 end
for i = base, base + n - 1 do
  redis.call('HDEL', KEYS[1], 'e:' .. tostring(i))
end
redis.call('HSET', KEYS[1], 'base', tostring(base + n))
return 'OK'
"#;

const REMOVE_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
return 'OK'
"#;

/// Connection to a single instance or a cluster. Both variants are cheap
/// to clone and multiplex over one underlying link.
enum Connection {
    Single(redis::aio::MultiplexedConnection),
    Cluster(redis::cluster_async::ClusterConnection),
}

/// Remote [`Mailbox`] shared by all gateway instances of a deployment.
pub struct RedisMailbox {
    connection: Connection,
    next: Script,
    insert: Script,
    retrieve: Script,
    discard: Script,
    remove: Script,
}

impl RedisMailbox {
    fn new(connection: Connection) -> Self {
        Self {
            connection,
            next: Script::new(NEXT_SCRIPT),
            insert: Script::new(INSERT_SCRIPT),
            retrieve: Script::new(RETRIEVE_SCRIPT),
            discard: Script::new(DISCARD_SCRIPT),
            remove: Script::new(REMOVE_SCRIPT),
        }
    }

    /// Connect to a single Redis instance at `host:port`.
    pub async fn connect_single(addr: &str) -> Result<Self, MailboxError> {
        let client = redis::Client::open(format!("redis://{addr}"))
            .map_err(|e| MailboxError::Store(e.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| MailboxError::Store(e.to_string()))?;

        Ok(Self::new(Connection::Single(connection)))
    }

    /// Connect to a Redis cluster bootstrapped from `host:port` addresses.
    pub async fn connect_cluster(addrs: &[String]) -> Result<Self, MailboxError> {
        let urls: Vec<String> = addrs.iter().map(|a| format!("redis://{a}")).collect();
        let client = redis::cluster::ClusterClient::new(urls)
            .map_err(|e| MailboxError::Store(e.to_string()))?;
        let connection = client
            .get_async_connection()
            .await
            .map_err(|e| MailboxError::Store(e.to_string()))?;

        Ok(Self::new(Connection::Cluster(connection)))
    }

    async fn invoke<T: redis::FromRedisValue>(
        &self,
        script: &Script,
        key: &str,
        args: &[&str],
    ) -> Result<T, MailboxError> {
        let mut invocation = script.prepare_invoke();
        invocation.key(key);
        for arg in args {
            invocation.arg(*arg);
        }

        let result = match &self.connection {
            Connection::Single(connection) => {
                let mut connection = connection.clone();
                invocation.invoke_async(&mut connection).await
            }
            Connection::Cluster(connection) => {
                let mut connection = connection.clone();
                invocation.invoke_async(&mut connection).await
            }
        };

        result.map_err(map_redis_error)
    }
}

// Error replies travel as "<CODE> <message>"; redis-rs exposes the
// leading token through code().
fn map_redis_error(err: redis::RedisError) -> MailboxError {
    if err.code() == Some("INVALIDOFFSET") {
        MailboxError::InvalidOffset
    } else {
        MailboxError::Store(err.to_string())
    }
}

fn parse_offset(raw: &str) -> Result<u64, MailboxError> {
    raw.parse::<u64>()
        .map_err(|_| MailboxError::Store(format!("malformed offset from store: {raw}")))
}

#[async_trait]
impl Mailbox for RedisMailbox {
    async fn next(&self, key: &str) -> Result<u64, MailboxError> {
        let offset: i64 = self.invoke(&self.next, key, &[]).await?;
        Ok(offset as u64)
    }

    async fn insert(&self, key: &str, element: Element) -> Result<(), MailboxError> {
        let offset = element.offset.to_string();
        let _: String = self
            .invoke(&self.insert, key, &[&offset, &element.kind, &element.value])
            .await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str, from: u64, count: u32) -> Result<Elements, MailboxError> {
        let from = from.to_string();
        let count = count.to_string();
        let (offset, fields): (String, Vec<String>) =
            self.invoke(&self.retrieve, key, &[&from, &count]).await?;

        let mut elements = Vec::with_capacity(fields.len() / 3);
        for triple in fields.chunks_exact(3) {
            elements.push(Element {
                offset: parse_offset(&triple[0])?,
                kind: triple[1].clone(),
                value: triple[2].clone(),
            });
        }

        Ok(Elements {
            offset: parse_offset(&offset)?,
            elements,
        })
    }

    async fn discard(&self, key: &str, n: u64) -> Result<(), MailboxError> {
        let n = n.to_string();
        let _: String = self.invoke(&self.discard, key, &[&n]).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), MailboxError> {
        let _: String = self.invoke(&self.remove, key, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Script semantics are exercised against a live instance in
    // deployment smoke tests; here we pin the invariants the scripts
    // rely on so a refactor cannot silently drop them.

    #[test]
    fn scripts_only_touch_their_stream_key() {
        for script in [
            NEXT_SCRIPT,
            INSERT_SCRIPT,
            RETRIEVE_SCRIPT,
            DISCARD_SCRIPT,
            REMOVE_SCRIPT,
        ] {
            assert!(script.contains("KEYS[1]"));
            assert!(!script.contains("KEYS[2]"));
        }
    }

    #[test]
    fn insert_script_rejects_unreserved_offsets() {
        assert!(INSERT_SCRIPT.contains("offset < base or offset >= next"));
        assert!(INSERT_SCRIPT.contains("INVALIDOFFSET"));
    }

    #[test]
    fn offset_parsing_rejects_garbage() {
        assert!(parse_offset("42").is_ok());
        assert!(parse_offset("not-a-number").is_err());
    }
}
