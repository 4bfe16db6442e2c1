// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Mailbox Store
//!
//! Keyed append-only streams of opaque elements with monotonic sequence
//! numbers. Every asynchronous response the gateway produces is published
//! into one of these streams and later collected by the client through
//! polling.
//!
//! ## Contract
//!
//! - `next(key)` reserves the next sequence number for the stream. Streams
//!   are created lazily on first reservation.
//! - `insert(key, element)` materialises a reserved slot. Any offset inside
//!   the reserved window `[base, next)` whose slot is still empty is
//!   accepted; everything else is `InvalidOffset`. Accepting the whole
//!   window (rather than only the oldest reservation) is what allows
//!   concurrent request tasks to complete out of allocation order.
//! - `retrieve(key, from, count)` returns the longest materialised prefix
//!   starting at `max(from, base)`, stopping at the first pending slot.
//!   The reported `offset` is the first returned offset, or the stream
//!   base when nothing is returned.
//! - `discard(key, n)` advances the base by `n`, clamped to the reserved
//!   window. Remaining offsets are unchanged.
//! - `remove(key)` destroys the stream. Retrieving a removed or unknown
//!   stream behaves as an empty stream.
//!
//! ## Implementations
//!
//! - [`mem::MemMailbox`]: in-process map guarded by per-key locks, for
//!   single-instance deployments and tests.
//! - [`redis::RedisMailbox`]: one Redis hash per stream, every operation a
//!   single-key Lua script so multiple gateway instances can share state
//!   on a single instance or a sharded cluster.

pub mod mem;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MailboxConfig;

/// A single stored element. The store treats `kind` and `value` as opaque;
/// they are produced and consumed by the event codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Position of the element within its stream.
    pub offset: u64,
    /// Discriminator tag, written by the codec.
    pub kind: String,
    /// Serialized payload.
    pub value: String,
}

/// A retrieved window of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Elements {
    /// Offset of the first returned element, or the stream base when
    /// `elements` is empty.
    pub offset: u64,
    /// Contiguous run of materialised elements.
    pub elements: Vec<Element>,
}

/// Errors surfaced by mailbox implementations.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// Insert targeted an offset outside the reserved window, or a slot
    /// that was already filled.
    #[error("invalid offset for insert")]
    InvalidOffset,

    /// The backing store failed (connection, script, protocol).
    #[error("mailbox store error: {0}")]
    Store(String),
}

/// Ordered per-key streams shared by all request handlers.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Reserve the next sequence number of the stream.
    async fn next(&self, key: &str) -> Result<u64, MailboxError>;

    /// Materialise a previously reserved slot.
    async fn insert(&self, key: &str, element: Element) -> Result<(), MailboxError>;

    /// Read up to `count` contiguous materialised elements starting at
    /// `max(from, base)`.
    async fn retrieve(&self, key: &str, from: u64, count: u32) -> Result<Elements, MailboxError>;

    /// Drop the first `n` elements of the stream, clamped to its length.
    async fn discard(&self, key: &str, n: u64) -> Result<(), MailboxError>;

    /// Destroy the stream.
    async fn remove(&self, key: &str) -> Result<(), MailboxError>;
}

/// Build the mailbox selected by configuration.
pub async fn from_config(config: &MailboxConfig) -> Result<Arc<dyn Mailbox>, MailboxError> {
    match config {
        MailboxConfig::Mem => Ok(Arc::new(mem::MemMailbox::new())),
        MailboxConfig::RedisSingle { addr } => {
            Ok(Arc::new(redis::RedisMailbox::connect_single(addr).await?))
        }
        MailboxConfig::RedisCluster { addrs } => {
            Ok(Arc::new(redis::RedisMailbox::connect_cluster(addrs).await?))
        }
    }
}
