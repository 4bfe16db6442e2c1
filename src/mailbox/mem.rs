// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process mailbox store.
//!
//! Each stream is a window of slots between `base` and `next`. Reserving a
//! sequence number appends an empty slot; inserting fills it. The registry
//! lock is only held long enough to look up or create the per-stream lock,
//! so streams do not contend with each other.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Element, Elements, Mailbox, MailboxError};

/// One keyed stream. `slots.len()` always equals `next - base`.
#[derive(Default)]
struct Stream {
    base: u64,
    next: u64,
    slots: VecDeque<Option<Element>>,
}

impl Stream {
    fn reserve(&mut self) -> u64 {
        let offset = self.next;
        self.slots.push_back(None);
        self.next += 1;
        offset
    }

    fn insert(&mut self, element: Element) -> Result<(), MailboxError> {
        if element.offset < self.base || element.offset >= self.next {
            return Err(MailboxError::InvalidOffset);
        }

        let idx = (element.offset - self.base) as usize;
        if self.slots[idx].is_some() {
            return Err(MailboxError::InvalidOffset);
        }

        self.slots[idx] = Some(element);
        Ok(())
    }

    fn retrieve(&self, from: u64, count: u32) -> Elements {
        let start = from.max(self.base);
        let mut elements = Vec::new();

        let mut offset = start;
        while offset < self.next && (elements.len() as u32) < count {
            let idx = (offset - self.base) as usize;
            match &self.slots[idx] {
                Some(element) => elements.push(element.clone()),
                // Pending reservation: the stream has no materialised
                // prefix beyond this point yet.
                None => break,
            }
            offset += 1;
        }

        let offset = elements.first().map(|e| e.offset).unwrap_or(self.base);
        Elements { offset, elements }
    }

    fn discard(&mut self, n: u64) {
        let n = n.min(self.next - self.base);
        for _ in 0..n {
            self.slots.pop_front();
        }
        self.base += n;
    }
}

/// In-memory [`Mailbox`] keyed by stream name.
pub struct MemMailbox {
    streams: Mutex<HashMap<String, Arc<Mutex<Stream>>>>,
}

impl MemMailbox {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Look up an existing stream without creating it.
    async fn stream(&self, key: &str) -> Option<Arc<Mutex<Stream>>> {
        self.streams.lock().await.get(key).cloned()
    }

    /// Look up a stream, creating it if this is the first reservation.
    async fn stream_or_create(&self, key: &str) -> Arc<Mutex<Stream>> {
        let mut streams = self.streams.lock().await;
        streams.entry(key.to_string()).or_default().clone()
    }
}

impl Default for MemMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailbox for MemMailbox {
    async fn next(&self, key: &str) -> Result<u64, MailboxError> {
        let stream = self.stream_or_create(key).await;
        let mut stream = stream.lock().await;
        Ok(stream.reserve())
    }

    async fn insert(&self, key: &str, element: Element) -> Result<(), MailboxError> {
        let stream = self.stream(key).await.ok_or(MailboxError::InvalidOffset)?;
        let mut stream = stream.lock().await;
        stream.insert(element)
    }

    async fn retrieve(&self, key: &str, from: u64, count: u32) -> Result<Elements, MailboxError> {
        match self.stream(key).await {
            Some(stream) => {
                let stream = stream.lock().await;
                Ok(stream.retrieve(from, count))
            }
            // Unknown streams read as empty; they are not created by reads.
            None => Ok(Elements::default()),
        }
    }

    async fn discard(&self, key: &str, n: u64) -> Result<(), MailboxError> {
        if let Some(stream) = self.stream(key).await {
            let mut stream = stream.lock().await;
            stream.discard(n);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), MailboxError> {
        self.streams.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(offset: u64, value: &str) -> Element {
        Element {
            offset,
            kind: "t".to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn next_allocates_monotonically() {
        let mailbox = MemMailbox::new();
        assert_eq!(mailbox.next("key").await.unwrap(), 0);
        assert_eq!(mailbox.next("key").await.unwrap(), 1);
        assert_eq!(mailbox.next("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_then_retrieve() {
        let mailbox = MemMailbox::new();
        let offset = mailbox.next("key").await.unwrap();
        assert_eq!(offset, 0);

        mailbox.insert("key", element(0, "v")).await.unwrap();

        let els = mailbox.retrieve("key", 0, 1).await.unwrap();
        assert_eq!(els.offset, 0);
        assert_eq!(els.elements, vec![element(0, "v")]);
    }

    #[tokio::test]
    async fn retrieve_on_fresh_store_is_empty() {
        let mailbox = MemMailbox::new();
        let els = mailbox.retrieve("key", 1, 1).await.unwrap();
        assert_eq!(els, Elements { offset: 0, elements: vec![] });
    }

    #[tokio::test]
    async fn discard_advances_base_and_keeps_offsets() {
        let mailbox = MemMailbox::new();
        for _ in 0..3 {
            let offset = mailbox.next("key").await.unwrap();
            mailbox.insert("key", element(offset, "v")).await.unwrap();
        }

        mailbox.discard("key", 1).await.unwrap();

        let els = mailbox.retrieve("key", 0, 2).await.unwrap();
        assert_eq!(els.offset, 1);
        assert_eq!(els.elements, vec![element(1, "v"), element(2, "v")]);
    }

    #[tokio::test]
    async fn discard_clamps_to_stream_length() {
        let mailbox = MemMailbox::new();
        let offset = mailbox.next("key").await.unwrap();
        mailbox.insert("key", element(offset, "v")).await.unwrap();

        mailbox.discard("key", 100).await.unwrap();

        let els = mailbox.retrieve("key", 0, 1).await.unwrap();
        assert_eq!(els.offset, 1);
        assert!(els.elements.is_empty());
    }

    #[tokio::test]
    async fn insert_outside_reserved_window_fails() {
        let mailbox = MemMailbox::new();
        let _ = mailbox.next("key").await.unwrap();

        // Offset was never reserved.
        let err = mailbox.insert("key", element(5, "v")).await.unwrap_err();
        assert!(matches!(err, MailboxError::InvalidOffset));

        // Unknown stream.
        let err = mailbox.insert("other", element(0, "v")).await.unwrap_err();
        assert!(matches!(err, MailboxError::InvalidOffset));
    }

    #[tokio::test]
    async fn insert_twice_at_same_offset_fails() {
        let mailbox = MemMailbox::new();
        let offset = mailbox.next("key").await.unwrap();
        mailbox.insert("key", element(offset, "v")).await.unwrap();

        let err = mailbox.insert("key", element(offset, "w")).await.unwrap_err();
        assert!(matches!(err, MailboxError::InvalidOffset));
    }

    #[tokio::test]
    async fn out_of_order_insert_within_window_is_accepted() {
        let mailbox = MemMailbox::new();
        let first = mailbox.next("key").await.unwrap();
        let second = mailbox.next("key").await.unwrap();

        // The later reservation completes first.
        mailbox.insert("key", element(second, "b")).await.unwrap();

        // Retrieval stops at the pending slot.
        let els = mailbox.retrieve("key", 0, 10).await.unwrap();
        assert_eq!(els.offset, 0);
        assert!(els.elements.is_empty());

        mailbox.insert("key", element(first, "a")).await.unwrap();

        let els = mailbox.retrieve("key", 0, 10).await.unwrap();
        assert_eq!(els.elements, vec![element(0, "a"), element(1, "b")]);
    }

    #[tokio::test]
    async fn retrieve_with_zero_count_reports_base() {
        let mailbox = MemMailbox::new();
        for _ in 0..2 {
            let offset = mailbox.next("key").await.unwrap();
            mailbox.insert("key", element(offset, "v")).await.unwrap();
        }
        mailbox.discard("key", 1).await.unwrap();

        let els = mailbox.retrieve("key", 0, 0).await.unwrap();
        assert_eq!(els.offset, 1);
        assert!(els.elements.is_empty());
    }

    #[tokio::test]
    async fn remove_destroys_stream() {
        let mailbox = MemMailbox::new();
        let offset = mailbox.next("key").await.unwrap();
        mailbox.insert("key", element(offset, "v")).await.unwrap();

        mailbox.remove("key").await.unwrap();

        let els = mailbox.retrieve("key", 0, 1).await.unwrap();
        assert_eq!(els, Elements::default());

        // A fresh stream starts over at offset zero.
        assert_eq!(mailbox.next("key").await.unwrap(), 0);
    }
}
