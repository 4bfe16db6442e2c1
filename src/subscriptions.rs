// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Subscription Manager
//!
//! Creates, indexes and destroys per-session subscriptions. Each
//! subscription owns a mailbox stream keyed `{session}:sub:{n}`; a pump
//! task turns every upstream log into a data event appended to that
//! stream. Subscription numbers are allocated from the session's subinfo
//! stream, which doubles as the durable record of what was created.
//!
//! Active subscriptions are indexed by stream key in a process-local
//! registry holding each pump's cancellation token; upstream handles
//! never point back at the manager.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendClient, BackendError};
use crate::chain::{LogEntry, LogFilter};
use crate::events::{
    publish, sub_stream_key, subinfo_key, DataEvent, Event, PollError, PolledEvents,
};
use crate::mailbox::{Element, Mailbox, MailboxError};

/// Element tag for subscription records in the subinfo stream.
const SUBSCRIPTION_RECORD_TYPE: &str = "subscription";

/// The only upstream event kind served today.
const LOGS_EVENT: &str = "logs";

/// Durable record of a created subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriptionRecord {
    sub_id: String,
    event: String,
    address: String,
    topics: Vec<String>,
}

/// Subscription failures surfaced to handlers.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("unsupported subscription event {0:?}")]
    UnsupportedEvent(String),

    #[error("subscription not found")]
    NotFound,

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to record subscription: {0}")]
    Record(#[from] serde_json::Error),
}

struct SubscriptionHandle {
    cancel: CancellationToken,
}

pub struct SubscriptionManager {
    mailbox: Arc<dyn Mailbox>,
    backend: Arc<dyn BackendClient>,
    shutdown: CancellationToken,
    active: Mutex<HashMap<String, SubscriptionHandle>>,
}

impl SubscriptionManager {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        backend: Arc<dyn BackendClient>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            mailbox,
            backend,
            shutdown,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Create a subscription and start pumping its events. Returns the
    /// subscription number the client polls with.
    pub async fn subscribe(
        &self,
        session_key: &str,
        event: &str,
        address: String,
        topics: Vec<String>,
    ) -> Result<u64, SubscriptionError> {
        if event != LOGS_EVENT {
            return Err(SubscriptionError::UnsupportedEvent(event.to_string()));
        }

        let info_key = subinfo_key(session_key);
        let id = self.mailbox.next(&info_key).await?;
        let sub_key = sub_stream_key(session_key, id);

        let record = SubscriptionRecord {
            sub_id: sub_key.clone(),
            event: event.to_string(),
            address: address.clone(),
            topics: topics.clone(),
        };
        self.mailbox
            .insert(
                &info_key,
                Element {
                    offset: id,
                    kind: SUBSCRIPTION_RECORD_TYPE.to_string(),
                    value: serde_json::to_string(&record)?,
                },
            )
            .await?;

        let cancel = self.shutdown.child_token();
        let upstream = self
            .backend
            .subscribe_logs(
                LogFilter {
                    address: (!address.is_empty()).then_some(address),
                    topics,
                },
                cancel.clone(),
            )
            .await?;

        let mailbox = Arc::clone(&self.mailbox);
        let pump_key = sub_key.clone();
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            pump(mailbox, pump_key, upstream, pump_cancel).await;
        });

        self.active
            .lock()
            .await
            .insert(sub_key, SubscriptionHandle { cancel });

        tracing::debug!(session_key, id, "subscription created");
        Ok(id)
    }

    /// Poll a subscription's stream.
    pub async fn poll_event(
        &self,
        session_key: &str,
        id: u64,
        offset: u64,
        count: u32,
        discard_previous: bool,
    ) -> Result<PolledEvents, PollError> {
        let key = sub_stream_key(session_key, id);
        crate::events::poll_stream(self.mailbox.as_ref(), &key, offset, count, discard_previous)
            .await
    }

    /// Stop the pump and destroy the subscription's stream.
    pub async fn unsubscribe(&self, session_key: &str, id: u64) -> Result<(), SubscriptionError> {
        let key = sub_stream_key(session_key, id);

        let handle = self
            .active
            .lock()
            .await
            .remove(&key)
            .ok_or(SubscriptionError::NotFound)?;
        handle.cancel.cancel();

        self.mailbox.remove(&key).await?;
        tracing::debug!(session_key, id, "subscription destroyed");
        Ok(())
    }
}

/// Append every upstream log to the subscription's stream until the
/// upstream closes or the subscription is cancelled.
async fn pump(
    mailbox: Arc<dyn Mailbox>,
    key: String,
    mut upstream: mpsc::Receiver<LogEntry>,
    cancel: CancellationToken,
) {
    loop {
        let entry = tokio::select! {
            entry = upstream.recv() => match entry {
                Some(entry) => entry,
                None => return,
            },
            _ = cancel.cancelled() => return,
        };

        let offset = match mailbox.next(&key).await {
            Ok(offset) => offset,
            Err(err) => {
                tracing::error!(key, error = %err, "failed to reserve offset for data event");
                continue;
            }
        };

        let event = Event::Data(DataEvent {
            id: offset,
            data: entry.data,
            topics: entry.topics,
        });
        publish(mailbox.as_ref(), &key, offset, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::mailbox::mem::MemMailbox;
    use std::time::Duration;

    const SESSION: &str = "alice:default";

    fn manager() -> (SubscriptionManager, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::default());
        let manager = SubscriptionManager::new(
            Arc::new(MemMailbox::new()),
            Arc::clone(&backend) as Arc<dyn BackendClient>,
            CancellationToken::new(),
        );
        (manager, backend)
    }

    fn log(data: &str) -> LogEntry {
        LogEntry {
            data: data.to_string(),
            topics: vec!["0x01".to_string()],
        }
    }

    async fn wait_for_events(
        manager: &SubscriptionManager,
        id: u64,
        expected: usize,
    ) -> PolledEvents {
        for _ in 0..100 {
            let polled = manager
                .poll_event(SESSION, id, 0, 100, false)
                .await
                .unwrap();
            if polled.events.len() >= expected {
                return polled;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("events did not arrive");
    }

    #[tokio::test]
    async fn subscription_numbers_are_session_sequential() {
        let (manager, _backend) = manager();

        let first = manager
            .subscribe(SESSION, "logs", String::new(), vec![])
            .await
            .unwrap();
        let second = manager
            .subscribe(SESSION, "logs", String::new(), vec![])
            .await
            .unwrap();

        assert_eq!((first, second), (0, 1));
    }

    #[tokio::test]
    async fn only_log_subscriptions_are_supported() {
        let (manager, _backend) = manager();

        let err = manager
            .subscribe(SESSION, "blocks", String::new(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::UnsupportedEvent(_)));
    }

    #[tokio::test]
    async fn upstream_logs_become_ordered_data_events() {
        let (manager, backend) = manager();

        let id = manager
            .subscribe(SESSION, "logs", String::new(), vec![])
            .await
            .unwrap();

        let feed = backend.log_feeds.lock().unwrap().remove(0);
        feed.send(log("0xaa")).await.unwrap();
        feed.send(log("0xbb")).await.unwrap();

        let polled = wait_for_events(&manager, id, 2).await;
        assert_eq!(polled.offset, 0);
        match (&polled.events[0], &polled.events[1]) {
            (Event::Data(first), Event::Data(second)) => {
                assert_eq!((first.id, first.data.as_str()), (0, "0xaa"));
                assert_eq!((second.id, second.data.as_str()), (1, "0xbb"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_with_discard_consumes_the_prefix() {
        let (manager, backend) = manager();

        let id = manager
            .subscribe(SESSION, "logs", String::new(), vec![])
            .await
            .unwrap();

        let feed = backend.log_feeds.lock().unwrap().remove(0);
        for data in ["0xaa", "0xbb", "0xcc"] {
            feed.send(log(data)).await.unwrap();
        }
        wait_for_events(&manager, id, 3).await;

        let polled = manager.poll_event(SESSION, id, 2, 10, true).await.unwrap();
        assert_eq!(polled.offset, 2);
        assert_eq!(polled.events.len(), 1);

        let polled = manager.poll_event(SESSION, id, 0, 10, false).await.unwrap();
        assert_eq!(polled.offset, 2);
        assert_eq!(polled.events.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_destroys_the_stream() {
        let (manager, backend) = manager();

        let id = manager
            .subscribe(SESSION, "logs", String::new(), vec![])
            .await
            .unwrap();

        let feed = backend.log_feeds.lock().unwrap().remove(0);
        feed.send(log("0xaa")).await.unwrap();
        wait_for_events(&manager, id, 1).await;

        manager.unsubscribe(SESSION, id).await.unwrap();

        let polled = manager.poll_event(SESSION, id, 0, 10, false).await.unwrap();
        assert!(polled.events.is_empty());

        // A second unsubscribe no longer finds it.
        let err = manager.unsubscribe(SESSION, id).await.unwrap_err();
        assert!(matches!(err, SubscriptionError::NotFound));
    }
}
