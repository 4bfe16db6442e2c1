// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Events
//!
//! The four event variants a client can poll for, their tag-discriminated
//! codec to and from mailbox elements, and the shared stream-polling
//! helper used by both the service stream and subscription streams.
//!
//! The tag strings and the `{session}:sub:{n}` / `{session}:subinfo` key
//! shapes are part of the deployed wire format; stored streams must stay
//! readable across gateway versions.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::mailbox::{Element, Mailbox, MailboxError};

pub const DEPLOY_SERVICE_EVENT_TYPE: &str = "deployServiceEventType";
pub const EXECUTE_SERVICE_EVENT_TYPE: &str = "executeServiceEventType";
pub const ERROR_EVENT_TYPE: &str = "errorEventType";
pub const DATA_EVENT_TYPE: &str = "dataEventType";

/// Error-code registry for events surfaced to clients.
pub mod codes {
    /// Unclassified internal failure.
    pub const INTERNAL_ERROR: i64 = 1;
    /// Transaction executed on chain but the receipt reported failure.
    pub const EXECUTION_FAILED: i64 = 1000;
    /// The request task was cancelled before the backend completed.
    pub const EXECUTION_ABORTED: i64 = 1001;
}

/// Cause carried by an [`ErrorEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorInfo {
    pub error_code: i64,
    pub description: String,
}

impl ErrorInfo {
    pub fn internal(description: impl Into<String>) -> Self {
        Self {
            error_code: codes::INTERNAL_ERROR,
            description: description.into(),
        }
    }

    pub fn aborted() -> Self {
        Self {
            error_code: codes::EXECUTION_ABORTED,
            description: "execution aborted".to_string(),
        }
    }
}

/// Result of a service deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeployServiceEvent {
    /// Sequence number reserved for the request; orders the event within
    /// the session's stream.
    pub id: u64,
    /// Address at which the deployed service can be executed.
    pub address: String,
}

/// Result of a service execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExecuteServiceEvent {
    pub id: u64,
    pub address: String,
    /// Output produced by the service.
    pub output: String,
}

/// Failure of an asynchronous request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorEvent {
    pub id: u64,
    pub cause: ErrorInfo,
}

/// A log delivered through a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DataEvent {
    pub id: u64,
    pub data: String,
    pub topics: Vec<String>,
}

/// Any event a client can poll. Serialized untagged in API responses;
/// clients discriminate by shape, the mailbox discriminates by tag.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum Event {
    DeployService(DeployServiceEvent),
    ExecuteService(ExecuteServiceEvent),
    Error(ErrorEvent),
    Data(DataEvent),
}

impl Event {
    pub fn id(&self) -> u64 {
        match self {
            Event::DeployService(e) => e.id,
            Event::ExecuteService(e) => e.id,
            Event::Error(e) => e.id,
            Event::Data(e) => e.id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::DeployService(_) => DEPLOY_SERVICE_EVENT_TYPE,
            Event::ExecuteService(_) => EXECUTE_SERVICE_EVENT_TYPE,
            Event::Error(_) => ERROR_EVENT_TYPE,
            Event::Data(_) => DATA_EVENT_TYPE,
        }
    }
}

/// Codec failures on the retrieval path.
#[derive(Debug, thiserror::Error)]
pub enum EventCodecError {
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),

    #[error("failed to deserialize event: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Encode an event into a mailbox element at the given offset.
pub fn encode(event: &Event, offset: u64) -> Result<Element, EventCodecError> {
    let value = match event {
        Event::DeployService(e) => serde_json::to_string(e),
        Event::ExecuteService(e) => serde_json::to_string(e),
        Event::Error(e) => serde_json::to_string(e),
        Event::Data(e) => serde_json::to_string(e),
    }
    .map_err(EventCodecError::Serialize)?;

    Ok(Element {
        offset,
        kind: event.event_type().to_string(),
        value,
    })
}

/// Decode a mailbox element back into its event.
pub fn decode(element: &Element) -> Result<Event, EventCodecError> {
    match element.kind.as_str() {
        DEPLOY_SERVICE_EVENT_TYPE => serde_json::from_str(&element.value)
            .map(Event::DeployService)
            .map_err(EventCodecError::Deserialize),
        EXECUTE_SERVICE_EVENT_TYPE => serde_json::from_str(&element.value)
            .map(Event::ExecuteService)
            .map_err(EventCodecError::Deserialize),
        ERROR_EVENT_TYPE => serde_json::from_str(&element.value)
            .map(Event::Error)
            .map_err(EventCodecError::Deserialize),
        DATA_EVENT_TYPE => serde_json::from_str(&element.value)
            .map(Event::Data)
            .map_err(EventCodecError::Deserialize),
        other => Err(EventCodecError::UnknownEventType(other.to_string())),
    }
}

// =============================================================================
// Stream keys
// =============================================================================

/// Stream carrying deploy/execute results for a session.
pub fn service_stream_key(session_key: &str) -> String {
    format!("{session_key}:service")
}

/// Stream carrying data events for one subscription of a session.
pub fn sub_stream_key(session_key: &str, id: u64) -> String {
    format!("{session_key}:sub:{id}")
}

/// Stream recording the subscriptions a session has created.
pub fn subinfo_key(session_key: &str) -> String {
    format!("{session_key}:subinfo")
}

// =============================================================================
// Polling
// =============================================================================

/// A decoded window of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PolledEvents {
    /// Offset of the first returned event, or the stream base when empty.
    pub offset: u64,
    pub events: Vec<Event>,
}

/// Failures while polling a stream.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Codec(#[from] EventCodecError),
}

/// Retrieve and decode a window of a stream, optionally discarding
/// everything before `offset` first.
pub async fn poll_stream(
    mailbox: &dyn Mailbox,
    key: &str,
    offset: u64,
    count: u32,
    discard_previous: bool,
) -> Result<PolledEvents, PollError> {
    if discard_previous {
        // discard() counts from the stream base; a zero-length retrieve
        // reports the current base without moving anything.
        let base = mailbox.retrieve(key, 0, 0).await?.offset;
        if offset > base {
            mailbox.discard(key, offset - base).await?;
        }
    }

    let window = mailbox.retrieve(key, offset, count).await?;

    let mut events = Vec::with_capacity(window.elements.len());
    for element in &window.elements {
        events.push(decode(element)?);
    }

    Ok(PolledEvents {
        offset: window.offset,
        events,
    })
}

/// Publish an event at its reserved offset. Publication failure leaves a
/// permanent gap in the stream and is only logged; the client observes the
/// gap, not the cause.
pub async fn publish(mailbox: &dyn Mailbox, key: &str, offset: u64, event: &Event) {
    let element = match encode(event, offset) {
        Ok(element) => element,
        Err(err) => {
            tracing::error!(key, offset, error = %err, "failed to encode event for publication");
            return;
        }
    };

    if let Err(err) = mailbox.insert(key, element).await {
        tracing::error!(key, offset, error = %err, "failed to publish event");
    }
}
