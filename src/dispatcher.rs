// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Dispatcher
//!
//! Every asynchronous request follows the same shape: reserve the next
//! sequence number of the session's service stream, hand that number back
//! to the caller immediately, and run the backend work on a detached task
//! that publishes the result (or failure) at exactly that offset.
//!
//! Reserving before the work starts is what makes the client-visible
//! event id stable: whatever happens to the backend call, polling from
//! the returned id eventually observes exactly one event carrying it.
//! Tasks interrupted by shutdown publish an execution-aborted error event
//! at their offset so poll progress is never stuck behind a reservation
//! that will not be filled.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendClient, DeployServiceRequest, ExecuteServiceRequest, GetCodeRequest, GetCodeResponse,
    GetPublicKeyRequest, GetPublicKeyResponse,
};
use crate::events::{
    publish, service_stream_key, DeployServiceEvent, ErrorEvent, ErrorInfo, Event,
    ExecuteServiceEvent, PollError, PolledEvents,
};
use crate::mailbox::{Mailbox, MailboxError};

pub struct RequestDispatcher {
    mailbox: Arc<dyn Mailbox>,
    backend: Arc<dyn BackendClient>,
    shutdown: CancellationToken,
}

impl RequestDispatcher {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        backend: Arc<dyn BackendClient>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            mailbox,
            backend,
            shutdown,
        }
    }

    /// Submit a service deployment. Returns the event id the result will
    /// carry.
    pub async fn deploy_service(
        &self,
        session_key: &str,
        data: String,
    ) -> Result<u64, MailboxError> {
        let key = service_stream_key(session_key);
        let offset = self.mailbox.next(&key).await?;

        let backend = Arc::clone(&self.backend);
        let mailbox = Arc::clone(&self.mailbox);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let event = tokio::select! {
                result = backend.deploy_service(DeployServiceRequest { id: offset, data }) => {
                    match result {
                        Ok(response) => Event::DeployService(DeployServiceEvent {
                            id: offset,
                            address: response.address,
                        }),
                        Err(err) => {
                            tracing::debug!(id = offset, error = %err, "service deployment failed");
                            Event::Error(ErrorEvent { id: offset, cause: err.to_error_info() })
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    Event::Error(ErrorEvent { id: offset, cause: ErrorInfo::aborted() })
                }
            };

            publish(mailbox.as_ref(), &key, offset, &event).await;
        });

        Ok(offset)
    }

    /// Submit a service execution. Returns the event id the result will
    /// carry.
    pub async fn execute_service(
        &self,
        session_key: &str,
        address: String,
        data: String,
    ) -> Result<u64, MailboxError> {
        let key = service_stream_key(session_key);
        let offset = self.mailbox.next(&key).await?;

        let backend = Arc::clone(&self.backend);
        let mailbox = Arc::clone(&self.mailbox);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let request = ExecuteServiceRequest {
                id: offset,
                address,
                data,
            };
            let event = tokio::select! {
                result = backend.execute_service(request) => {
                    match result {
                        Ok(response) => Event::ExecuteService(ExecuteServiceEvent {
                            id: offset,
                            address: response.address,
                            output: response.output,
                        }),
                        Err(err) => {
                            tracing::debug!(id = offset, error = %err, "service execution failed");
                            Event::Error(ErrorEvent { id: offset, cause: err.to_error_info() })
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    Event::Error(ErrorEvent { id: offset, cause: ErrorInfo::aborted() })
                }
            };

            publish(mailbox.as_ref(), &key, offset, &event).await;
        });

        Ok(offset)
    }

    /// Poll the session's service stream.
    pub async fn poll_service(
        &self,
        session_key: &str,
        offset: u64,
        count: u32,
        discard_previous: bool,
    ) -> Result<PolledEvents, PollError> {
        let key = service_stream_key(session_key);
        crate::events::poll_stream(self.mailbox.as_ref(), &key, offset, count, discard_previous)
            .await
    }

    /// Synchronous passthrough: code stored at a service address.
    pub async fn get_code(
        &self,
        request: GetCodeRequest,
    ) -> Result<GetCodeResponse, crate::backend::BackendError> {
        self.backend.get_code(request).await
    }

    /// Synchronous passthrough: public key of a service address.
    pub async fn get_public_key(
        &self,
        request: GetPublicKeyRequest,
    ) -> Result<GetPublicKeyResponse, crate::backend::BackendError> {
        self.backend.get_public_key(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::backend::{BackendError, DeployServiceResponse};
    use crate::events::codes;
    use crate::mailbox::mem::MemMailbox;
    use crate::wallet::WalletError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SESSION: &str = "alice:default";

    fn dispatcher_with(backend: Arc<dyn BackendClient>) -> RequestDispatcher {
        RequestDispatcher::new(
            Arc::new(MemMailbox::new()),
            backend,
            CancellationToken::new(),
        )
    }

    /// Poll until the expected number of events is visible.
    async fn wait_for_events(
        dispatcher: &RequestDispatcher,
        offset: u64,
        expected: usize,
    ) -> PolledEvents {
        for _ in 0..100 {
            let polled = dispatcher
                .poll_service(SESSION, offset, 100, false)
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
    async fn deploy_publishes_at_the_reserved_offset() {
        let dispatcher = dispatcher_with(Arc::new(MockBackend::default()));

        let id = dispatcher
            .deploy_service(SESSION, "0x01".to_string())
            .await
            .unwrap();
        assert_eq!(id, 0);

        let polled = wait_for_events(&dispatcher, id, 1).await;
        assert_eq!(polled.offset, 0);
        match &polled.events[0] {
            Event::DeployService(event) => {
                assert_eq!(event.id, id);
                assert!(!event.address.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_becomes_an_error_event_with_the_same_id() {
        let backend = MockBackend::default();
        backend.deploy_script.lock().unwrap().push_back(Err(BackendError::Wallet(
            WalletError::Execution {
                code: codes::EXECUTION_FAILED,
                message: "transaction failed".to_string(),
            },
        )));
        let dispatcher = dispatcher_with(Arc::new(backend));

        let id = dispatcher
            .deploy_service(SESSION, "0x01".to_string())
            .await
            .unwrap();

        let polled = wait_for_events(&dispatcher, id, 1).await;
        match &polled.events[0] {
            Event::Error(event) => {
                assert_eq!(event.id, id);
                assert_eq!(event.cause.error_code, codes::EXECUTION_FAILED);
                assert_eq!(event.cause.description, "transaction failed");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_ids_follow_allocation_order() {
        let backend = MockBackend::default();
        backend.deploy_script.lock().unwrap().extend([
            Ok(DeployServiceResponse { address: "0x01".to_string() }),
            Ok(DeployServiceResponse { address: "0x02".to_string() }),
        ]);
        let dispatcher = dispatcher_with(Arc::new(backend));

        let first = dispatcher
            .deploy_service(SESSION, "0xaa".to_string())
            .await
            .unwrap();
        let second = dispatcher
            .execute_service(SESSION, "0x00000000000000000000000000000000000000bb".to_string(), "0xbb".to_string())
            .await
            .unwrap();
        assert_eq!((first, second), (0, 1));

        let polled = wait_for_events(&dispatcher, 0, 2).await;
        assert_eq!(polled.events[0].id(), 0);
        assert_eq!(polled.events[1].id(), 1);
    }

    /// Backend whose calls never complete, for cancellation tests.
    struct HangingBackend;

    #[async_trait]
    impl BackendClient for HangingBackend {
        async fn deploy_service(
            &self,
            _request: DeployServiceRequest,
        ) -> Result<DeployServiceResponse, BackendError> {
            std::future::pending().await
        }

        async fn execute_service(
            &self,
            _request: ExecuteServiceRequest,
        ) -> Result<crate::backend::ExecuteServiceResponse, BackendError> {
            std::future::pending().await
        }

        async fn get_code(
            &self,
            _request: GetCodeRequest,
        ) -> Result<GetCodeResponse, BackendError> {
            std::future::pending().await
        }

        async fn get_public_key(
            &self,
            _request: GetPublicKeyRequest,
        ) -> Result<GetPublicKeyResponse, BackendError> {
            std::future::pending().await
        }

        async fn subscribe_logs(
            &self,
            _filter: crate::chain::LogFilter,
            _shutdown: CancellationToken,
        ) -> Result<mpsc::Receiver<crate::chain::LogEntry>, BackendError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_publishes_an_abort_event_at_the_reserved_offset() {
        let shutdown = CancellationToken::new();
        let dispatcher = RequestDispatcher::new(
            Arc::new(MemMailbox::new()),
            Arc::new(HangingBackend),
            shutdown.clone(),
        );

        let id = dispatcher
            .deploy_service(SESSION, "0x01".to_string())
            .await
            .unwrap();

        shutdown.cancel();

        let polled = wait_for_events(&dispatcher, id, 1).await;
        match &polled.events[0] {
            Event::Error(event) => {
                assert_eq!(event.id, id);
                assert_eq!(event.cause.error_code, codes::EXECUTION_ABORTED);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_with_discard_drops_consumed_events() {
        let dispatcher = dispatcher_with(Arc::new(MockBackend::default()));

        for _ in 0..3 {
            dispatcher
                .deploy_service(SESSION, "0x01".to_string())
                .await
                .unwrap();
        }
        wait_for_events(&dispatcher, 0, 3).await;

        let polled = dispatcher.poll_service(SESSION, 2, 10, true).await.unwrap();
        assert_eq!(polled.offset, 2);
        assert_eq!(polled.events.len(), 1);

        let polled = dispatcher.poll_service(SESSION, 0, 10, false).await.unwrap();
        assert_eq!(polled.offset, 2);
    }
}
