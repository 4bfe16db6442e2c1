// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Application State
//!
//! Shared state passed to all request handlers via the `State` extractor.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          AppState                             │
//! │  ┌───────────────────┐ ┌──────────────────────┐ ┌──────────┐  │
//! │  │ RequestDispatcher │ │ SubscriptionManager  │ │ dyn Auth │  │
//! │  │  - mailbox        │ │  - mailbox           │ └──────────┘  │
//! │  │  - backend        │ │  - backend           │               │
//! │  └───────────────────┘ └──────────────────────┘               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! `AppState` is `Clone` and `Send + Sync`; every component is behind an
//! `Arc` so handlers share one dispatcher, one subscription manager and
//! one auth plugin.

use std::sync::Arc;

use crate::auth::Auth;
use crate::dispatcher::RequestDispatcher;
use crate::subscriptions::SubscriptionManager;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RequestDispatcher>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub auth: Arc<dyn Auth>,
    /// Configured mailbox provider name, reported by health checks.
    pub mailbox_provider: &'static str,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<RequestDispatcher>,
        subscriptions: Arc<SubscriptionManager>,
        auth: Arc<dyn Auth>,
        mailbox_provider: &'static str,
    ) -> Self {
        Self {
            dispatcher,
            subscriptions,
            auth,
            mailbox_provider,
        }
    }
}
