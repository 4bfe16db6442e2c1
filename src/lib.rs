// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Gateway - Developer Gateway Service
//!
//! This crate fronts the execution backend with an HTTP API providing
//! asynchronous request/response semantics: a client submits a
//! long-running operation (deploy a service, execute a service, subscribe
//! to events) and immediately receives a monotonically increasing event
//! identifier, then polls per-session event streams to collect ordered
//! results.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Authentication plugins and middleware
//! - `backend` - Execution backend client
//! - `chain` - JSON-RPC chain client
//! - `dispatcher` - Reserve-then-publish request dispatching
//! - `events` - Event variants, codec, stream polling
//! - `mailbox` - Per-session ordered event streams
//! - `retry` - Bounded backoff retry engine
//! - `subscriptions` - Subscription lifecycle and pumping
//! - `wallet` - Single-writer wallet owners

pub mod api;
pub mod auth;
pub mod backend;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mailbox;
pub mod retry;
pub mod state;
pub mod subscriptions;
pub mod wallet;
