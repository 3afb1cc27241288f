// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and credential lifecycle for the tourkit client.
//!
//! Keeps a valid credential set on hand (single-flight refresh, proactive
//! expiry warnings, provider lifecycle events) and tracks user inactivity
//! on an independent axis. [`facade::SessionFacade`] is the entry point.

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod idle;
pub mod monitor;
pub mod provider;
pub mod refresh;
pub mod test_support;
pub mod token;
