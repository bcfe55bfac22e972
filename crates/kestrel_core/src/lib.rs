/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod ap;
pub mod authenticate;
pub mod bus;
pub mod client_api;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod http_retry;
pub mod http_sig;
pub mod key_resolver;
pub mod keys;
pub mod model;
pub mod outbound;
pub mod processor;
pub mod runtime;
pub mod streaming;
pub mod timeline;
pub mod transport;
pub mod typeutils;
pub mod uris;
pub mod visibility;

#[cfg(test)]
mod testrig;

