// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.
//!
//! Each module owns its own error enum; this one aggregates them for callers
//! that drive several components at once and want a single `?` target.

use thiserror::Error;

/// Result type for pitchside operations
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregated error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::robot::TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("RPC error: {0}")]
    Rpc(#[from] crate::control::RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
