// ABOUTME: Core types shared by the bridge — error taxonomy, message alias, and per-call context
// ABOUTME: Provides BridgeError with kind-specific constructors and the CanonicalSequence stream type
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Core Types
//!
//! Definitions used by every layer of the bridge: the single error type,
//! the already-decoded message representation, the per-call context handed
//! to raw handlers, and the canonical sequence that both unary and
//! streaming results are normalized into.

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::HeaderMap;
use tokio_stream::Stream;

// ============================================================================
// Error Type
// ============================================================================

/// Error type for every bridge operation
#[derive(Debug, Clone)]
pub struct BridgeError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Underlying cause, kept for `ServerStartFailure` and friends
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

/// Categories of errors produced by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Protocol variant name is not one of the four supported variants
    InvalidProtocol,
    /// Listener construction or socket binding failed
    ServerStartFailure,
    /// `close` was called while no listener is active
    ServerNotRunning,
    /// `listen` was called while a listener is already active
    AlreadyListening,
    /// A handler result could not be normalized into a sequence
    UnsupportedResultShape,
    /// A pattern names a streaming kind the bridge cannot serve
    InvalidStreamingKind,
    /// A unary call produced no value before completing
    EmptySequence,
    /// A pattern key could not be decoded
    MalformedPattern,
    /// Error raised by an application handler
    Handler,
    /// The request could not be decoded or is otherwise invalid
    InvalidArgument,
    /// Configuration error (missing certificate, unreadable config file)
    Config,
    /// Internal bridge error (bug, unexpected state)
    Internal,
}

impl BridgeError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid-protocol error for the given variant name
    pub fn invalid_protocol(protocol: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidProtocol,
            format!("Invalid protocol option: {protocol}"),
        )
    }

    /// Create a start failure that preserves the underlying cause
    pub fn server_start_failure(
        message: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: ErrorKind::ServerStartFailure,
            message: message.into(),
            source: Some(Arc::new(cause)),
        }
    }

    /// Create a start failure with no underlying error value
    pub fn server_start_message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerStartFailure, message)
    }

    /// Create a server-not-running error
    pub fn server_not_running() -> Self {
        Self::new(ErrorKind::ServerNotRunning, "Server is not running")
    }

    /// Create an already-listening error
    pub fn already_listening(address: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::AlreadyListening,
            format!("Server is already listening on {address}"),
        )
    }

    /// Create an unsupported-result-shape error
    pub fn unsupported_result_shape(shape: &str, expected: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedResultShape,
            format!("Unsupported result shape: {shape}. Expected {expected}"),
        )
    }

    /// Create an invalid-streaming-kind error
    pub fn invalid_streaming_kind(kind: impl fmt::Display, pattern: &str) -> Self {
        Self::new(
            ErrorKind::InvalidStreamingKind,
            format!("Cannot serve streaming kind {kind} for pattern {pattern}"),
        )
    }

    /// Create an empty-sequence error for a unary method
    pub fn empty_sequence(service: &str, method: &str) -> Self {
        Self::new(
            ErrorKind::EmptySequence,
            format!("{service}/{method} completed without producing a response"),
        )
    }

    /// Create a malformed-pattern error
    pub fn malformed_pattern(
        pattern: &str,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: ErrorKind::MalformedPattern,
            message: format!("Malformed handler pattern {pattern}: {cause}"),
            source: Some(Arc::new(cause)),
        }
    }

    /// Create an application handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl StdError for BridgeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

// ============================================================================
// Messages and Sequences
// ============================================================================

/// An already-decoded request or response message
///
/// The wire codec lives in the protocol layer; handlers only ever see
/// JSON values.
pub type Message = serde_json::Value;

/// Lazy, ordered, one-directional sequence of values ending in completion or an error
pub type CanonicalSequence<T> = Pin<Box<dyn Stream<Item = Result<T, BridgeError>> + Send>>;

// ============================================================================
// Call Context
// ============================================================================

/// Per-call information handed to raw handlers alongside the request
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Fully qualified service name
    pub service: String,
    /// Method name within the service
    pub method: String,
    /// Request headers as received by the protocol layer
    pub headers: HeaderMap,
}

impl CallContext {
    /// Create a context with no request headers
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Attach the request headers
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}
