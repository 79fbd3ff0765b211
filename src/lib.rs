// ABOUTME: RPC transport adapter serving pattern-keyed handlers over HTTP/1.1, TLS and HTTP/2
// ABOUTME: Re-exports the registry, resolver, stream coercion, router and listener lifecycle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Bufbridge: RPC Transport Adapter
//!
//! Lets an application register handlers keyed by `(service, method,
//! streaming kind)` patterns and serves them over one of four transports:
//! plaintext HTTP/1.1, HTTP/1.1 over TLS, HTTP/2 over TLS and HTTP/2 with
//! prior knowledge.
//!
//! Handlers may return a plain value, a future, a push-based source or a
//! pull-based stream. Every result is coerced into one
//! [`CanonicalSequence`](types::CanonicalSequence) before it reaches the
//! protocol layer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bufbridge::{BridgeServer, MetadataRegistry, MethodDescriptor, MethodPattern};
//! use bufbridge::{ResultShape, ServerConfig, ServiceDescriptor, StreamingKind};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), bufbridge::types::BridgeError> {
//! let mut registry = MetadataRegistry::new();
//! registry.register(
//!     ServiceDescriptor::new("echo.v1.EchoService")
//!         .with_method(MethodDescriptor::unary("Say", "echo.v1.SayRequest", "echo.v1.SayResponse")),
//! );
//!
//! let mut server = BridgeServer::new(Arc::new(registry), ServerConfig::plaintext(3000));
//! server.add_handler(
//!     MethodPattern::new("echo.v1.EchoService", "Say", StreamingKind::Unary),
//!     |request, _ctx| ResultShape::value(json!({ "sentence": request["sentence"] })),
//! );
//!
//! let addr = server.listen().await?;
//! println!("listening on {addr}");
//! server.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: Error taxonomy, message alias, call context, canonical sequence
//! - [`pattern`]: Pattern codec for handler keys
//! - [`registry`]: Service and method descriptors
//! - [`stream`]: Coercion of handler results into canonical sequences
//! - [`resolver`]: Builds the per-service handler table
//! - [`router`]: Mounts handlers as HTTP routes
//! - [`server`]: Listener lifecycle for all transport variants
//! - [`tls`]: Certificate loading and ALPN selection
//! - [`config`]: Listener configuration
//! - [`bridge`]: Transport strategy tying everything together

/// Core types: errors, messages, call context, sequences
pub mod types;

/// Transport strategy owning registry, registrations and listener
pub mod bridge;
/// Listener configuration and protocol variants
pub mod config;
/// Pattern codec for handler registration keys
pub mod pattern;
/// Service and method metadata registry
pub mod registry;
/// Handler resolution against the registry
pub mod resolver;
/// Router builder and HTTP call handling
pub mod router;
/// Listener lifecycle
pub mod server;
/// Result shape coercion into canonical sequences
pub mod stream;
/// TLS server configuration
pub mod tls;

pub use bridge::BridgeServer;
pub use config::{CertificateMaterial, ProtocolVariant, ServerConfig, ShutdownPolicy};
pub use pattern::{MethodPattern, PatternKey};
pub use registry::{MetadataRegistry, MethodDescriptor, ServiceDescriptor, StreamingKind};
pub use resolver::{HandlerRegistrations, MethodHandler, ServiceHandlerTable};
pub use router::{RouteFn, ServiceRouter};
pub use server::ListenerLifecycle;
pub use stream::{coerce, Emitter, PushSource, ResultShape, Subscribable};
pub use types::{BridgeError, CallContext, CanonicalSequence, ErrorKind, Message};
