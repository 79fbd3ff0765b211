// ABOUTME: Bridge server tying the metadata registry, raw handler registrations and one listener together
// ABOUTME: Resolves handlers into a fresh table on every listen and mounts each known service on the router
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::config::ServerConfig;
use crate::pattern::PatternKey;
use crate::registry::MetadataRegistry;
use crate::resolver::{self, HandlerRegistrations, RawHandler};
use crate::router::{RouteFn, ServiceRouter};
use crate::server::ListenerLifecycle;
use crate::stream::ResultShape;
use crate::types::{BridgeError, CallContext, Message};

/// Transport strategy serving pattern-keyed handlers over one listener
///
/// Handlers are added before [`listen`](Self::listen); each `listen`
/// resolves them against the registry from scratch.
pub struct BridgeServer {
    registry: Arc<MetadataRegistry>,
    config: ServerConfig,
    registrations: HandlerRegistrations,
    lifecycle: ListenerLifecycle,
}

impl BridgeServer {
    /// Create a bridge over a populated registry
    pub fn new(registry: Arc<MetadataRegistry>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            registrations: HandlerRegistrations::new(),
            lifecycle: ListenerLifecycle::new(),
        }
    }

    /// Register a handler under a structured or already encoded pattern
    pub fn add_handler<F>(&mut self, pattern: impl Into<PatternKey>, handler: F) -> &mut Self
    where
        F: Fn(Message, CallContext) -> ResultShape<Message> + Send + Sync + 'static,
    {
        self.registrations.add(pattern, handler);
        self
    }

    /// Register an already shared handler
    pub fn add_raw_handler(&mut self, pattern: impl Into<PatternKey>, handler: RawHandler) -> &mut Self {
        self.registrations.add_raw(pattern, handler);
        self
    }

    /// The registry handlers are resolved against
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// Listener configuration
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Raw registrations added so far
    pub const fn registrations(&self) -> &HandlerRegistrations {
        &self.registrations
    }

    /// Route callback resolving the registrations and mounting every resolved service
    pub fn build_router(&self) -> RouteFn {
        let registry = Arc::clone(&self.registry);
        let registrations = self.registrations.clone();

        Arc::new(move |router: &mut ServiceRouter| {
            let table = resolver::build(&registrations, &registry)?;
            for (name, handlers) in table.services() {
                let Some(descriptor) = registry.get(name) else {
                    continue;
                };
                debug!(service = %name, methods = handlers.len(), "Mounting service");
                router.service(descriptor, handlers.clone());
            }
            Ok(())
        })
    }

    /// Start the listener
    pub async fn listen(&mut self) -> Result<SocketAddr, BridgeError> {
        let route = self.build_router();
        self.lifecycle.listen(&self.config, &route).await
    }

    /// Stop the listener
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        self.lifecycle.close().await
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    /// Whether the listener is active
    pub fn is_listening(&self) -> bool {
        self.lifecycle.is_listening()
    }
}
