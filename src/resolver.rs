// ABOUTME: Handler resolver joining raw pattern-keyed registrations against the metadata registry
// ABOUTME: Produces per-service tables of unary and server-streaming handlers over coerced results
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::pattern::{MethodPattern, PatternKey};
use crate::registry::{MetadataRegistry, StreamingKind};
use crate::stream::{coerce, last_value, ResultShape};
use crate::types::{BridgeError, CallContext, CanonicalSequence, Message};

/// Application handler as registered: `(request, context) -> result shape`
pub type RawHandler = Arc<dyn Fn(Message, CallContext) -> ResultShape<Message> + Send + Sync>;

/// Adapted unary handler resolving to exactly one response
pub type UnaryHandler =
    Arc<dyn Fn(Message, CallContext) -> BoxFuture<'static, Result<Message, BridgeError>> + Send + Sync>;

/// Adapted server-streaming handler returning a lazy response sequence
pub type StreamingHandler = Arc<
    dyn Fn(Message, CallContext) -> Result<CanonicalSequence<Message>, BridgeError> + Send + Sync,
>;

/// A single raw registration
#[derive(Clone)]
pub struct HandlerRegistration {
    /// Encoded pattern identifying the method
    pub pattern: PatternKey,
    /// Handler invoked for each call
    pub handler: RawHandler,
}

/// Raw registrations in insertion order; re-adding a pattern replaces its handler
#[derive(Clone, Default)]
pub struct HandlerRegistrations {
    entries: Vec<HandlerRegistration>,
}

impl HandlerRegistrations {
    /// Create an empty set of registrations
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `pattern`
    pub fn add<F>(&mut self, pattern: impl Into<PatternKey>, handler: F)
    where
        F: Fn(Message, CallContext) -> ResultShape<Message> + Send + Sync + 'static,
    {
        self.add_raw(pattern, Arc::new(handler));
    }

    /// Register an already shared handler under `pattern`
    pub fn add_raw(&mut self, pattern: impl Into<PatternKey>, handler: RawHandler) {
        let pattern = pattern.into();
        if let Some(existing) = self.entries.iter_mut().find(|r| r.pattern == pattern) {
            existing.handler = handler;
        } else {
            self.entries.push(HandlerRegistration { pattern, handler });
        }
    }

    /// Iterate registrations in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &HandlerRegistration> {
        self.entries.iter()
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Protocol-shaped handler for one method
#[derive(Clone)]
pub enum MethodHandler {
    /// One request, one response
    Unary(UnaryHandler),
    /// One request, a lazy sequence of responses
    ServerStreaming(StreamingHandler),
}

impl MethodHandler {
    /// Streaming kind this handler serves
    pub const fn kind(&self) -> StreamingKind {
        match self {
            Self::Unary(_) => StreamingKind::Unary,
            Self::ServerStreaming(_) => StreamingKind::ServerStreaming,
        }
    }
}

/// Method name to adapted handler for a single service
pub type ServiceHandlers = HashMap<String, MethodHandler>;

/// Service name to its adapted handlers
///
/// Built fresh by [`build`] on every server start and never patched in place.
#[derive(Clone, Default)]
pub struct ServiceHandlerTable {
    services: HashMap<String, ServiceHandlers>,
}

impl ServiceHandlerTable {
    fn insert(&mut self, service: String, method: String, handler: MethodHandler) {
        self.services
            .entry(service)
            .or_default()
            .insert(method, handler);
    }

    /// Handlers of one service
    pub fn service(&self, name: &str) -> Option<&ServiceHandlers> {
        self.services.get(name)
    }

    /// Handler of one method
    pub fn get(&self, service: &str, method: &str) -> Option<&MethodHandler> {
        self.service(service).and_then(|s| s.get(method))
    }

    /// Iterate services and their handlers
    pub fn services(&self) -> impl Iterator<Item = (&str, &ServiceHandlers)> {
        self.services.iter().map(|(name, handlers)| (name.as_str(), handlers))
    }

    /// Number of services with at least one handler
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no handler was resolved
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Resolve raw registrations against the registry
///
/// A pattern that cannot be decoded, or that names a streaming kind the
/// bridge cannot serve, fails the whole build. A pattern whose service or
/// method is unknown to the registry is skipped with a warning.
pub fn build(
    registrations: &HandlerRegistrations,
    registry: &MetadataRegistry,
) -> Result<ServiceHandlerTable, BridgeError> {
    let mut table = ServiceHandlerTable::default();

    for registration in registrations.iter() {
        let pattern = MethodPattern::decode(registration.pattern.as_str())?;

        let Some(descriptor) = registry.method(&pattern.service, &pattern.rpc) else {
            warn!(
                service = %pattern.service,
                method = %pattern.rpc,
                "No descriptor registered for handler pattern, skipping"
            );
            continue;
        };

        if descriptor.kind != pattern.streaming {
            warn!(
                service = %pattern.service,
                method = %pattern.rpc,
                declared = %descriptor.kind,
                registered = %pattern.streaming,
                "Handler streaming kind differs from descriptor, serving as registered"
            );
        }

        let handler = adapt(&pattern, Arc::clone(&registration.handler))?;
        debug!(
            service = %pattern.service,
            method = %pattern.rpc,
            kind = %pattern.streaming,
            "Resolved handler"
        );
        table.insert(pattern.service, pattern.rpc, handler);
    }

    Ok(table)
}

/// Wrap a raw handler according to the pattern's streaming kind
fn adapt(pattern: &MethodPattern, raw: RawHandler) -> Result<MethodHandler, BridgeError> {
    match pattern.streaming {
        StreamingKind::Unary => Ok(MethodHandler::Unary(Arc::new(
            move |request: Message, ctx: CallContext| {
                let service = ctx.service.clone();
                let method = ctx.method.clone();
                let shape = raw(request, ctx);
                async move {
                    let sequence = coerce(shape)?;
                    last_value(sequence)
                        .await?
                        .ok_or_else(|| BridgeError::empty_sequence(&service, &method))
                }
                .boxed()
            },
        ))),
        StreamingKind::ServerStreaming => Ok(MethodHandler::ServerStreaming(Arc::new(
            move |request: Message, ctx: CallContext| coerce(raw(request, ctx)),
        ))),
        other => Err(BridgeError::invalid_streaming_kind(other, &pattern.encode())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::pattern::encode;
    use crate::registry::{MethodDescriptor, ServiceDescriptor};
    use crate::stream::PushSource;
    use crate::types::ErrorKind;

    const ECHO: &str = "echo.v1.EchoService";

    fn registry() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry.register(
            ServiceDescriptor::new(ECHO)
                .with_method(MethodDescriptor::unary(
                    "Say",
                    "echo.v1.SayRequest",
                    "echo.v1.SayResponse",
                ))
                .with_method(MethodDescriptor::server_streaming(
                    "SayMany",
                    "echo.v1.SayRequest",
                    "echo.v1.SayResponse",
                )),
        );
        registry
    }

    fn unary(table: &ServiceHandlerTable, method: &str) -> UnaryHandler {
        match table.get(ECHO, method) {
            Some(MethodHandler::Unary(handler)) => Arc::clone(handler),
            _ => panic!("expected unary handler for {method}"),
        }
    }

    fn streaming(table: &ServiceHandlerTable, method: &str) -> StreamingHandler {
        match table.get(ECHO, method) {
            Some(MethodHandler::ServerStreaming(handler)) => Arc::clone(handler),
            _ => panic!("expected streaming handler for {method}"),
        }
    }

    #[tokio::test]
    async fn unary_handler_returns_plain_value() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(encode(ECHO, "Say", StreamingKind::Unary), |request, _ctx| {
            let sentence = request["sentence"].as_str().unwrap_or_default();
            ResultShape::value(json!({ "sentence": format!("you said: {sentence}") }))
        });

        let table = build(&registrations, &registry()).expect("build");
        let handler = unary(&table, "Say");
        let response = handler(json!({"sentence": "hi"}), CallContext::new(ECHO, "Say"))
            .await
            .expect("response");
        assert_eq!(response, json!({"sentence": "you said: hi"}));
    }

    #[tokio::test]
    async fn unary_handler_returns_last_pushed_value() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(encode(ECHO, "Say", StreamingKind::Unary), |_request, _ctx| {
            ResultShape::push(PushSource::from_values(vec![json!(1), json!(2), json!(3)]))
        });

        let table = build(&registrations, &registry()).expect("build");
        let response = unary(&table, "Say")(json!({}), CallContext::new(ECHO, "Say"))
            .await
            .expect("response");
        assert_eq!(response, json!(3));
    }

    #[tokio::test]
    async fn unary_handler_with_empty_sequence_fails() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(encode(ECHO, "Say", StreamingKind::Unary), |_request, _ctx| {
            ResultShape::push(PushSource::new(crate::stream::Emitter::complete))
        });

        let table = build(&registrations, &registry()).expect("build");
        let err = unary(&table, "Say")(json!({}), CallContext::new(ECHO, "Say"))
            .await
            .expect_err("empty");
        assert_eq!(err.kind, ErrorKind::EmptySequence);
        assert!(err.message.contains("echo.v1.EchoService/Say"));
    }

    #[tokio::test]
    async fn unary_handler_propagates_deferred_error() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(encode(ECHO, "Say", StreamingKind::Unary), |_request, _ctx| {
            ResultShape::deferred(async { Err(BridgeError::invalid_argument("sentence required")) })
        });

        let table = build(&registrations, &registry()).expect("build");
        let err = unary(&table, "Say")(json!({}), CallContext::new(ECHO, "Say"))
            .await
            .expect_err("rejected");
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn streaming_handler_is_lazy_and_ordered() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let mut registrations = HandlerRegistrations::new();
        registrations.add(
            encode(ECHO, "SayMany", StreamingKind::ServerStreaming),
            move |_request, _ctx| {
                let counter = Arc::clone(&counter);
                ResultShape::push(PushSource::new(move |emitter| {
                    for word in ["a", "b", "c"] {
                        counter.fetch_add(1, Ordering::SeqCst);
                        emitter.next(json!(word));
                    }
                    emitter.complete();
                }))
            },
        );

        let table = build(&registrations, &registry()).expect("build");
        let sequence = streaming(&table, "SayMany")(json!({}), CallContext::new(ECHO, "SayMany"))
            .expect("sequence");
        assert_eq!(produced.load(Ordering::SeqCst), 0);

        let items: Vec<Message> = sequence.map(|r| r.expect("value")).collect().await;
        assert_eq!(items, [json!("a"), json!("b"), json!("c")]);
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unknown_service_is_dropped() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(
            encode("missing.v1.Service", "Say", StreamingKind::Unary),
            |request, _ctx| ResultShape::value(request),
        );
        registrations.add(encode(ECHO, "Shout", StreamingKind::Unary), |request, _ctx| {
            ResultShape::value(request)
        });

        let table = build(&registrations, &registry()).expect("build");
        assert!(table.is_empty());
        assert!(table.service("missing.v1.Service").is_none());
    }

    #[test]
    fn client_streaming_pattern_is_fatal() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(encode(ECHO, "Say", StreamingKind::ClientStreaming), |request, _ctx| {
            ResultShape::value(request)
        });

        let err = build(&registrations, &registry()).err().expect("fatal");
        assert_eq!(err.kind, ErrorKind::InvalidStreamingKind);
    }

    #[test]
    fn malformed_pattern_is_fatal() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add("echo.v1.EchoService/Say", |request, _ctx| {
            ResultShape::value(request)
        });

        let err = build(&registrations, &registry()).err().expect("fatal");
        assert_eq!(err.kind, ErrorKind::MalformedPattern);
    }

    #[test]
    fn pattern_kind_wins_over_descriptor_kind() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(
            encode(ECHO, "Say", StreamingKind::ServerStreaming),
            |request, _ctx| ResultShape::value(request),
        );

        let table = build(&registrations, &registry()).expect("build");
        assert_eq!(
            table.get(ECHO, "Say").map(MethodHandler::kind),
            Some(StreamingKind::ServerStreaming)
        );
    }

    #[test]
    fn re_adding_a_pattern_replaces_the_handler() {
        let key = encode(ECHO, "Say", StreamingKind::Unary);
        let mut registrations = HandlerRegistrations::new();
        registrations.add(key.as_str(), |request, _ctx| ResultShape::value(request));
        registrations.add(key.as_str(), |_request, _ctx| ResultShape::value(json!(null)));
        assert_eq!(registrations.len(), 1);
    }

    #[test]
    fn rebuild_produces_independent_tables() {
        let mut registrations = HandlerRegistrations::new();
        registrations.add(encode(ECHO, "Say", StreamingKind::Unary), |request, _ctx| {
            ResultShape::value(request)
        });
        let registry = registry();

        let first = build(&registrations, &registry).expect("first");
        registrations.add(
            encode(ECHO, "SayMany", StreamingKind::ServerStreaming),
            |request, _ctx| ResultShape::value(request),
        );
        let second = build(&registrations, &registry).expect("second");

        assert_eq!(first.service(ECHO).map(HashMap::len), Some(1));
        assert_eq!(second.service(ECHO).map(HashMap::len), Some(2));
    }
}
