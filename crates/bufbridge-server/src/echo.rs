// ABOUTME: Echo service descriptor and handlers used by the demo server and its tests
// ABOUTME: Say answers once, SayMany streams numbered repetitions from an async producer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::Duration;

use bufbridge::{
    BridgeError, BridgeServer, CallContext, Message, MetadataRegistry, MethodDescriptor,
    MethodPattern, PushSource, ResultShape, ServerConfig, ServiceDescriptor, StreamingKind,
};
use serde_json::json;
use tracing::debug;

/// Fully qualified service name
pub const SERVICE: &str = "echo.v1.EchoService";

/// Repetitions streamed by `SayMany` when the request does not say
const DEFAULT_COUNT: u64 = 3;

/// Upper bound on `SayMany` repetitions
const MAX_COUNT: u64 = 1000;

/// Descriptor of the echo service
pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(SERVICE)
        .with_method(MethodDescriptor::unary(
            "Say",
            "echo.v1.SayRequest",
            "echo.v1.SayResponse",
        ))
        .with_method(MethodDescriptor::server_streaming(
            "SayMany",
            "echo.v1.SayManyRequest",
            "echo.v1.SayResponse",
        ))
}

/// Registry containing only the echo service
pub fn registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry.register(descriptor());
    registry
}

fn sentence(request: &Message) -> Result<String, BridgeError> {
    request["sentence"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| BridgeError::invalid_argument("sentence must be a string"))
}

/// `Say`: `{"sentence": s}` answers `{"sentence": "you said: s"}`
pub fn say(request: Message, _ctx: CallContext) -> ResultShape<Message> {
    match sentence(&request) {
        Ok(sentence) => ResultShape::value(json!({ "sentence": format!("you said: {sentence}") })),
        Err(e) => ResultShape::deferred(async move { Err(e) }),
    }
}

/// `SayMany`: streams `count` numbered repetitions, `interval_ms` apart
pub fn say_many(request: Message, ctx: CallContext) -> ResultShape<Message> {
    let sentence = match sentence(&request) {
        Ok(sentence) => sentence,
        Err(e) => return ResultShape::deferred(async move { Err(e) }),
    };
    let count = request["count"].as_u64().unwrap_or(DEFAULT_COUNT);
    if count > MAX_COUNT {
        return ResultShape::deferred(async move {
            Err(BridgeError::invalid_argument(format!(
                "count must be at most {MAX_COUNT}"
            )))
        });
    }
    let interval = Duration::from_millis(request["interval_ms"].as_u64().unwrap_or(0));

    ResultShape::push(PushSource::from_task(move |emitter| async move {
        for index in 0..count {
            if index > 0 && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            let message = json!({ "sentence": format!("{sentence} #{index}"), "index": index });
            if !emitter.next(message) {
                debug!(method = %ctx.method, index, "Caller went away, stopping stream");
                return;
            }
        }
        emitter.complete();
    }))
}

/// Add the echo handlers to a bridge
pub fn install(server: &mut BridgeServer) {
    server
        .add_handler(MethodPattern::new(SERVICE, "Say", StreamingKind::Unary), say)
        .add_handler(
            MethodPattern::new(SERVICE, "SayMany", StreamingKind::ServerStreaming),
            say_many,
        );
}

/// Bridge serving the echo service with `config`
pub fn server(config: ServerConfig) -> BridgeServer {
    let mut server = BridgeServer::new(Arc::new(registry()), config);
    install(&mut server);
    server
}
