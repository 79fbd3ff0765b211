// ABOUTME: Router builder mounting resolved service handlers as Connect-style HTTP routes
// ABOUTME: Serves unary calls as JSON and server-streaming calls as Server-Sent Events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::PathRejection;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::registry::ServiceDescriptor;
use crate::resolver::{MethodHandler, ServiceHandlers, StreamingHandler, UnaryHandler};
use crate::types::{BridgeError, CallContext, CanonicalSequence, ErrorKind, Message};

/// Route attachment callback run once per listener construction
pub type RouteFn = Arc<dyn Fn(&mut ServiceRouter) -> Result<(), BridgeError> + Send + Sync>;

/// Mounted handlers keyed by `(service, method)`
type RouteTable = BTreeMap<(String, String), MethodHandler>;

/// Collects service handlers and turns them into an axum [`Router`]
///
/// Every method is served at `POST /{service}/{method}`. Mounting the same
/// path twice keeps the last handler.
#[derive(Clone, Default)]
pub struct ServiceRouter {
    routes: RouteTable,
}

impl ServiceRouter {
    /// Create a router with no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount the handlers of one service
    ///
    /// Handlers for methods the descriptor does not declare are skipped, as
    /// are names that cannot form a single path segment.
    pub fn service(&mut self, descriptor: &ServiceDescriptor, handlers: ServiceHandlers) -> &mut Self {
        let service = descriptor.name();
        if !is_path_segment(service) {
            warn!(service = %service, "Service name is not a single path segment, not mounting");
            return self;
        }

        for (method, handler) in handlers {
            if descriptor.method(&method).is_none() {
                warn!(
                    service = %service,
                    method = %method,
                    "Method not declared by service descriptor, not mounting"
                );
                continue;
            }
            if !is_path_segment(&method) {
                warn!(
                    service = %service,
                    method = %method,
                    "Method name is not a single path segment, not mounting"
                );
                continue;
            }

            debug!(service = %service, method = %method, kind = %handler.kind(), "Mounting route");
            if self
                .routes
                .insert((service.to_owned(), method.clone()), handler)
                .is_some()
            {
                warn!(
                    service = %service,
                    method = %method,
                    "Route mounted twice, keeping the latest handler"
                );
            }
        }
        self
    }

    /// Paths mounted so far, in sorted order
    pub fn paths(&self) -> Vec<String> {
        self.routes
            .keys()
            .map(|(service, method)| format!("/{service}/{method}"))
            .collect()
    }

    /// Number of mounted methods
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no method is mounted
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Build the axum router
    ///
    /// All methods share one `/{service}/{method}` capture route and are
    /// looked up by name, so method names are never parsed as route syntax.
    /// Unknown paths answer `unimplemented` with HTTP 404.
    pub fn into_router(self) -> Router {
        let routes = Arc::new(self.routes);

        Router::new()
            .route(
                "/{service}/{method}",
                post(
                    move |names: Result<Path<(String, String)>, PathRejection>,
                          uri: Uri,
                          headers: HeaderMap,
                          body: Bytes| {
                        let routes = Arc::clone(&routes);
                        async move {
                            let Ok(Path((service, method))) = names else {
                                return unimplemented(uri).await;
                            };
                            dispatch(&routes, service, method, uri, headers, body).await
                        }
                    },
                ),
            )
            .fallback(unimplemented)
    }
}

/// Whether a name can be matched by one `{capture}` segment
fn is_path_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains('/')
}

async fn dispatch(
    routes: &RouteTable,
    service: String,
    method: String,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(handler) = routes.get(&(service.clone(), method.clone())) else {
        return unimplemented(uri).await;
    };

    let ctx = CallContext::new(service, method).with_headers(headers);
    match handler {
        MethodHandler::Unary(handler) => call_unary(Arc::clone(handler), ctx, body).await,
        MethodHandler::ServerStreaming(handler) => {
            call_server_streaming(Arc::clone(handler), ctx, body).await
        }
    }
}

// ============================================================================
// Call Handling
// ============================================================================

/// Decode a request body; an empty body is the empty message
fn decode_request(body: &Bytes) -> Result<Message, BridgeError> {
    if body.is_empty() {
        return Ok(Message::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::invalid_argument(format!("Invalid JSON request body: {e}")))
}

async fn call_unary(handler: UnaryHandler, ctx: CallContext, body: Bytes) -> Response {
    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let (service, method) = (ctx.service.clone(), ctx.method.clone());
    match handler(request, ctx).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            debug!(service = %service, method = %method, error = %e, "Unary call failed");
            error_response(&e)
        }
    }
}

async fn call_server_streaming(handler: StreamingHandler, ctx: CallContext, body: Bytes) -> Response {
    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };

    let (service, method) = (ctx.service.clone(), ctx.method.clone());
    match handler(request, ctx) {
        Ok(sequence) => sse_response(sequence),
        Err(e) => {
            debug!(service = %service, method = %method, error = %e, "Streaming call failed to start");
            error_response(&e)
        }
    }
}

/// Convert a response sequence into an SSE response
///
/// Emits one `data` event per message followed by exactly one terminal
/// event: `end` on completion or `error` carrying the error body.
pub fn sse_response(sequence: CanonicalSequence<Message>) -> Response {
    let events = futures::stream::unfold(Some(sequence), |state| async move {
        let mut sequence = state?;
        let event = match sequence.next().await {
            Some(Ok(message)) => {
                return Some((
                    Ok::<_, Infallible>(Event::default().data(message.to_string())),
                    Some(sequence),
                ));
            }
            Some(Err(e)) => Event::default().event("error").data(error_body(&e).to_string()),
            None => Event::default().event("end").data("{}"),
        };
        Some((Ok(event), None))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

async fn unimplemented(uri: Uri) -> Response {
    let body = json!({
        "code": "unimplemented",
        "message": format!("No handler for {}", uri.path()),
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Connect error code and HTTP status for an error kind
pub const fn connect_code(kind: ErrorKind) -> (&'static str, StatusCode) {
    match kind {
        ErrorKind::InvalidArgument => ("invalid_argument", StatusCode::BAD_REQUEST),
        ErrorKind::Handler => ("unknown", StatusCode::INTERNAL_SERVER_ERROR),
        ErrorKind::InvalidStreamingKind => ("unimplemented", StatusCode::NOT_IMPLEMENTED),
        _ => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn error_body(error: &BridgeError) -> serde_json::Value {
    let (code, _) = connect_code(error.kind);
    json!({ "code": code, "message": error.message })
}

fn error_response(error: &BridgeError) -> Response {
    let (_, status) = connect_code(error.kind);
    (status, Json(error_body(error))).into_response()
}
