// ABOUTME: Metadata registry mapping service names to service and method descriptors
// ABOUTME: Populated during bootstrap, then shared read-only with the resolver and listener
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether a method answers with one response or a sequence of responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingKind {
    /// Exactly one response per request
    Unary,
    /// A sequence of responses per request
    ServerStreaming,
    /// A sequence of requests, one response (not servable by the bridge)
    ClientStreaming,
    /// Sequences in both directions (not servable by the bridge)
    BidiStreaming,
}

impl StreamingKind {
    /// Wire name used in pattern keys and config
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ServerStreaming => "server_streaming",
            Self::ClientStreaming => "client_streaming",
            Self::BidiStreaming => "bidi_streaming",
        }
    }
}

impl fmt::Display for StreamingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unary" => Ok(Self::Unary),
            "server_streaming" => Ok(Self::ServerStreaming),
            "client_streaming" => Ok(Self::ClientStreaming),
            "bidi_streaming" => Ok(Self::BidiStreaming),
            other => Err(format!("unknown streaming kind: {other}")),
        }
    }
}

/// Signature of one RPC method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method name as it appears in the route
    pub name: String,
    /// Fully qualified input message type
    pub input_type: String,
    /// Fully qualified output message type
    pub output_type: String,
    /// Response cardinality
    pub kind: StreamingKind,
}

impl MethodDescriptor {
    /// Describe a method with an explicit streaming kind
    pub fn new(
        name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
        kind: StreamingKind,
    ) -> Self {
        Self {
            name: name.into(),
            input_type: input_type.into(),
            output_type: output_type.into(),
            kind,
        }
    }

    /// Describe a unary method
    pub fn unary(
        name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self::new(name, input_type, output_type, StreamingKind::Unary)
    }

    /// Describe a server-streaming method
    pub fn server_streaming(
        name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self::new(name, input_type, output_type, StreamingKind::ServerStreaming)
    }
}

/// A named service and its methods, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Create a service with no methods
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method, replacing any earlier method with the same name in place
    #[must_use]
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        if let Some(existing) = self.methods.iter_mut().find(|m| m.name == method.name) {
            *existing = method;
        } else {
            self.methods.push(method);
        }
        self
    }

    /// Fully qualified service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// All methods in declaration order
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

/// Table of service name to service descriptor
///
/// Populated during application bootstrap and then shared behind an `Arc`.
/// Mutation needs `&mut self`, so descriptors cannot change once the
/// registry has been handed to a running server.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    services: HashMap<String, ServiceDescriptor>,
}

impl MetadataRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a descriptor under `name`, overwriting any previous entry
    pub fn set(&mut self, name: impl Into<String>, descriptor: ServiceDescriptor) {
        self.services.insert(name.into(), descriptor);
    }

    /// Store a descriptor under its own service name
    pub fn register(&mut self, descriptor: ServiceDescriptor) {
        self.set(descriptor.name().to_owned(), descriptor);
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    /// Look up a method of a registered service
    pub fn method(&self, service: &str, method: &str) -> Option<&MethodDescriptor> {
        self.get(service).and_then(|s| s.method(method))
    }

    /// Names of all registered services, sorted
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service has been registered
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
