// ABOUTME: Pattern codec encoding (service, method, streaming kind) triples as stable text keys
// ABOUTME: Keys are compact JSON objects so registrations can be matched without ambiguity
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;

use serde::Deserialize;
use serde_json::json;

use crate::registry::StreamingKind;
use crate::types::BridgeError;

/// Identity of one handler registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodPattern {
    /// Fully qualified service name
    pub service: String,
    /// Method name within the service
    pub rpc: String,
    /// Response cardinality the handler is written for
    pub streaming: StreamingKind,
}

impl MethodPattern {
    /// Build a pattern from its parts
    pub fn new(service: impl Into<String>, rpc: impl Into<String>, streaming: StreamingKind) -> Self {
        Self {
            service: service.into(),
            rpc: rpc.into(),
            streaming,
        }
    }

    /// Encode into the stable key form
    ///
    /// Object keys are emitted in sorted order and strings are JSON-escaped,
    /// so equal triples always yield byte-identical keys and distinct
    /// triples never collide.
    pub fn encode(&self) -> String {
        json!({
            "rpc": self.rpc,
            "service": self.service,
            "streaming": self.streaming.as_str(),
        })
        .to_string()
    }

    /// Decode a key produced by [`encode`](Self::encode)
    pub fn decode(key: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(key).map_err(|e| BridgeError::malformed_pattern(key, e))
    }
}

impl fmt::Display for MethodPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.service, self.rpc, self.streaming)
    }
}

/// Encode a triple into its key
pub fn encode(service: &str, rpc: &str, streaming: StreamingKind) -> String {
    MethodPattern::new(service, rpc, streaming).encode()
}

/// Decode a key back into its triple
pub fn decode(key: &str) -> Result<MethodPattern, BridgeError> {
    MethodPattern::decode(key)
}

/// A registration key, either already encoded or built from a structured pattern
///
/// Structured patterns are encoded on conversion; plain strings are taken
/// verbatim and only decoded when the handler table is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey(String);

impl PatternKey {
    /// The raw key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<MethodPattern> for PatternKey {
    fn from(pattern: MethodPattern) -> Self {
        Self(pattern.encode())
    }
}

impl From<&MethodPattern> for PatternKey {
    fn from(pattern: &MethodPattern) -> Self {
        Self(pattern.encode())
    }
}

impl From<String> for PatternKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for PatternKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn encode_is_stable_and_compact() {
        let key = encode("echo.v1.EchoService", "Say", StreamingKind::Unary);
        assert_eq!(
            key,
            r#"{"rpc":"Say","service":"echo.v1.EchoService","streaming":"unary"}"#
        );
        assert_eq!(
            key,
            MethodPattern::new("echo.v1.EchoService", "Say", StreamingKind::Unary).encode()
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let cases = [
            MethodPattern::new("echo.v1.EchoService", "Say", StreamingKind::Unary),
            MethodPattern::new("a.B", "C", StreamingKind::ServerStreaming),
            MethodPattern::new("quote\"d", "slash\\ed", StreamingKind::BidiStreaming),
            MethodPattern::new("", "", StreamingKind::ClientStreaming),
        ];
        for pattern in cases {
            assert_eq!(decode(&pattern.encode()).expect("decode"), pattern);
        }
    }

    #[test]
    fn separator_characters_do_not_collide() {
        let a = encode("a/b", "c", StreamingKind::Unary);
        let b = encode("a", "b/c", StreamingKind::Unary);
        assert_ne!(a, b);
    }

    #[test]
    fn decode_accepts_any_field_order() {
        let pattern =
            decode(r#"{"service":"s.S","streaming":"server_streaming","rpc":"M"}"#).expect("ok");
        assert_eq!(pattern.streaming, StreamingKind::ServerStreaming);
        assert_eq!(pattern.rpc, "M");
    }

    #[test]
    fn decode_rejects_malformed_keys() {
        for key in [
            "not json",
            r#"{"service":"s.S"}"#,
            r#"{"service":"s.S","rpc":"M","streaming":"rx_stream"}"#,
            r#"{"service":"s.S","rpc":"M","streaming":"unary","extra":1}"#,
        ] {
            let err = decode(key).expect_err(key);
            assert_eq!(err.kind, ErrorKind::MalformedPattern, "{key}");
        }
    }

    #[test]
    fn pattern_key_from_structured_pattern_is_encoded() {
        let pattern = MethodPattern::new("s.S", "M", StreamingKind::Unary);
        let key = PatternKey::from(&pattern);
        assert_eq!(key.as_str(), pattern.encode());
        assert_eq!(PatternKey::from("raw").as_str(), "raw");
    }
}
