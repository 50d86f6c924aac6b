// JSON-RPC 2.0 envelope handling: inbound parsing, upstream body decoding, error encoding

use bytes::Bytes;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;

use crate::core::errors::ProxyError;

/// Caller-supplied request id, kept as the exact JSON text it arrived as.
///
/// `None` stands for an absent or `null` id; both encode as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Option<Box<RawValue>>);

impl RequestId {
    pub fn null() -> Self {
        Self(None)
    }

    /// The id's JSON text
    pub fn as_raw(&self) -> &str {
        self.0.as_deref().map_or("null", RawValue::get)
    }
}

impl PartialEq for RequestId {
    fn eq(&self, other: &Self) -> bool {
        self.as_raw() == other.as_raw()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_raw())
    }
}

/// JSON-RPC 2.0 error structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 error envelope written back to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub error: JsonRpcError,
    pub id: RequestId,
}

impl JsonRpcErrorResponse {
    /// Build the envelope for a proxy-side failure, echoing the caller's id
    pub fn from_proxy_error(err: &ProxyError, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            error: JsonRpcError {
                code: err.jsonrpc_code(),
                message: err.user_message(),
                data: None,
            },
            id,
        }
    }
}

/// One inbound call in flight.
///
/// `body` holds the exact bytes the caller sent; they are forwarded upstream
/// untouched. `attempt` counts session renewals and never exceeds 1.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: String,
    pub params: Option<Value>,
    pub id: RequestId,
    pub attempt: u8,
    pub body: Bytes,
}

/// An inbound envelope that failed local validation
#[derive(Debug, Clone)]
pub struct RejectedRequest {
    /// Caller id when one could be recovered, `null` otherwise
    pub id: RequestId,
    pub error: ProxyError,
}

#[derive(Deserialize)]
struct IdMember {
    #[serde(default)]
    id: RequestId,
}

impl PendingRequest {
    /// Decode an inbound body.
    ///
    /// The only validation performed is the presence of a string `method`.
    /// A missing `id` is treated as `null`.
    pub fn parse(body: Bytes) -> Result<Self, RejectedRequest> {
        let value: Value = serde_json::from_slice(&body).map_err(|e| RejectedRequest {
            id: RequestId::null(),
            error: ProxyError::InvalidRequest(format!("body is not valid JSON ({})", e)),
        })?;

        let Value::Object(envelope) = value else {
            return Err(RejectedRequest {
                id: RequestId::null(),
                error: ProxyError::InvalidRequest("envelope must be a JSON object".to_string()),
            });
        };

        let id = serde_json::from_slice::<IdMember>(&body)
            .map(|member| member.id)
            .map_err(|e| RejectedRequest {
                id: RequestId::null(),
                error: ProxyError::InvalidRequest(format!("unreadable id ({})", e)),
            })?;

        let method = match envelope.get("method") {
            Some(Value::String(method)) => method.clone(),
            _ => {
                return Err(RejectedRequest {
                    id,
                    error: ProxyError::InvalidRequest("missing method".to_string()),
                })
            }
        };

        Ok(Self {
            method,
            params: envelope.get("params").cloned(),
            id,
            attempt: 0,
            body,
        })
    }
}

/// Upstream response body after transport decoding
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    /// No content (e.g. an acknowledged notification)
    Empty,
    /// The bytes of one JSON document, possibly cut out of an event stream
    Json(Bytes),
    /// A non-JSON success body, passed through untouched
    Raw(Bytes),
}

/// Decode an upstream body.
///
/// Streamable-HTTP servers may answer with a single `text/event-stream` event;
/// the JSON carried by its first `data:` line is the response. A non-JSON
/// body on an error status (an HTML error page from a load balancer, say) is
/// an invalid response.
pub fn decode_upstream_body(status: u16, body: &Bytes) -> Result<UpstreamBody, ProxyError> {
    let Ok(text) = std::str::from_utf8(body) else {
        return non_json(status, body);
    };

    if text.trim().is_empty() {
        return Ok(UpstreamBody::Empty);
    }

    if text.trim_start().starts_with("event:") {
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .ok_or_else(|| ProxyError::InvalidResponse("event stream without data field".to_string()))?;
        serde_json::from_str::<&RawValue>(data)
            .map_err(|e| ProxyError::InvalidResponse(format!("event data is not JSON: {}", e)))?;
        return Ok(UpstreamBody::Json(body.slice_ref(data.as_bytes())));
    }

    match serde_json::from_str::<&RawValue>(text) {
        Ok(_) => Ok(UpstreamBody::Json(body.clone())),
        Err(_) => non_json(status, body),
    }
}

fn non_json(status: u16, body: &Bytes) -> Result<UpstreamBody, ProxyError> {
    if status >= 400 {
        Err(ProxyError::InvalidResponse(format!(
            "HTTP {} with a non-JSON body",
            status
        )))
    } else {
        Ok(UpstreamBody::Raw(body.clone()))
    }
}

/// Top-level members of a JSON object, values kept as raw text in document order
struct RawMembers(Vec<(String, Box<RawValue>)>);

impl<'de> Deserialize<'de> for RawMembers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MembersVisitor;

        impl<'de> Visitor<'de> for MembersVisitor {
            type Value = RawMembers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawMembers, A::Error> {
                let mut members = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(member) = map.next_entry::<String, Box<RawValue>>()? {
                    members.push(member);
                }
                Ok(RawMembers(members))
            }
        }

        deserializer.deserialize_map(MembersVisitor)
    }
}

/// Response members re-emitted with the caller's id in place of the upstream one
struct WithId<'a> {
    members: &'a [(String, Box<RawValue>)],
    id: &'a RequestId,
}

impl Serialize for WithId<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let has_id = self.members.iter().any(|(key, _)| key == "id");
        let len = self.members.len() + usize::from(!has_id);
        let mut map = serializer.serialize_map(Some(len))?;
        for (key, value) in self.members {
            if key == "id" {
                map.serialize_entry(key, self.id)?;
            } else {
                map.serialize_entry(key, value)?;
            }
        }
        if !has_id {
            map.serialize_entry("id", self.id)?;
        }
        map.end()
    }
}

/// Put the caller's id back on a JSON-RPC response envelope.
///
/// Documents that are not response objects (`result` or `error` present), or
/// that already carry the caller's id verbatim, are returned untouched.
/// Otherwise only the `id` member changes; every other member keeps its
/// original text and position.
pub fn restore_id(document: Bytes, id: &RequestId) -> Bytes {
    let Ok(RawMembers(members)) = serde_json::from_slice::<RawMembers>(&document) else {
        return document;
    };

    if !members.iter().any(|(key, _)| key == "result" || key == "error") {
        return document;
    }

    let upstream_id = members.iter().find(|(key, _)| key == "id").map(|(_, v)| v.get());
    if upstream_id == Some(id.as_raw()) {
        return document;
    }

    match serde_json::to_vec(&WithId { members: &members, id }) {
        Ok(encoded) => Bytes::from(encoded),
        Err(_) => document,
    }
}
