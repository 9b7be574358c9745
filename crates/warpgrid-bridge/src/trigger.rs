//! Trigger envelopes: the payloads of the non-request entry points.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use warpgrid_host_api::HostValue;

use crate::envelope::Request;
use crate::error::{BridgeError, BridgeResult};
use crate::stream::HostStreamReader;

/// The four kinds of host invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Request,
    Scheduled,
    Queue,
    Email,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 4] = [
        TriggerKind::Request,
        TriggerKind::Scheduled,
        TriggerKind::Queue,
        TriggerKind::Email,
    ];

    /// The global callback the host invokes for this kind.
    pub fn callback_name(self) -> &'static str {
        match self {
            TriggerKind::Request => "handleRequest",
            TriggerKind::Scheduled => "runScheduler",
            TriggerKind::Queue => "handleQueueMessageBatch",
            TriggerKind::Email => "handleEmail",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.callback_name())
    }
}

/// Exactly one decoded invocation payload.
#[derive(Debug)]
pub enum Trigger {
    Request(Request),
    Scheduled(ScheduledEvent),
    Queue(MessageBatch),
    Email(EmailMessage),
}

impl Trigger {
    /// Decode the payload of a `kind` invocation.
    pub fn decode(kind: TriggerKind, payload: &HostValue) -> BridgeResult<Self> {
        Ok(match kind {
            TriggerKind::Request => Trigger::Request(Request::from_host(payload)?),
            TriggerKind::Scheduled => Trigger::Scheduled(ScheduledEvent::from_host(payload)?),
            TriggerKind::Queue => Trigger::Queue(MessageBatch::from_host(payload)?),
            TriggerKind::Email => Trigger::Email(EmailMessage::from_host(payload)?),
        })
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Request(_) => TriggerKind::Request,
            Trigger::Scheduled(_) => TriggerKind::Scheduled,
            Trigger::Queue(_) => TriggerKind::Queue,
            Trigger::Email(_) => TriggerKind::Email,
        }
    }
}

/// A cron tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub cron: String,
    /// Millisecond precision, as the host reports it.
    pub scheduled_time: SystemTime,
}

impl ScheduledEvent {
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let cron = string_field(value, "cron", "scheduled event")?;
        let scheduled_time = millis_field(value, "scheduledTime", "scheduled event")?;
        Ok(Self {
            cron,
            scheduled_time,
        })
    }
}

/// One message of a queue batch.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub timestamp: SystemTime,
    pub attempts: u32,
    pub body: HostValue,
}

impl QueueMessage {
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let id = string_field(value, "id", "queue message")?;
        let timestamp = millis_field(value, "timestamp", "queue message")?;
        let attempts = match value.get("attempts") {
            HostValue::Undefined => 1,
            HostValue::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX) => {
                *n as u32
            }
            other => {
                return Err(BridgeError::decode(format!(
                    "queue message attempts must be a non-negative integer, got {other:?}"
                )));
            }
        };
        Ok(Self {
            id,
            timestamp,
            attempts,
            body: value.get("body").clone(),
        })
    }

    /// The body as text; fails unless it is a string.
    pub fn text_body(&self) -> BridgeResult<&str> {
        self.body.as_str().ok_or_else(|| self.shape_error("a string"))
    }

    /// The body as bytes; fails unless it is a `Uint8Array`.
    pub fn bytes_body(&self) -> BridgeResult<&Bytes> {
        self.body.as_bytes().ok_or_else(|| self.shape_error("a Uint8Array"))
    }

    /// The body deserialized from its structured-clone JSON form.
    pub fn json_body<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        let json = self
            .body
            .to_json()
            .ok_or_else(|| self.shape_error("JSON-compatible"))?;
        serde_json::from_value(json).map_err(|e| {
            BridgeError::decode(format!("queue message {} body: {e}", self.id))
        })
    }

    fn shape_error(&self, expected: &str) -> BridgeError {
        BridgeError::decode(format!(
            "queue message {} body is {}, not {expected}",
            self.id,
            self.body.type_name()
        ))
    }
}

/// A batch of queue messages.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub queue: String,
    pub messages: Vec<QueueMessage>,
}

impl MessageBatch {
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let queue = string_field(value, "queue", "message batch")?;
        let messages = value
            .get("messages")
            .as_array()
            .ok_or_else(|| BridgeError::decode("message batch messages must be an array"))?
            .iter()
            .map(QueueMessage::from_host)
            .collect::<BridgeResult<Vec<_>>>()?;
        Ok(Self { queue, messages })
    }
}

/// An inbound email.
#[derive(Debug)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub raw_size: u64,
    /// The raw RFC 5322 message, streamed from the host.
    pub raw: HostStreamReader,
}

impl EmailMessage {
    pub fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let from = string_field(value, "from", "email message")?;
        let to = string_field(value, "to", "email message")?;
        let raw_size = match value.get("rawSize") {
            HostValue::Number(n) if n.fract() == 0.0 && *n >= 0.0 => *n as u64,
            HostValue::Undefined => 0,
            other => {
                return Err(BridgeError::decode(format!(
                    "email message rawSize must be a non-negative integer, got {other:?}"
                )));
            }
        };
        let raw = value
            .get("raw")
            .as_stream()
            .ok_or_else(|| BridgeError::decode("email message raw must be a ReadableStream"))?;
        Ok(Self {
            from,
            to,
            raw_size,
            raw: HostStreamReader::new(raw.clone()),
        })
    }
}

fn string_field(value: &HostValue, key: &str, what: &str) -> BridgeResult<String> {
    value
        .get(key)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            BridgeError::decode(format!(
                "{what} {key} must be a string, got {}",
                value.get(key).type_name()
            ))
        })
}

fn millis_field(value: &HostValue, key: &str, what: &str) -> BridgeResult<SystemTime> {
    match value.get(key) {
        HostValue::Number(ms) if ms.is_finite() && *ms >= 0.0 => {
            Ok(UNIX_EPOCH + Duration::from_millis(*ms as u64))
        }
        other => Err(BridgeError::decode(format!(
            "{what} {key} must be a millisecond timestamp, got {}",
            other.type_name()
        ))),
    }
}
