//! Gateway line protocol: `/{barn_id}/{topic}/={payload}`.
//!
//! Also owns the MQTT binding, which mirrors the frame layout minus the
//! payload segment: topic `/{barn_id}/{topic}`, payload carried raw.

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

// ---------------------------------------------------------------------------
// Message model
// ---------------------------------------------------------------------------

/// Barn addressing. `-1` on the wire means "every barn".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarnId {
    Broadcast,
    Barn(u32),
}

impl FromStr for BarnId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "-1" {
            return Ok(BarnId::Broadcast);
        }
        // Digits only: `u32::from_str` would also take "+3".
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }
        s.parse().map(BarnId::Barn).map_err(|_| ())
    }
}

impl fmt::Display for BarnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarnId::Broadcast => write!(f, "-1"),
            BarnId::Barn(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayMessage {
    pub barn_id: BarnId,
    pub topic: String,
    /// Opaque; sub-structure like `on?5` belongs to whoever consumes the topic.
    pub payload: String,
}

impl GatewayMessage {
    pub fn new(barn_id: BarnId, topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            barn_id,
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/={}", self.barn_id, self.topic, self.payload)
    }
}

// ---------------------------------------------------------------------------
// Frame parse / serialize
// ---------------------------------------------------------------------------

/// Parse one frame (delimiter already stripped).
pub fn parse(frame: &[u8]) -> BridgeResult<GatewayMessage> {
    let text = std::str::from_utf8(frame)
        .map_err(|_| BridgeError::malformed(String::from_utf8_lossy(frame), "not valid utf-8"))?;
    parse_line(text)
}

fn parse_line(line: &str) -> BridgeResult<GatewayMessage> {
    let rest = line
        .strip_prefix('/')
        .ok_or_else(|| BridgeError::malformed(line, "missing leading '/'"))?;

    let fields: Vec<&str> = rest.split('/').collect();
    let [barn, topic, keyed_payload] = fields[..] else {
        return Err(BridgeError::malformed(line, "expected 3 '/'-separated fields"));
    };

    let barn_id: BarnId = barn
        .parse()
        .map_err(|_| BridgeError::malformed(line, "barn id is not an integer or -1"))?;
    if topic.is_empty() {
        return Err(BridgeError::malformed(line, "empty topic"));
    }
    let (_, payload) = keyed_payload
        .split_once('=')
        .ok_or_else(|| BridgeError::malformed(line, "payload field has no '='"))?;

    Ok(GatewayMessage::new(barn_id, topic, payload))
}

/// Legacy multi-line input: one result per `/`-line. Blank lines and console
/// noise are skipped, and a bad line never stops the rest of the batch.
pub fn parse_batch(text: &str) -> Vec<BridgeResult<GatewayMessage>> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| line.starts_with('/'))
        .map(parse_line)
        .collect()
}

/// Frame text for `msg`, without the trailing newline.
pub fn serialize(msg: &GatewayMessage) -> String {
    msg.to_string()
}

/// A topic or payload that can sit inside one frame without changing how
/// the frame splits.
fn is_wire_safe(field: &str) -> bool {
    !field.contains(|c| matches!(c, '\n' | '\r' | '/'))
}

/// Newline-terminated frame for the gateway. Refuses messages whose fields
/// would turn into extra frames or extra fields on the wire.
pub fn encode_frame(msg: &GatewayMessage) -> BridgeResult<String> {
    if msg.topic.is_empty() {
        return Err(BridgeError::malformed(serialize(msg), "empty topic"));
    }
    if !is_wire_safe(&msg.topic) || !is_wire_safe(&msg.payload) {
        return Err(BridgeError::malformed(
            serialize(msg),
            "line break or '/' inside a field",
        ));
    }
    let mut frame = serialize(msg);
    frame.push('\n');
    Ok(frame)
}

// ---------------------------------------------------------------------------
// MQTT binding
// ---------------------------------------------------------------------------

pub fn to_mqtt(msg: &GatewayMessage) -> (String, Vec<u8>) {
    (
        format!("/{}/{}", msg.barn_id, msg.topic),
        msg.payload.clone().into_bytes(),
    )
}

/// `None` for anything that is not `/{barn_id}/{topic}`; the bus carries
/// plenty of unrelated traffic. Payloads that would not fit in a single
/// frame are refused too.
pub fn from_mqtt(topic: &str, payload: &[u8]) -> Option<GatewayMessage> {
    let (barn, topic) = topic.strip_prefix('/')?.split_once('/')?;
    if topic.is_empty() || !is_wire_safe(topic) {
        return None;
    }
    let barn_id = barn.parse().ok()?;
    let payload = String::from_utf8_lossy(payload);
    if !is_wire_safe(&payload) {
        return None;
    }
    Some(GatewayMessage::new(barn_id, topic, payload))
}

// ===========================================================================
// Tests
// ===========================================================================
