//! The alert envelope and its wire format
//!
//! An [`AlertEnvelope`] is created once by the originating device and never
//! mutated afterwards. Each hop derives a *relay copy* from it with
//! [`AlertEnvelope::as_relay_copy`]; the copy keeps the `message_id` and
//! bumps the hop counter, and the original stays usable.
//!
//! ## Wire format
//!
//! A flat JSON object with fixed camelCase field names. Parsing is lenient:
//! missing fields default, numbers given as strings are accepted, and a
//! legacy payload without `messageId`/`originalSender` gets deterministic
//! replacements so that re-parsing the same text yields the same ids.

use chrono::{SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EnvelopeError, EnvelopeResult};
use crate::traits::Coordinates;

/// Maximum number of peer-to-peer hops before an envelope is dropped
pub const MAX_HOPS: u32 = 5;

/// Default workflow status of a fresh alert
pub const DEFAULT_STATUS: &str = "Pending";

/// Default dashboard priority of a fresh alert
pub const DEFAULT_PRIORITY: &str = "Medium";

const UNKNOWN_SENDER: &str = "Unknown";

/// One emergency alert with relay metadata
///
/// Fields are private: an envelope is immutable after creation. Build new
/// alerts with [`AlertEnvelope::builder`] and derive per-hop copies with
/// [`AlertEnvelope::as_relay_copy`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEnvelope {
    name: String,
    age: Option<u32>,
    phone: Option<String>,
    blood_group: Option<String>,
    phone_battery: Option<u8>,
    latitude: f64,
    longitude: f64,
    message: Option<String>,
    current_medical_issue: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    notes: Option<String>,
    timestamp: Option<String>,
    solved_timestamp: Option<String>,
    is_relay: bool,
    relay_count: u32,
    original_sender: String,
    message_id: String,
}

impl AlertEnvelope {
    /// Start building a new alert for the given sender name
    pub fn builder(name: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder::new(name)
    }

    /// Derive the copy that travels on the next hop
    ///
    /// Same `message_id` and `original_sender`, `is_relay = true`,
    /// `relay_count + 1`, and a fresh per-hop timestamp.
    pub fn as_relay_copy(&self) -> Self {
        Self {
            is_relay: true,
            relay_count: self.relay_count.saturating_add(1),
            timestamp: Some(now_rfc3339()),
            ..self.clone()
        }
    }

    /// Copy of this envelope carrying the given coordinates
    pub fn with_location(&self, coords: Coordinates) -> Self {
        Self {
            latitude: coords.latitude,
            longitude: coords.longitude,
            ..self.clone()
        }
    }

    /// Whether the envelope carries a position (0,0 means "unknown")
    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    /// Whether the hop counter is at or above `max_hops`
    pub fn hop_limit_reached(&self, max_hops: u32) -> bool {
        self.relay_count >= max_hops
    }

    /// Globally unique id, stable across every hop
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Stable identity of the device that created the alert
    pub fn original_sender(&self) -> &str {
        &self.original_sender
    }

    /// Number of peer-to-peer retransmissions since origin
    pub fn relay_count(&self) -> u32 {
        self.relay_count
    }

    /// Whether this instance was produced by a relay hop
    pub fn is_relay(&self) -> bool {
        self.is_relay
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn age(&self) -> Option<u32> {
        self.age
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn blood_group(&self) -> Option<&str> {
        self.blood_group.as_deref()
    }

    pub fn phone_battery(&self) -> Option<u8> {
        self.phone_battery
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn current_medical_issue(&self) -> Option<&str> {
        self.current_medical_issue.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn priority(&self) -> Option<&str> {
        self.priority.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// RFC 3339 time of this hop (creation time on the origin device)
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    pub fn solved_timestamp(&self) -> Option<&str> {
        self.solved_timestamp.as_deref()
    }

    /// Encode as the flat JSON wire payload
    pub fn to_json(&self) -> EnvelopeResult<String> {
        serde_json::to_string(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Encode as UTF-8 wire bytes
    pub fn to_bytes(&self) -> EnvelopeResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Parse a wire payload, recovering legacy and partially-typed input
    pub fn from_json(json: &str) -> EnvelopeResult<Self> {
        let value: Value = serde_json::from_str(json.trim())?;
        Self::from_value(value)
    }

    /// Parse wire bytes (UTF-8, possibly with trailing garbage trimmed)
    pub fn from_bytes(bytes: &[u8]) -> EnvelopeResult<Self> {
        let text = String::from_utf8_lossy(bytes);
        Self::from_json(text.trim_end_matches('\0'))
    }

    /// Build an envelope from an already-parsed JSON value
    pub fn from_value(value: Value) -> EnvelopeResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_wire_map(&map)),
            other => Err(EnvelopeError::Malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn from_wire_map(map: &Map<String, Value>) -> Self {
        let name = text(map, "name")
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        let phone = text(map, "phone");
        let latitude = float(map, "latitude").unwrap_or(0.0);
        let longitude = float(map, "longitude").unwrap_or(0.0);
        let message = text(map, "message");
        let timestamp = text(map, "timestamp");

        let message_id = text(map, "messageId")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| {
                let hash = match &timestamp {
                    Some(ts) => legacy_hash(ts),
                    None => legacy_hash(&format!(
                        "{}|{}|{}|{}|{}",
                        name,
                        phone.as_deref().unwrap_or_default(),
                        latitude,
                        longitude,
                        message.as_deref().unwrap_or_default()
                    )),
                };
                format!("EMG_{}_{}", name, hash)
            });

        let original_sender = text(map, "originalSender")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| match &timestamp {
                Some(ts) => format!("{}_{}", name, ts.chars().take(19).collect::<String>()),
                None => format!("{}_unknown", name),
            });

        Self {
            age: integer(map, "age").map(|a| a.clamp(0, u32::MAX as i64) as u32),
            blood_group: text(map, "bloodGroup"),
            phone_battery: integer(map, "phoneBattery").map(|b| b.clamp(0, 100) as u8),
            current_medical_issue: text(map, "currentMedicalIssue"),
            status: text(map, "status"),
            priority: text(map, "priority"),
            notes: text(map, "notes"),
            solved_timestamp: text(map, "solvedTimestamp"),
            is_relay: boolean(map, "isRelay").unwrap_or(false),
            relay_count: integer(map, "relayCount")
                .map(|c| c.clamp(0, u32::MAX as i64) as u32)
                .unwrap_or(0),
            name,
            phone,
            latitude,
            longitude,
            message,
            timestamp,
            original_sender,
            message_id,
        }
    }
}

impl<'de> Deserialize<'de> for AlertEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl std::fmt::Display for AlertEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} (hop {})",
            self.message_id, self.original_sender, self.relay_count
        )
    }
}

/// Builder for a fresh alert on the originating device
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    name: String,
    age: Option<u32>,
    phone: Option<String>,
    blood_group: Option<String>,
    phone_battery: Option<u8>,
    location: Option<Coordinates>,
    message: Option<String>,
    current_medical_issue: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    notes: Option<String>,
    original_sender: Option<String>,
    message_id: Option<String>,
}

impl EnvelopeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: None,
            phone: None,
            blood_group: None,
            phone_battery: None,
            location: None,
            message: None,
            current_medical_issue: None,
            status: None,
            priority: None,
            notes: None,
            original_sender: None,
            message_id: None,
        }
    }

    pub fn age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn blood_group(mut self, blood_group: impl Into<String>) -> Self {
        self.blood_group = Some(blood_group.into());
        self
    }

    /// Battery level in percent, clamped to 100
    pub fn phone_battery(mut self, level: u8) -> Self {
        self.phone_battery = Some(level.min(100));
        self
    }

    pub fn location(mut self, coords: Coordinates) -> Self {
        self.location = Some(coords);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn current_medical_issue(mut self, issue: impl Into<String>) -> Self {
        self.current_medical_issue = Some(issue.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Override the originating-device identity
    pub fn original_sender(mut self, sender: impl Into<String>) -> Self {
        self.original_sender = Some(sender.into());
        self
    }

    /// Use a caller-chosen message id instead of a generated one
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Finish the envelope without validating the profile fields
    pub fn build(self) -> AlertEnvelope {
        let now = Utc::now();
        let message_id = self
            .message_id
            .unwrap_or_else(|| format!("EMG_{}", Uuid::new_v4().simple()));
        let original_sender = self
            .original_sender
            .unwrap_or_else(|| format!("EMG_{}_{}", now.timestamp_millis(), self.name));
        let coords = self.location.unwrap_or_default();

        AlertEnvelope {
            name: self.name,
            age: self.age,
            phone: self.phone,
            blood_group: self.blood_group,
            phone_battery: self.phone_battery,
            latitude: coords.latitude,
            longitude: coords.longitude,
            message: self.message,
            current_medical_issue: self.current_medical_issue,
            status: Some(self.status.unwrap_or_else(|| DEFAULT_STATUS.to_string())),
            priority: Some(self.priority.unwrap_or_else(|| DEFAULT_PRIORITY.to_string())),
            notes: self.notes,
            timestamp: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            solved_timestamp: None,
            is_relay: false,
            relay_count: 0,
            original_sender,
            message_id,
        }
    }

    /// Finish the envelope, requiring a sender name and an emergency contact
    pub fn build_checked(self) -> EnvelopeResult<AlertEnvelope> {
        if self.name.trim().is_empty() {
            return Err(EnvelopeError::MissingField("name"));
        }
        if self.phone.as_deref().is_none_or(|p| p.trim().is_empty()) {
            return Err(EnvelopeError::MissingField("phone"));
        }
        Ok(self.build())
    }
}

/// 32-bit polynomial string hash used by legacy senders to derive ids
///
/// `h = h * 31 + unit` over UTF-16 code units with wrapping arithmetic.
pub fn legacy_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn float(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

fn integer(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn boolean(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AlertEnvelope {
        AlertEnvelope::builder("Alice")
            .age(34)
            .phone("+15550100")
            .blood_group("O+")
            .phone_battery(57)
            .location(Coordinates::new(12.97, 77.59))
            .message("Chest pain")
            .message_id("EMG_1")
            .build()
    }

    #[test]
    fn test_builder_defaults() {
        let env = AlertEnvelope::builder("Bob").build();
        assert!(env.message_id().starts_with("EMG_"));
        assert!(env.original_sender().ends_with("_Bob"));
        assert_eq!(env.relay_count(), 0);
        assert!(!env.is_relay());
        assert_eq!(env.status(), Some(DEFAULT_STATUS));
        assert_eq!(env.priority(), Some(DEFAULT_PRIORITY));
        assert!(env.timestamp().is_some());
        assert!(!env.has_location());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = AlertEnvelope::builder("Bob").build();
        let b = AlertEnvelope::builder("Bob").build();
        assert_ne!(a.message_id(), b.message_id());
    }

    #[test]
    fn test_build_checked_requires_name_and_phone() {
        assert!(matches!(
            AlertEnvelope::builder("  ").phone("1").build_checked(),
            Err(EnvelopeError::MissingField("name"))
        ));
        assert!(matches!(
            AlertEnvelope::builder("Eve").build_checked(),
            Err(EnvelopeError::MissingField("phone"))
        ));
        assert!(AlertEnvelope::builder("Eve").phone("1").build_checked().is_ok());
    }

    #[test]
    fn test_relay_copy_preserves_identity() {
        let original = sample();
        let snapshot = original.clone();
        let copy = original.as_relay_copy();

        assert_eq!(copy.message_id(), original.message_id());
        assert_eq!(copy.original_sender(), original.original_sender());
        assert_eq!(copy.relay_count(), original.relay_count() + 1);
        assert!(copy.is_relay());
        assert_eq!(original, snapshot);

        let second = copy.as_relay_copy();
        assert_eq!(second.relay_count(), 2);
        assert_eq!(second.message_id(), "EMG_1");
    }

    #[test]
    fn test_hop_limit() {
        let mut env = sample();
        for _ in 0..MAX_HOPS - 1 {
            env = env.as_relay_copy();
        }
        assert!(!env.hop_limit_reached(MAX_HOPS));
        assert!(env.as_relay_copy().hop_limit_reached(MAX_HOPS));
    }

    #[test]
    fn test_wire_field_names() {
        let json = sample().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let map = value.as_object().unwrap();

        let expected = [
            "name",
            "age",
            "phone",
            "bloodGroup",
            "phoneBattery",
            "latitude",
            "longitude",
            "message",
            "currentMedicalIssue",
            "status",
            "priority",
            "notes",
            "timestamp",
            "solvedTimestamp",
            "isRelay",
            "relayCount",
            "originalSender",
            "messageId",
        ];
        assert_eq!(map.len(), expected.len());
        for key in expected {
            assert!(map.contains_key(key), "missing wire field {key}");
        }
        assert_eq!(map["messageId"], "EMG_1");
        assert_eq!(map["notes"], Value::Null);
    }

    #[test]
    fn test_json_parse_matches_original() {
        let env = sample();
        let parsed = AlertEnvelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_legacy_payload_recovery_is_deterministic() {
        let legacy = r#"{"name":"Ravi","phone":"99","latitude":1.5,"longitude":2.5,
            "timestamp":"2024-03-01T10:15:30.123Z","relayCount":1}"#;

        let a = AlertEnvelope::from_json(legacy).unwrap();
        let b = AlertEnvelope::from_json(legacy).unwrap();

        assert_eq!(a.message_id(), b.message_id());
        assert_eq!(
            a.message_id(),
            format!("EMG_Ravi_{}", legacy_hash("2024-03-01T10:15:30.123Z"))
        );
        assert_eq!(a.original_sender(), "Ravi_2024-03-01T10:15:30");
        assert_eq!(a.relay_count(), 1);
    }

    #[test]
    fn test_legacy_payload_without_timestamp() {
        let legacy = r#"{"name":"Ravi","message":"help"}"#;
        let a = AlertEnvelope::from_json(legacy).unwrap();
        let b = AlertEnvelope::from_json(legacy).unwrap();
        assert_eq!(a.message_id(), b.message_id());
        assert!(a.message_id().starts_with("EMG_Ravi_"));
        assert_eq!(a.original_sender(), "Ravi_unknown");
    }

    #[test]
    fn test_blank_ids_are_treated_as_missing() {
        let legacy = r#"{"name":"Ravi","timestamp":"t","messageId":"","originalSender":" "}"#;
        let env = AlertEnvelope::from_json(legacy).unwrap();
        assert_eq!(env.message_id(), format!("EMG_Ravi_{}", legacy_hash("t")));
        assert_eq!(env.original_sender(), "Ravi_t");
    }

    #[test]
    fn test_lenient_field_types() {
        let payload = r#"{"name":"Ann","age":"41","phoneBattery":250,"latitude":"3.25",
            "relayCount":"2","isRelay":"true","messageId":"X"}"#;
        let env = AlertEnvelope::from_json(payload).unwrap();
        assert_eq!(env.age(), Some(41));
        assert_eq!(env.phone_battery(), Some(100));
        assert_eq!(env.latitude(), 3.25);
        assert_eq!(env.relay_count(), 2);
        assert!(env.is_relay());
    }

    #[test]
    fn test_negative_relay_count_clamps_to_zero() {
        let env = AlertEnvelope::from_json(r#"{"name":"A","relayCount":-4,"messageId":"Y"}"#)
            .unwrap();
        assert_eq!(env.relay_count(), 0);
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(matches!(
            AlertEnvelope::from_json("[1,2,3]"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            AlertEnvelope::from_json("not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_from_bytes_tolerates_trailing_nul() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.extend_from_slice(&[0, 0]);
        let env = AlertEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(env.message_id(), "EMG_1");
    }

    #[test]
    fn test_legacy_hash_matches_known_values() {
        assert_eq!(legacy_hash(""), 0);
        assert_eq!(legacy_hash("a"), 97);
        assert_eq!(legacy_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn test_with_location() {
        let env = AlertEnvelope::builder("Z").build();
        let placed = env.with_location(Coordinates::new(-1.0, 2.0));
        assert!(placed.has_location());
        assert_eq!(placed.message_id(), env.message_id());
        assert!(!env.has_location());
    }
}
