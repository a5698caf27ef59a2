//! Key event records.
//!
//! Each ilk has its own struct whose field declaration order *is* the wire
//! order, so `serde_json::to_vec` yields exactly the bytes the SAID covers.
//! Unknown fields are rejected at the boundary.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Result, ValidationError};
use crate::said::{Saider, Version};
use crate::tholder::Sith;

/// Event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ilk {
    Icp,
    Dip,
    Rot,
    Drt,
    Ixn,
    Rpy,
}

impl Ilk {
    pub const fn as_str(self) -> &'static str {
        match self {
            Ilk::Icp => "icp",
            Ilk::Dip => "dip",
            Ilk::Rot => "rot",
            Ilk::Drt => "drt",
            Ilk::Ixn => "ixn",
            Ilk::Rpy => "rpy",
        }
    }

    /// Inceptions and rotations: the events allowed to change keys.
    pub const fn is_establishment(self) -> bool {
        matches!(self, Ilk::Icp | Ilk::Dip | Ilk::Rot | Ilk::Drt)
    }

    pub const fn is_delegated(self) -> bool {
        matches!(self, Ilk::Dip | Ilk::Drt)
    }
}

impl fmt::Display for Ilk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serde adapter for integers carried as lowercase hex strings (`s`, `bt`).
pub(crate) mod hex_num {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(n: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{n:x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
            return Err(de::Error::custom(format!("non-canonical hex number `{text}`")));
        }
        u64::from_str_radix(&text, 16)
            .map_err(|_| de::Error::custom(format!("invalid hex number `{text}`")))
    }
}

/// A seal anchoring one event of another identifier: `{i, s, d}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSeal {
    pub i: String,
    #[serde(with = "hex_num")]
    pub s: u64,
    pub d: String,
}

impl EventSeal {
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "i": self.i, "s": format!("{:x}", self.s), "d": self.d })
    }

    /// True when `anchor` is a JSON seal naming this event.
    pub fn matches(&self, anchor: &Value) -> bool {
        serde_json::from_value::<EventSeal>(anchor.clone()).is_ok_and(|seal| seal == *self)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// `icp` / `dip`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InceptionEvent {
    pub v: String,
    pub t: Ilk,
    pub d: String,
    pub i: String,
    #[serde(with = "hex_num")]
    pub s: u64,
    pub kt: Sith,
    pub k: Vec<String>,
    pub nt: Sith,
    pub n: Vec<String>,
    #[serde(with = "hex_num")]
    pub bt: u64,
    pub b: Vec<String>,
    pub c: Vec<String>,
    pub a: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub di: Option<String>,
}

/// `rot` / `drt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationEvent {
    pub v: String,
    pub t: Ilk,
    pub d: String,
    pub i: String,
    #[serde(with = "hex_num")]
    pub s: u64,
    pub p: String,
    pub kt: Sith,
    pub k: Vec<String>,
    pub nt: Sith,
    pub n: Vec<String>,
    #[serde(with = "hex_num")]
    pub bt: u64,
    pub br: Vec<String>,
    pub ba: Vec<String>,
    pub a: Vec<Value>,
}

/// `ixn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionEvent {
    pub v: String,
    pub t: Ilk,
    pub d: String,
    pub i: String,
    #[serde(with = "hex_num")]
    pub s: u64,
    pub p: String,
    pub a: Vec<Value>,
}

/// `rpy`: a signed reply routed to `r`. Not part of any key event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplyEvent {
    pub v: String,
    pub t: Ilk,
    pub d: String,
    pub dt: String,
    pub r: String,
    pub a: Value,
}

impl ReplyEvent {
    pub fn raw(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ---------------------------------------------------------------------------
// KeyEvent
// ---------------------------------------------------------------------------

/// One entry of a key event log.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyEvent {
    Inception(InceptionEvent),
    Rotation(RotationEvent),
    Interaction(InteractionEvent),
}

impl KeyEvent {
    /// Parse and validate serialized event bytes.
    ///
    /// Checks the version string (and that its size matches `raw`), the
    /// ilk, required fields, the absence of unknown fields and that `raw`
    /// is already in canonical field order. The SAID is not checked here;
    /// see [`KeyEvent::verify_said`].
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ValidationError::MalformedEvent(e.to_string()))?;
        let event = Self::from_value(value)?;
        let version = Version::parse(event.version())?;
        if version.size != raw.len() {
            return Err(ValidationError::InvalidVersion(format!(
                "declared size {} but event is {} bytes",
                version.size,
                raw.len()
            ))
            .into());
        }
        if event.raw()? != raw {
            return Err(ValidationError::MalformedEvent(
                "event bytes are not in canonical field order".into(),
            )
            .into());
        }
        Ok(event)
    }

    /// Dispatch a JSON object on its `t` field.
    pub fn from_value(value: Value) -> Result<Self> {
        let ilk = value
            .get("t")
            .ok_or_else(|| ValidationError::MissingField("t".into()))?;
        let ilk: Ilk = serde_json::from_value(ilk.clone())
            .map_err(|_| ValidationError::MalformedEvent(format!("unknown ilk {ilk}")))?;
        let malformed = |e: serde_json::Error| ValidationError::MalformedEvent(e.to_string());

        let event = match ilk {
            Ilk::Icp | Ilk::Dip => {
                let icp: InceptionEvent = serde_json::from_value(value).map_err(malformed)?;
                if (ilk == Ilk::Dip) != icp.di.is_some() {
                    return Err(ValidationError::MalformedEvent(
                        "`di` must be present exactly on delegated inceptions".into(),
                    )
                    .into());
                }
                KeyEvent::Inception(icp)
            }
            Ilk::Rot | Ilk::Drt => {
                KeyEvent::Rotation(serde_json::from_value(value).map_err(malformed)?)
            }
            Ilk::Ixn => KeyEvent::Interaction(serde_json::from_value(value).map_err(malformed)?),
            Ilk::Rpy => {
                return Err(ValidationError::MalformedEvent(
                    "replies are not key events".into(),
                )
                .into())
            }
        };
        Ok(event)
    }

    pub fn ilk(&self) -> Ilk {
        match self {
            KeyEvent::Inception(e) => e.t,
            KeyEvent::Rotation(e) => e.t,
            KeyEvent::Interaction(e) => e.t,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            KeyEvent::Inception(e) => &e.v,
            KeyEvent::Rotation(e) => &e.v,
            KeyEvent::Interaction(e) => &e.v,
        }
    }

    /// Identifier prefix.
    pub fn prefix(&self) -> &str {
        match self {
            KeyEvent::Inception(e) => &e.i,
            KeyEvent::Rotation(e) => &e.i,
            KeyEvent::Interaction(e) => &e.i,
        }
    }

    pub fn sn(&self) -> u64 {
        match self {
            KeyEvent::Inception(e) => e.s,
            KeyEvent::Rotation(e) => e.s,
            KeyEvent::Interaction(e) => e.s,
        }
    }

    /// The event's own SAID.
    pub fn said(&self) -> &str {
        match self {
            KeyEvent::Inception(e) => &e.d,
            KeyEvent::Rotation(e) => &e.d,
            KeyEvent::Interaction(e) => &e.d,
        }
    }

    /// Digest of the prior event; `None` for inceptions.
    pub fn prior(&self) -> Option<&str> {
        match self {
            KeyEvent::Inception(_) => None,
            KeyEvent::Rotation(e) => Some(&e.p),
            KeyEvent::Interaction(e) => Some(&e.p),
        }
    }

    pub fn anchors(&self) -> &[Value] {
        match self {
            KeyEvent::Inception(e) => &e.a,
            KeyEvent::Rotation(e) => &e.a,
            KeyEvent::Interaction(e) => &e.a,
        }
    }

    pub fn is_establishment(&self) -> bool {
        self.ilk().is_establishment()
    }

    /// Seal naming this event, for anchoring in another log.
    pub fn seal(&self) -> EventSeal {
        EventSeal {
            i: self.prefix().to_string(),
            s: self.sn(),
            d: self.said().to_string(),
        }
    }

    /// Canonical serialization: the bytes that were digested and are signed.
    pub fn raw(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Labels that share the event's SAID. A self-addressing inception
    /// names itself, so its prefix is blanked alongside `d`.
    pub(crate) fn said_labels(&self) -> &'static [&'static str] {
        match self {
            KeyEvent::Inception(e) if e.i == e.d => &["i", "d"],
            _ => &["d"],
        }
    }

    /// Recompute the SAID and compare with the stored one.
    pub fn verify_said(&self) -> Result<()> {
        Saider::verify_labels(&self.to_value()?, self.said_labels())
    }
}

impl Serialize for KeyEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            KeyEvent::Inception(e) => e.serialize(serializer),
            KeyEvent::Rotation(e) => e.serialize(serializer),
            KeyEvent::Interaction(e) => e.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for KeyEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        KeyEvent::from_value(value).map_err(serde::de::Error::custom)
    }
}
