//! Core types shared across Sigpath components

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Stable short code naming one logical broadcast service (e.g. `K4015`)
///
/// Always stored upper-cased so operator input and broadcaster names compare
/// equal regardless of how they were typed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_uppercase())
    }

    /// Leading `_`-separated token of a broadcaster stream or output name
    pub fn from_stream_name(name: &str) -> Option<Self> {
        name.split('_')
            .next()
            .filter(|token| !token.trim().is_empty())
            .map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for SourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}

/// VM status as reported by the control API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EncoderStatus {
    Running,
    Terminated,
    /// Status query failed or answered something unexpected
    #[default]
    Unknown,
}

impl EncoderStatus {
    /// Parse the plain-text body of a status query
    pub fn parse(body: &str) -> Self {
        match body.trim().trim_matches('"').to_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "TERMINATED" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl std::fmt::Display for EncoderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderStatus::Running => write!(f, "RUNNING"),
            EncoderStatus::Terminated => write!(f, "TERMINATED"),
            EncoderStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// An input or output as seen on one broadcaster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    /// Leading token of the stream/output name
    pub source_id: SourceId,

    /// For inputs: the stream's own id. For outputs: the input currently feeding it
    pub stream_id: String,

    /// Name shown to operators
    pub display_name: String,

    /// Broadcaster-assigned id used by mutation calls (outputs only)
    pub internal_id: String,

    /// Second token of an output name
    pub callsign: Option<String>,
}

impl StreamEndpoint {
    /// Build an input endpoint from a stream record
    pub fn input(record: &InputStreamRecord) -> Option<Self> {
        let source_id = SourceId::from_stream_name(&record.id)?;
        Some(Self {
            source_id,
            stream_id: record.id.clone(),
            display_name: record.id.clone(),
            internal_id: record.id.clone(),
            callsign: record.id.split('_').nth(1).map(str::to_string),
        })
    }

    /// Build an output endpoint from an output record
    pub fn output(record: &OutputRecord) -> Option<Self> {
        let source_id = SourceId::from_stream_name(&record.name)?;
        Some(Self {
            source_id,
            stream_id: record.stream_id.clone(),
            display_name: record.name.clone(),
            internal_id: record.id.clone(),
            callsign: record.name.split('_').nth(1).map(str::to_string),
        })
    }
}

/// Input stream as listed by `streams.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputStreamRecord {
    pub id: String,
}

/// Output as listed by `outputs.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stream_id: String,
}

/// Device entry of a directory service record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub role: String,
    pub name: String,
    #[serde(default)]
    pub public_ip: Option<String>,
}

/// One element of the directory's `devices?source_id=` answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service callsign
    pub service: String,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

/// Flags attached to a broadcaster redirect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RedirectFlags {
    /// Switch without dropping the output
    pub seamless: bool,
    /// Propagate the change to the remote receiver
    pub update_remote: bool,
}

impl RedirectFlags {
    pub const NONE: Self = Self {
        seamless: false,
        update_remote: false,
    };

    pub const SEAMLESS: Self = Self {
        seamless: true,
        update_remote: true,
    };
}
