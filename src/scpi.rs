use std::fmt;

use crate::error::{AttenuatorError, Result};

pub const DEFAULT_CHANNEL_COUNT: u8 = 4;

/// A validated, 1-based attenuator channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel(u8);

impl Channel {
    pub fn new(channel: u8, channel_count: u8) -> Result<Self> {
        if (1..=channel_count).contains(&channel) {
            Ok(Channel(channel))
        } else {
            Err(AttenuatorError::InvalidChannel {
                channel,
                max: channel_count,
            })
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn all(channel_count: u8) -> impl Iterator<Item = Channel> {
        (1..=channel_count).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn set_attenuation(channel: Channel, db: f64) -> Result<String> {
    if !db.is_finite() || db < 0.0 {
        return Err(AttenuatorError::InvalidAttenuation(db));
    }
    Ok(format!(":CHAN:{}:SETATT:{}", channel, db))
}

pub fn query_attenuation(channel: Channel) -> String {
    format!(":CHAN:{}:ATT?", channel)
}

pub fn query_all() -> &'static str {
    ":ATT?"
}

/// Reply to a SETATT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetAttStatus {
    Failed,
    Success,
    /// Requested value exceeded the device range; it was set to its maximum.
    OutOfRange,
    Unknown(String),
}

impl SetAttStatus {
    pub fn from_response(raw: &str) -> Self {
        match raw.trim() {
            "0" => SetAttStatus::Failed,
            "1" => SetAttStatus::Success,
            "2" => SetAttStatus::OutOfRange,
            other => SetAttStatus::Unknown(other.to_string()),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            SetAttStatus::Failed => "0",
            SetAttStatus::Success => "1",
            SetAttStatus::OutOfRange => "2",
            SetAttStatus::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for SetAttStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetAttStatus::Failed => write!(f, "failed"),
            SetAttStatus::Success => write!(f, "success"),
            SetAttStatus::OutOfRange => write!(f, "out of range, set to maximum"),
            SetAttStatus::Unknown(raw) => write!(f, "unrecognized reply {:?}", raw),
        }
    }
}

pub fn parse_level(raw: &str) -> Option<f64> {
    raw.trim().parse().ok()
}

pub fn parse_levels(raw: &str) -> Vec<f64> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|token| token.parse().ok())
        .collect()
}
