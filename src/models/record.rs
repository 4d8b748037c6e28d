//! Extracted SMS record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Platform a message originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    WhatsApp,
    Instagram,
}

impl Platform {
    /// Every supported platform, in classification priority order.
    pub const ALL: [Platform; 3] = [Platform::Facebook, Platform::WhatsApp, Platform::Instagram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::WhatsApp => "whatsapp",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "whatsapp" => Ok(Platform::WhatsApp),
            "instagram" => Ok(Platform::Instagram),
            other => Err(AppError::validation(format!("unknown platform '{other}'"))),
        }
    }
}

/// One message extracted from the live table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    /// Short content+time digest, stable handle for clients
    pub id: String,

    pub platform: Platform,

    /// Two-letter code taken from the label cell
    pub country_code: String,

    /// Display name for `country_code` ("Unknown" if not in the table)
    pub country: String,

    /// Provider-assigned identifier, the dedup key
    pub sid: String,

    /// Digits found in the label cell, may be empty
    pub phone_number: String,

    pub message: String,

    /// Unparsed label cell text
    pub raw_text: String,

    /// Extraction time (the portal does not publish one)
    pub received_at: DateTime<Local>,
}

impl Record {
    /// Compute the short client-facing id for a message seen at `at`.
    pub fn digest(sid: &str, message: &str, at: &DateTime<Local>) -> String {
        let nanos = at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros());
        let mut hasher = Sha256::new();
        hasher.update(sid.as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(nanos.to_string().as_bytes());
        let mut id = hex::encode(hasher.finalize());
        id.truncate(8);
        id
    }

    /// Wall-clock time of extraction as `HH:MM:SS`.
    pub fn time_label(&self) -> String {
        self.received_at.format("%H:%M:%S").to_string()
    }
}
