//! Domain records: regions, watermarks, shipments, users and score requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

/// The sales territories that have a remote store endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionCode {
    Eu,
    Us,
}

impl RegionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionCode::Eu => "eu",
            RegionCode::Us => "us",
        }
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegionCode {
    type Err = ConfigError;

    /// Exact, case-sensitive match. There is no fallback region.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eu" => Ok(RegionCode::Eu),
            "us" => Ok(RegionCode::Us),
            other => Err(ConfigError::UnknownRegion(other.to_string())),
        }
    }
}

/// A row of the `regions` table. The name is free text in storage and only
/// validated when an endpoint is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub id: i64,
    pub name: String,
}

impl Region {
    pub fn code(&self) -> Result<RegionCode, ConfigError> {
        self.name.parse()
    }
}

/// Survey state of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpsStatus {
    /// Imported, not yet handled by the dispatcher.
    Pending,
    /// Survey email sent.
    Sent,
    /// User not surveyable; no email.
    Skipped,
}

impl NpsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NpsStatus::Pending => "pending",
            NpsStatus::Sent => "sent",
            NpsStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NpsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NpsStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NpsStatus::Pending),
            "sent" => Ok(NpsStatus::Sent),
            "skipped" => Ok(NpsStatus::Skipped),
            other => Err(format!("unknown nps status: {other}")),
        }
    }
}

/// Highest shipment number already imported for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Watermark {
    pub region_id: i64,
    pub last_import_no: i64,
}

/// A shipment as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shipment {
    pub id: i64,
    pub number: i64,
    pub shipment_date: NaiveDate,
    pub user_id: i64,
    pub region_id: i64,
    pub nps_status: NpsStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a shipment; new rows always start `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShipment {
    pub number: i64,
    pub shipment_date: NaiveDate,
    pub user_id: i64,
    pub region_id: i64,
}

/// A survey recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub region_id: Option<i64>,
    /// Name of the user's region, joined in on read.
    pub region_name: Option<String>,
    /// False once the user has opted out of surveys.
    pub surveyable: bool,
    pub last_nps_email_sent_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// A sent survey; `uuid` is embedded in the email links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreRequest {
    pub uuid: Uuid,
    pub user_id: i64,
    pub shipment_id: i64,
    pub created_at: DateTime<Utc>,
}
