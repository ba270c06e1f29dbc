use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

/// Canonical photo identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for PhotoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Face descriptor: a fixed-length embedding of one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// An empty descriptor is a placeholder the ingestion pipeline has not filled yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Callers are expected to compare equal-length descriptors; extra
    /// dimensions on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Monetary amount in minor units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub u64);

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl std::iter::Sum for Price {
    fn sum<I: Iterator<Item = Price>>(iter: I) -> Self {
        Price(iter.map(|p| p.0).sum())
    }
}

/// What an attendee can buy for a single photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseTier {
    Social,
    Print,
    Original,
    RemixCredit,
}

impl PurchaseTier {
    pub const ALL: [PurchaseTier; 4] = [
        PurchaseTier::Social,
        PurchaseTier::Print,
        PurchaseTier::Original,
        PurchaseTier::RemixCredit,
    ];

    /// Human-readable label shown on cart lines.
    pub fn label(self) -> &'static str {
        match self {
            PurchaseTier::Social => "Social Download",
            PurchaseTier::Print => "Print",
            PurchaseTier::Original => "Original",
            PurchaseTier::RemixCredit => "AI Remix Credit",
        }
    }

    /// Parse the wire/CLI spelling (`social`, `print`, `original`, `remix_credit`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "social" => Some(PurchaseTier::Social),
            "print" => Some(PurchaseTier::Print),
            "original" => Some(PurchaseTier::Original),
            "remix_credit" | "remix" => Some(PurchaseTier::RemixCredit),
            _ => None,
        }
    }
}

/// Per-event price schedule, one amount per purchase tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub social: Price,
    pub print: Price,
    pub original: Price,
    pub remix_credit: Price,
}

impl Pricing {
    pub fn price(&self, tier: PurchaseTier) -> Price {
        match tier {
            PurchaseTier::Social => self.social,
            PurchaseTier::Print => self.print,
            PurchaseTier::Original => self.original,
            PurchaseTier::RemixCredit => self.remix_credit,
        }
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            social: Price(99),
            print: Price(999),
            original: Price(1999),
            remix_credit: Price(100),
        }
    }
}

/// An event whose photos make up one gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    /// Human-readable alternate identifier, unique across events.
    pub slug: Option<String>,
    pub date: NaiveDate,
    pub agency_id: String,
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    Active,
    Removed,
}

impl PhotoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoStatus::Active => "active",
            PhotoStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PhotoStatus::Active),
            "removed" => Some(PhotoStatus::Removed),
            _ => None,
        }
    }
}

/// A photo in an event's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    pub event_id: EventId,
    pub agency_id: String,
    pub original_url: String,
    /// Privacy-degraded rendering shown before purchase.
    pub display_url: String,
    /// `None` (or empty) until the external embedding pipeline has processed the photo.
    pub descriptor: Option<Descriptor>,
    pub status: PhotoStatus,
    pub created_at: DateTime<Utc>,
}

impl Photo {
    /// The descriptor if it has actually been computed.
    pub fn resolved_descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref().filter(|d| !d.is_empty())
    }
}

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}
