//! Core domain model for the bill tracker: listing stubs, persisted bill records, sync state
//! and destination-side vector records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "billtrack-core";

/// Minimal record extracted from one listing entry, pending detail enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillStub {
    pub title: String,
    pub source_url: String,
    pub description: String,
    pub issued_date: String,
}

/// Fields only available on a bill's detail page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillDetail {
    pub status: String,
    pub pdf_url: Option<String>,
    pub signed_date: String,
}

/// Finalized record stored in the sink. The title is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRecord {
    #[serde(alias = "billTitle")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub signed_date: String,
    #[serde(default)]
    pub issued_date: String,
    #[serde(alias = "detailPageUrl", default)]
    pub source_url: String,
}

impl BillRecord {
    /// Merges listing-derived context with detail-page fields.
    pub fn from_parts(stub: BillStub, detail: BillDetail) -> Self {
        Self {
            title: stub.title,
            description: stub.description,
            status: detail.status,
            pdf_url: detail.pdf_url,
            signed_date: detail.signed_date,
            issued_date: stub.issued_date,
            source_url: stub.source_url,
        }
    }

    /// Extended text appended to title and description for embedding and vector metadata.
    pub fn extended_content(&self) -> String {
        let mut parts = Vec::new();
        if !self.status.is_empty() {
            parts.push(format!("Status: {}.", self.status));
        }
        if !self.signed_date.is_empty() {
            parts.push(format!("Signed: {}.", self.signed_date));
        }
        if let Some(pdf) = &self.pdf_url {
            parts.push(format!("PDF: {pdf}"));
        }
        parts.join(" ")
    }
}

/// Last-known source count, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(rename = "billCount", alias = "fileCount")]
    pub last_known_source_count: u64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

impl SyncState {
    pub fn new(last_known_source_count: u64, last_updated: DateTime<Utc>) -> Self {
        Self {
            last_known_source_count,
            last_updated,
        }
    }
}

/// Record count and layout of the destination index as seen by the last probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSnapshot {
    pub index_name: String,
    pub record_count: u64,
    pub dimension: Option<u32>,
    #[serde(default)]
    pub namespaces: BTreeMap<String, u64>,
    pub last_updated: DateTime<Utc>,
}

/// Result of probing a counter that may be unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountObservation {
    Observed(u64),
    Unavailable { reason: String },
}

impl CountObservation {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Observed(n) => Some(*n),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Observed(_))
    }
}

impl fmt::Display for CountObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observed(n) => write!(f, "{n}"),
            Self::Unavailable { reason } => write!(f, "unavailable ({reason})"),
        }
    }
}

/// Outcome of the sync decision for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDecision {
    pub should_crawl: bool,
    pub should_upload: bool,
    pub source_count: u64,
    pub destination_count: u64,
    pub forced: bool,
}

/// Metadata stored alongside each vector in the destination index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VectorMetadata {
    #[serde(alias = "billTitle")]
    pub title: String,
    pub description: String,
    #[serde(alias = "url")]
    pub source_url: String,
    pub issued_date: String,
    pub content: String,
}

/// One entry of the destination index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}
