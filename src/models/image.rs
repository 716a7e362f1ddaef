use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Content-addressed identifier of an image buffer (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-computed digest, e.g. one read back from the database.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provenance {
    /// Supplied by a user.
    Original,
    /// Produced by this pipeline (composite, model output or fallback output).
    Derivative,
}

/// Immutable metadata about an image that has passed through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub content_hash: ContentHash,
    pub provenance: Provenance,
    /// Job that first recorded the image.
    pub job_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(content_hash: ContentHash, provenance: Provenance, job_id: Option<Uuid>) -> Self {
        Self {
            content_hash,
            provenance,
            job_id,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_derivative(&self) -> bool {
        self.provenance == Provenance::Derivative
    }
}

/// Panel tag of a job input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageSlot {
    Before,
    After,
}

/// The raw images supplied with a job. Empty buffers count as absent.
#[derive(Debug, Clone, Default)]
pub struct JobImages {
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

impl JobImages {
    pub fn new(before: Option<Vec<u8>>, after: Option<Vec<u8>>) -> Self {
        Self {
            before: before.filter(|b| !b.is_empty()),
            after: after.filter(|b| !b.is_empty()),
        }
    }

    pub fn both(before: Vec<u8>, after: Vec<u8>) -> Self {
        Self::new(Some(before), Some(after))
    }

    pub fn get(&self, slot: ImageSlot) -> Option<&[u8]> {
        match slot {
            ImageSlot::Before => self.before.as_deref(),
            ImageSlot::After => self.after.as_deref(),
        }
    }

    /// Supplied images in panel order (before first).
    pub fn present(&self) -> Vec<(ImageSlot, &[u8])> {
        [ImageSlot::Before, ImageSlot::After]
            .into_iter()
            .filter_map(|slot| self.get(slot).map(|bytes| (slot, bytes)))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.present().len()
    }
}
