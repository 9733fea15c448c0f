//! Per-job image records

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// References to the images uploaded with a job (object storage keys)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSetRef {
    pub keys: Vec<String>,
}

impl ImageSetRef {
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Gradient perceptual hash of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceptualHash {
    /// Hash size (e.g., 8 for 8x8 = 64 bits)
    pub hash_size: u32,
    /// Hash bytes (base64-encoded for JSON serialization)
    #[serde(with = "base64_serde")]
    pub bytes: Vec<u8>,
}

impl PerceptualHash {
    /// Number of differing bits, or None when the hashes are not comparable
    #[must_use]
    pub fn hamming_distance(&self, other: &PerceptualHash) -> Option<u32> {
        if self.hash_size != other.hash_size || self.bytes.len() != other.bytes.len() {
            return None;
        }
        Some(
            self.bytes
                .iter()
                .zip(other.bytes.iter())
                .map(|(b1, b2)| (b1 ^ b2).count_ones())
                .sum(),
        )
    }
}

/// Basic quality metrics (all scores 0.0-1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageQuality {
    pub width: u32,
    pub height: u32,
    /// Laplacian variance scaled by 1/1000 and clamped
    pub sharpness: f32,
    /// Grey-level standard deviation / 255
    pub contrast: f32,
    /// Grey-level mean / 255
    pub brightness: f32,
    pub overall: f32,
}

/// Geo and label metadata from image analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAttributes {
    pub country: Option<String>,
    pub city: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Confidence in the geo attributes (0.0 when not analyzed)
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl ImageAttributes {
    /// One-line description used by the structure planner
    #[must_use]
    pub fn summary(&self) -> String {
        let mut text = self
            .description
            .clone()
            .unwrap_or_else(|| "no description".to_string());
        let place: Vec<&str> = [&self.location, &self.city, &self.country]
            .iter()
            .filter_map(|p| p.as_deref())
            .collect();
        if !place.is_empty() {
            text.push_str(&format!(" (location: {})", place.join(", ")));
        }
        text
    }
}

/// An uploaded image with everything the fusion phase needs to know about it.
///
/// Lives for one job only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: String,
    /// Object storage key the bytes were read from
    pub source_url: String,
    /// blake3 digest of the raw bytes (hex)
    pub content_digest: String,
    pub perceptual_hash: Option<PerceptualHash>,
    pub embedding: Option<Vec<f32>>,
    /// Set by the diversity pass
    #[serde(default)]
    pub cluster_id: Option<usize>,
    #[serde(default)]
    pub quality: Option<ImageQuality>,
    #[serde(default)]
    pub attributes: ImageAttributes,
}

impl ImageAsset {
    /// Asset with only identity fields; analysis fills the rest
    #[must_use]
    pub fn new(id: impl Into<String>, source_url: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            content_digest: digest.into(),
            perceptual_hash: None,
            embedding: None,
            cluster_id: None,
            quality: None,
            attributes: ImageAttributes::default(),
        }
    }
}

/// Helper module for base64 serialization of hash bytes
mod base64_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use base64::{engine::general_purpose, Engine};
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use base64::{engine::general_purpose, Engine};
        let s = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
