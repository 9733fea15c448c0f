//! Pattern retrieval keyed by a section's content shape

use crate::{LayoutError, Result};
use magazine_common::{LayoutPattern, LengthBucket, Section, SectionKind};
use magazine_storage::PatternIndex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Dimension of [`BucketSignature::query_vector`]
pub const QUERY_DIM: usize = 8;

/// Shape of a section as seen by the pattern index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketSignature {
    pub length_bucket: LengthBucket,
    pub image_count: usize,
    pub kind: SectionKind,
}

impl BucketSignature {
    #[must_use]
    pub fn of(section: &Section) -> Self {
        Self {
            length_bucket: LengthBucket::from_chars(section.char_len()),
            image_count: section.assigned_image_ids.len(),
            kind: section.kind,
        }
    }

    /// Signature a pattern was designed for; unknown kinds count as mixed
    #[must_use]
    pub fn of_pattern(pattern: &LayoutPattern) -> Self {
        Self {
            length_bucket: pattern.length_bucket,
            image_count: pattern.image_count,
            kind: pattern.section_kind.unwrap_or(SectionKind::Mixed),
        }
    }

    /// Deterministic query vector.
    ///
    /// Layout: length one-hot (3), image count scaled to 0..1 (capped at 4),
    /// single-image flag, kind one-hot (3).
    #[must_use]
    pub fn query_vector(&self) -> Vec<f32> {
        let mut v = vec![0.0f32; QUERY_DIM];
        v[self.length_bucket.ordinal()] = 1.0;
        v[3] = self.image_count.min(4) as f32 / 4.0;
        v[4] = if self.image_count == 1 { 1.0 } else { 0.0 };
        let kind = match self.kind {
            SectionKind::Interview => 5,
            SectionKind::Essay => 6,
            SectionKind::Mixed => 7,
        };
        v[kind] = 1.0;
        v
    }
}

/// Retrieves candidate patterns, memoised by signature.
///
/// Create one per job; the memo is never shared across jobs.
pub struct LayoutRetriever {
    index: Arc<dyn PatternIndex>,
    top_k: usize,
    memo: Mutex<HashMap<BucketSignature, Vec<LayoutPattern>>>,
}

impl LayoutRetriever {
    pub fn new(index: Arc<dyn PatternIndex>, top_k: usize) -> Self {
        Self {
            index,
            top_k: top_k.max(1),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Ranked candidates for `section`, at most `top_k`.
    ///
    /// Only successful lookups are memoised, so a failed query is retried for
    /// the next section with the same signature.
    ///
    /// # Errors
    /// Returns [`LayoutError::Retrieval`] when the pattern index fails.
    pub async fn retrieve(&self, section: &Section) -> Result<Vec<LayoutPattern>> {
        let signature = BucketSignature::of(section);
        if let Some(hit) = self.memo.lock().await.get(&signature) {
            debug!("Pattern memo hit for {:?}", signature);
            return Ok(hit.clone());
        }

        let mut patterns = self
            .index
            .query(&signature.query_vector(), self.top_k)
            .await
            .map_err(|e| LayoutError::Retrieval(e.to_string()))?;
        patterns.truncate(self.top_k);
        debug!("Retrieved {} patterns for {:?}", patterns.len(), signature);

        Ok(self
            .memo
            .lock()
            .await
            .entry(signature)
            .or_insert(patterns)
            .clone())
    }

    /// Number of distinct signatures looked up so far
    pub async fn memo_len(&self) -> usize {
        self.memo.lock().await.len()
    }
}
