//! Section x image affinity matrix

use serde::{Deserialize, Serialize};

/// One matrix cell: relevance of an image to a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityEntry {
    pub section_index: usize,
    pub image_id: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Dense `sections x images` score matrix.
///
/// Rows follow section order, columns follow `image_ids`. Derived per run and
/// never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffinityMatrix {
    pub image_ids: Vec<String>,
    pub scores: Vec<Vec<f32>>,
}

impl AffinityMatrix {
    /// A matrix with `sections` rows and no image columns
    #[must_use]
    pub fn empty(sections: usize) -> Self {
        Self {
            image_ids: Vec::new(),
            scores: vec![Vec::new(); sections],
        }
    }

    #[must_use]
    pub fn num_sections(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn num_images(&self) -> usize {
        self.image_ids.len()
    }

    /// True when there is nothing to compare (no sections or no images)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image_ids.is_empty() || self.scores.is_empty()
    }

    /// Score for a section/image column pair
    #[must_use]
    pub fn get(&self, section: usize, image: usize) -> Option<f32> {
        self.scores.get(section).and_then(|row| row.get(image)).copied()
    }

    /// Score for a section and an image id
    #[must_use]
    pub fn score_for(&self, section: usize, image_id: &str) -> Option<f32> {
        let column = self.image_ids.iter().position(|id| id == image_id)?;
        self.get(section, column)
    }

    #[must_use]
    pub fn row(&self, section: usize) -> &[f32] {
        self.scores.get(section).map_or(&[], Vec::as_slice)
    }

    /// Flatten into sparse entries, row-major
    #[must_use]
    pub fn entries(&self) -> Vec<AffinityEntry> {
        let mut entries = Vec::with_capacity(self.num_sections() * self.num_images());
        for (section_index, row) in self.scores.iter().enumerate() {
            for (image_id, score) in self.image_ids.iter().zip(row.iter()) {
                entries.push(AffinityEntry {
                    section_index,
                    image_id: image_id.clone(),
                    score: *score,
                });
            }
        }
        entries
    }
}
