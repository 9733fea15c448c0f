//! Duplicate removal, clustering and image allocation
//!
//! Allocation runs in rounds. Each round every section that still has room
//! proposes its best eligible image; contested proposals go to the higher
//! affinity, then to the lower section index. Losers propose their next choice
//! in the following round, so results depend only on the inputs.
//!
//! An image is eligible for a section when it has placements left, is not
//! already in that section, and its cluster is not yet used by the section.
//! Under the exclusive policy a cluster also feeds only one section. That last
//! rule is dropped for sections that would otherwise stay empty.

use crate::{FusionConfig, ImageReusePolicy};
use magazine_common::{AffinityMatrix, ImageAsset, Warning};
use magazine_embeddings::cosine_similarity;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const COMPONENT: &str = "fusion";

/// Images left after duplicate removal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// Survivors in input order
    pub kept: Vec<ImageAsset>,
    /// `(removed_id, kept_id)` pairs
    pub removed: Vec<(String, String)>,
}

/// Image ids per section, in section order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    pub assignments: Vec<Vec<String>>,
    pub warnings: Vec<Warning>,
}

impl Allocation {
    /// Total placements across sections
    #[must_use]
    pub fn placed(&self) -> usize {
        self.assignments.iter().map(Vec::len).sum()
    }
}

/// Whether `candidate` duplicates an already kept `original`
fn is_duplicate(candidate: &ImageAsset, original: &ImageAsset, config: &FusionConfig) -> bool {
    if !candidate.content_digest.is_empty() && candidate.content_digest == original.content_digest {
        return true;
    }
    if let (Some(a), Some(b)) = (&candidate.perceptual_hash, &original.perceptual_hash) {
        if a.hamming_distance(b).is_some_and(|d| d < config.hamming_threshold) {
            return true;
        }
    }
    if let (Some(a), Some(b)) = (&candidate.embedding, &original.embedding) {
        if cosine_similarity(a, b) > config.embedding_duplicate_threshold {
            return true;
        }
    }
    false
}

/// Drop duplicates and near-duplicates; the first-seen image of a group wins
pub fn deduplicate(images: Vec<ImageAsset>, config: &FusionConfig) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    for image in images {
        match outcome
            .kept
            .iter()
            .find(|kept| is_duplicate(&image, kept, config))
        {
            Some(kept) => {
                debug!("Image {} duplicates {}", image.id, kept.id);
                outcome.removed.push((image.id, kept.id.clone()));
            }
            None => outcome.kept.push(image),
        }
    }
    info!(
        "Deduplication kept {} images, removed {}",
        outcome.kept.len(),
        outcome.removed.len()
    );
    outcome
}

/// Greedy leader clustering on embeddings. Sets and returns each `cluster_id`.
///
/// An image joins the most similar existing leader at or above `threshold`,
/// otherwise it leads a new cluster. Images without an embedding get their own.
pub fn cluster(images: &mut [ImageAsset], threshold: f32) -> Vec<usize> {
    let mut leaders: Vec<(usize, Vec<f32>)> = Vec::new();
    let mut next_id = 0usize;
    let mut ids = Vec::with_capacity(images.len());

    for image in images.iter_mut() {
        let id = match &image.embedding {
            Some(embedding) => {
                let mut best: Option<(usize, f32)> = None;
                for (leader_id, leader) in &leaders {
                    let similarity = cosine_similarity(embedding, leader);
                    if similarity >= threshold && best.map_or(true, |(_, s)| similarity > s) {
                        best = Some((*leader_id, similarity));
                    }
                }
                match best {
                    Some((leader_id, _)) => leader_id,
                    None => {
                        leaders.push((next_id, embedding.clone()));
                        next_id += 1;
                        next_id - 1
                    }
                }
            }
            None => {
                next_id += 1;
                next_id - 1
            }
        };
        image.cluster_id = Some(id);
        ids.push(id);
    }
    debug!("Clustered {} images into {} clusters", images.len(), next_id);
    ids
}

struct Pool<'a> {
    images: &'a [ImageAsset],
    /// Placements left per image
    remaining: Vec<usize>,
    assignments: Vec<Vec<usize>>,
    /// Section that first used each cluster
    cluster_owner: HashMap<usize, usize>,
    exclusive_clusters: bool,
}

impl Pool<'_> {
    fn cluster_of(&self, image: usize) -> usize {
        // Unclustered images behave as singletons
        self.images[image].cluster_id.unwrap_or(usize::MAX - image)
    }

    fn eligible(&self, section: usize, image: usize, relaxed: bool) -> bool {
        if self.remaining[image] == 0 || self.assignments[section].contains(&image) {
            return false;
        }
        let cluster = self.cluster_of(image);
        if self.assignments[section]
            .iter()
            .any(|&i| self.cluster_of(i) == cluster)
        {
            return false;
        }
        if self.exclusive_clusters && !relaxed {
            if let Some(&owner) = self.cluster_owner.get(&cluster) {
                return owner == section;
            }
        }
        true
    }

    fn place(&mut self, section: usize, image: usize) {
        self.remaining[image] -= 1;
        self.assignments[section].push(image);
        let cluster = self.cluster_of(image);
        self.cluster_owner.entry(cluster).or_insert(section);
    }

    /// Run proposal rounds for `sections` until nobody can place anything
    fn rounds(&mut self, sections: &[usize], scores: &[Vec<f32>], capacities: &[usize], relaxed: bool) {
        loop {
            let mut proposals: Vec<(usize, usize, f32)> = Vec::new();
            for &section in sections {
                if self.assignments[section].len() >= capacities[section] {
                    continue;
                }
                let best = (0..self.images.len())
                    .filter(|&image| self.eligible(section, image, relaxed))
                    .map(|image| (image, score_at(scores, section, image)))
                    .fold(None, |best: Option<(usize, f32)>, (image, score)| match best {
                        Some((_, s)) if s >= score => best,
                        _ => Some((image, score)),
                    });
                if let Some((image, score)) = best {
                    proposals.push((section, image, score));
                }
            }
            if proposals.is_empty() {
                return;
            }

            // Highest affinity first, lower section index on ties
            proposals.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
            let mut claimed_clusters: HashSet<usize> = HashSet::new();
            for (section, image, _) in proposals {
                let cluster = self.cluster_of(image);
                let contested = self.exclusive_clusters && !relaxed && claimed_clusters.contains(&cluster);
                if contested || !self.eligible(section, image, relaxed) {
                    continue;
                }
                self.place(section, image);
                claimed_clusters.insert(cluster);
            }
        }
    }
}

fn score_at(scores: &[Vec<f32>], section: usize, image: usize) -> f32 {
    scores
        .get(section)
        .and_then(|row| row.get(image))
        .copied()
        .unwrap_or(0.0)
}

fn placements_per_image(policy: ImageReusePolicy) -> usize {
    match policy {
        ImageReusePolicy::Exclusive => 1,
        ImageReusePolicy::ControlledRepeats { max_placements } => max_placements.max(1),
    }
}

/// Affinity-guided allocation of deduplicated, clustered images.
///
/// `capacities[s]` bounds section `s`; sections beyond `capacities` get none.
/// Matrix columns are matched to `images` by id.
pub fn allocate(
    num_sections: usize,
    images: &[ImageAsset],
    matrix: &AffinityMatrix,
    capacities: &[usize],
    policy: ImageReusePolicy,
) -> Allocation {
    let capacities = padded(capacities, num_sections);
    let column: HashMap<&str, usize> = matrix
        .image_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    // Scores re-indexed by position in `images`
    let scores: Vec<Vec<f32>> = (0..num_sections)
        .map(|s| {
            images
                .iter()
                .map(|img| {
                    column
                        .get(img.id.as_str())
                        .and_then(|&c| matrix.get(s, c))
                        .unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    let mut pool = Pool {
        images,
        remaining: vec![placements_per_image(policy); images.len()],
        assignments: vec![Vec::new(); num_sections],
        cluster_owner: HashMap::new(),
        exclusive_clusters: policy == ImageReusePolicy::Exclusive,
    };

    let all: Vec<usize> = (0..num_sections).collect();
    pool.rounds(&all, &scores, &capacities, false);

    let empty: Vec<usize> = all
        .iter()
        .copied()
        .filter(|&s| pool.assignments[s].is_empty() && capacities[s] > 0)
        .collect();
    if !empty.is_empty() && pool.remaining.iter().any(|&r| r > 0) {
        debug!("Relaxing cluster constraint for {} empty sections", empty.len());
        pool.rounds(&empty, &scores, &capacities, true);
    }

    finish(pool.assignments, images, &capacities)
}

/// Affinity-free fallback: images dealt out by position, one per section in turn
pub fn allocate_round_robin(num_sections: usize, images: &[ImageAsset], capacities: &[usize]) -> Allocation {
    let capacities = padded(capacities, num_sections);
    let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); num_sections];
    let mut section = 0usize;

    for image in 0..images.len() {
        let Some(target) = (0..num_sections)
            .map(|offset| (section + offset) % num_sections)
            .find(|&s| assignments[s].len() < capacities[s])
        else {
            break;
        };
        assignments[target].push(image);
        section = (target + 1) % num_sections;
    }

    finish(assignments, images, &capacities)
}

fn padded(capacities: &[usize], num_sections: usize) -> Vec<usize> {
    (0..num_sections)
        .map(|s| capacities.get(s).copied().unwrap_or(0))
        .collect()
}

fn finish(assignments: Vec<Vec<usize>>, images: &[ImageAsset], capacities: &[usize]) -> Allocation {
    let assignments: Vec<Vec<String>> = assignments
        .into_iter()
        .map(|ids| ids.into_iter().map(|i| images[i].id.clone()).collect())
        .collect();

    let mut warnings = Vec::new();
    if !images.is_empty() {
        let empty = assignments
            .iter()
            .zip(capacities)
            .filter(|(ids, &cap)| ids.is_empty() && cap > 0)
            .count();
        if empty > 0 {
            warnings.push(Warning::exhausted(
                COMPONENT,
                format!("images ran out, {empty} sections left without images"),
            ));
        }
    }

    let allocation = Allocation {
        assignments,
        warnings,
    };
    info!(
        "Allocated {} placements across {} sections",
        allocation.placed(),
        allocation.assignments.len()
    );
    allocation
}
