//! Template choice from retrieved candidates

use magazine_common::{EmphasisFlags, LayoutPattern, LayoutStrategy, LengthBucket, Section};
use serde::{Deserialize, Serialize};

pub const TEXT_ONLY_TEMPLATE: &str = "default-text-only";
pub const SINGLE_IMAGE_TEMPLATE: &str = "default-single-image";
pub const GALLERY_TEMPLATE: &str = "default-gallery";

/// Where a template choice came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    Retrieved,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateChoice {
    pub template_id: String,
    pub layout_strategy: LayoutStrategy,
    pub source: TemplateSource,
}

impl TemplateChoice {
    /// Write the choice into the section
    pub fn apply_to(self, section: &mut Section) {
        section.template_id = Some(self.template_id);
        section.layout_strategy = Some(self.layout_strategy);
    }
}

/// Built-in template for an image count. Never fails.
#[must_use]
pub fn default_template(image_count: usize) -> TemplateChoice {
    let (template_id, image_text_ratio, hero_image) = match image_count {
        0 => (TEXT_ONLY_TEMPLATE, 0.0, false),
        1 => (SINGLE_IMAGE_TEMPLATE, 0.4, true),
        _ => (GALLERY_TEMPLATE, 0.6, false),
    };
    TemplateChoice {
        template_id: template_id.to_string(),
        layout_strategy: LayoutStrategy {
            columns: if image_count == 0 { 2 } else { 1 },
            image_text_ratio,
            emphasis: EmphasisFlags {
                hero_image,
                pull_quote: false,
                drop_cap: image_count == 0,
            },
        },
        source: TemplateSource::Default,
    }
}

/// Whether a template holding `capacity` images fits `images` images.
///
/// Text-only and single-image templates only take exact matches; galleries
/// take any multi-image section they can hold.
fn capacity_fits(capacity: usize, images: usize) -> bool {
    match (capacity, images) {
        (0, 0) | (1, 1) => true,
        (c, i) => i > 1 && c >= i,
    }
}

fn is_text_led(style: &str) -> bool {
    let style = style.to_lowercase();
    ["text", "mixed", "magazine"].iter().any(|k| style.contains(k))
}

/// Picks the nearest-bucket candidate for a section
#[derive(Debug, Clone)]
pub struct TemplateSelector {
    /// Bodies longer than this prefer text-led styles
    text_led_min_chars: usize,
}

impl Default for TemplateSelector {
    fn default() -> Self {
        Self {
            text_led_min_chars: 500,
        }
    }
}

impl TemplateSelector {
    pub fn new(text_led_min_chars: usize) -> Self {
        Self { text_led_min_chars }
    }

    /// Choose a template for `section` from ranked `candidates`.
    ///
    /// Candidates that cannot hold the section's images are dropped. The rest
    /// are ordered by bucket distance, then text-led preference for long bodies,
    /// then popularity, recency and rank. Falls back to [`default_template`].
    #[must_use]
    pub fn select(&self, section: &Section, candidates: &[LayoutPattern]) -> TemplateChoice {
        let chars = section.char_len();
        let bucket = LengthBucket::from_chars(chars);
        let images = section.assigned_image_ids.len();
        let wants_text_led = chars > self.text_led_min_chars;

        let distance = |p: &LayoutPattern| bucket_distance(p, bucket, images);
        let style_penalty = |p: &LayoutPattern| usize::from(wants_text_led && !is_text_led(&p.style));

        let best = candidates
            .iter()
            .enumerate()
            .filter(|(_, p)| capacity_fits(p.image_count, images))
            .min_by(|(rank_a, a), (rank_b, b)| {
                distance(a)
                    .cmp(&distance(b))
                    .then_with(|| style_penalty(a).cmp(&style_penalty(b)))
                    .then_with(|| b.popularity.cmp(&a.popularity))
                    .then_with(|| b.last_used.cmp(&a.last_used))
                    .then_with(|| rank_a.cmp(rank_b))
            })
            .map(|(_, p)| p);

        match best {
            Some(pattern) => TemplateChoice {
                template_id: pattern.template_id.clone(),
                layout_strategy: strategy_for(pattern, images, chars),
                source: TemplateSource::Retrieved,
            },
            None => default_template(images),
        }
    }
}

fn strategy_for(pattern: &LayoutPattern, images: usize, chars: usize) -> LayoutStrategy {
    let image_text_ratio = match images {
        0 => 0.0,
        1 => 0.4,
        2 | 3 => 0.5,
        _ => 0.6,
    };
    let style = pattern.style.to_lowercase();
    LayoutStrategy {
        columns: pattern.columns.max(1),
        image_text_ratio,
        emphasis: EmphasisFlags {
            hero_image: images > 0 && (style.contains("hero") || style.contains("cover")),
            pull_quote: chars > 800,
            drop_cap: style.contains("essay") || style.contains("magazine"),
        },
    }
}

/// Bucket steps plus image count difference between a pattern and a section
#[must_use]
pub fn bucket_distance(pattern: &LayoutPattern, bucket: LengthBucket, images: usize) -> usize {
    pattern.length_bucket.ordinal().abs_diff(bucket.ordinal()) + pattern.image_count.abs_diff(images)
}
