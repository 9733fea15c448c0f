//! Structure planner: decides how many sections to make and what goes in each

use crate::framing::Block;
use crate::segment::{headline, sentences};
use crate::ContentConfig;
use magazine_common::{ImageAttributes, MagazinePlan, Section, SectionKind};
use std::collections::HashMap;
use tracing::debug;

/// Number of sections for `total_chars` of text and `image_count` images.
///
/// More text and more images both push the count up; the result never exceeds
/// the number of blocks available to fill the sections.
pub(crate) fn section_count(
    total_chars: usize,
    image_count: usize,
    block_count: usize,
    config: &ContentConfig,
) -> usize {
    let by_length = total_chars.div_ceil(config.section_char_ceiling.max(1));
    let by_images = image_count.div_ceil(config.target_images_per_section.max(1));
    by_length
        .max(by_images)
        .max(config.min_sections)
        .min(config.max_sections)
        .min(block_count)
        .max(1)
}

/// Lay the blocks of both framings out as section drafts.
///
/// Interview sections come first, essay sections after. When only one section
/// is allowed and both framings survived, they share a single mixed section.
pub(crate) fn plan_sections(
    interview: Vec<Block>,
    essay: Vec<Block>,
    image_count: usize,
    config: &ContentConfig,
) -> Vec<Section> {
    let interview_chars: usize = interview.iter().map(Block::chars).sum();
    let essay_chars: usize = essay.iter().map(Block::chars).sum();
    let block_count = interview.len() + essay.len();
    if block_count == 0 {
        return Vec::new();
    }

    let count = section_count(
        interview_chars + essay_chars,
        image_count,
        block_count,
        config,
    );
    debug!(
        "Planning {} sections from {} interview and {} essay blocks ({} images)",
        count,
        interview.len(),
        essay.len(),
        image_count
    );

    if count == 1 && !interview.is_empty() && !essay.is_empty() {
        let mut blocks = interview;
        blocks.extend(essay);
        let title = group_title(&blocks, 1, config.title_max_chars);
        let body = blocks.into_iter().flat_map(|b| b.paragraphs).collect();
        return vec![Section::draft(0, SectionKind::Mixed, title, body)];
    }

    let (interview_groups, essay_groups) = split_count(
        count,
        (interview.len(), interview_chars),
        (essay.len(), essay_chars),
    );

    let mut sections = Vec::with_capacity(count);
    for group in partition(interview, interview_groups)
        .into_iter()
        .chain(partition(essay, essay_groups))
    {
        let index = sections.len();
        let Some(kind) = group.first().map(|b| b.kind) else {
            continue;
        };
        let title = group_title(&group, index + 1, config.title_max_chars);
        let body = group.into_iter().flat_map(|b| b.paragraphs).collect();
        sections.push(Section::draft(index, kind, title, body));
    }
    sections
}

/// Share `count` sections between the framings by character volume.
///
/// Each surviving framing gets at least one section and never more than it has
/// blocks; what one side cannot use goes to the other.
fn split_count(count: usize, interview: (usize, usize), essay: (usize, usize)) -> (usize, usize) {
    let (interview_blocks, interview_chars) = interview;
    let (essay_blocks, essay_chars) = essay;
    match (interview_blocks, essay_blocks) {
        (0, _) => return (0, count.min(essay_blocks)),
        (_, 0) => return (count.min(interview_blocks), 0),
        _ => {}
    }

    let total = (interview_chars + essay_chars).max(1) as f64;
    let share = (count as f64 * interview_chars as f64 / total).round() as usize;
    let mut for_interview = share.clamp(1, interview_blocks);
    let for_essay = count.saturating_sub(for_interview).clamp(1, essay_blocks);
    if for_interview + for_essay < count {
        for_interview = (count - for_essay).min(interview_blocks);
    } else if for_interview + for_essay > count && for_interview > 1 {
        for_interview = count.saturating_sub(for_essay).max(1);
    }
    (for_interview, for_essay)
}

/// Order-preserving split of `blocks` into `groups` runs of similar size.
///
/// Every group gets at least one block.
fn partition(blocks: Vec<Block>, groups: usize) -> Vec<Vec<Block>> {
    if blocks.is_empty() || groups == 0 {
        return Vec::new();
    }
    let groups = groups.min(blocks.len());
    let total_blocks = blocks.len();
    let mut remaining_chars: usize = blocks.iter().map(Block::chars).sum();

    let mut result: Vec<Vec<Block>> = Vec::with_capacity(groups);
    let mut current: Vec<Block> = Vec::new();
    let mut current_chars = 0usize;

    for (i, block) in blocks.into_iter().enumerate() {
        let groups_left = groups - result.len();
        let blocks_left = total_blocks - i;
        let chars = block.chars();

        if !current.is_empty() && groups_left > 1 {
            let must_close = blocks_left < groups_left;
            let target = (current_chars + remaining_chars) as f64 / groups_left as f64;
            let with_block = (current_chars + chars) as f64;
            let overshoot = with_block - target;
            let undershoot = target - current_chars as f64;
            if must_close || (overshoot > 0.0 && overshoot > undershoot) {
                result.push(std::mem::take(&mut current));
                current_chars = 0;
            }
        }

        current_chars += chars;
        remaining_chars -= chars;
        current.push(block);
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

fn group_title(group: &[Block], ordinal: usize, max_chars: usize) -> String {
    if let Some(heading) = group.iter().find_map(|b| b.heading.as_deref()) {
        if !heading.is_empty() {
            return heading.to_string();
        }
    }
    group
        .first()
        .and_then(|b| b.paragraphs.first())
        .and_then(|p| sentences(p).into_iter().next())
        .map(|s| headline(&s, max_chars))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Part {ordinal}"))
}

/// Magazine header from what the images say about the trip
pub(crate) fn magazine_plan(images: &[ImageAttributes]) -> MagazinePlan {
    let mut plan = MagazinePlan::default();

    if let Some(country) = most_common(images.iter().filter_map(|a| a.country.as_deref())) {
        plan.title = format!("{}: {}", plan.title, country);
    }

    let mut cities: Vec<&str> = Vec::new();
    for city in images.iter().filter_map(|a| a.city.as_deref()) {
        if !cities.contains(&city) {
            cities.push(city);
        }
    }
    match cities.as_slice() {
        [] => {}
        [only] => plan.subtitle = format!("Moments from {only}"),
        [first @ .., last] => {
            let shown: Vec<&str> = first.iter().take(2).copied().collect();
            plan.subtitle = format!("Moments from {} and {}", shown.join(", "), last);
        }
    }
    plan
}

/// Most frequent value; ties go to the one seen first
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for value in values {
        let entry = counts.entry(value).or_insert(0);
        if *entry == 0 {
            order.push(value);
        }
        *entry += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for value in order {
        let n = counts[value];
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((value, n));
        }
    }
    best.map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: SectionKind, heading: Option<&str>, text: &str) -> Block {
        Block {
            kind,
            heading: heading.map(str::to_string),
            paragraphs: vec![text.to_string()],
        }
    }

    fn essay(n: usize, chars: usize) -> Vec<Block> {
        (0..n)
            .map(|i| block(SectionKind::Essay, None, &format!("{i}{}", "x".repeat(chars - 1))))
            .collect()
    }

    #[test]
    fn test_section_count_grows_with_images() {
        let config = ContentConfig::default();
        assert_eq!(section_count(500, 0, 20, &config), 3);
        assert_eq!(section_count(500, 12, 20, &config), 4);
        assert_eq!(section_count(5_000, 0, 20, &config), 5);
        assert_eq!(section_count(50_000, 0, 20, &config), 10);
        assert_eq!(section_count(500, 0, 2, &config), 2);
        assert_eq!(section_count(0, 0, 0, &config), 1);
    }

    #[test]
    fn test_partition_balances_and_keeps_order() {
        let mut blocks = essay(3, 100);
        blocks.push(block(SectionKind::Essay, None, &"y".repeat(300)));
        let groups = partition(blocks, 2);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn test_partition_gives_every_group_a_block() {
        let mut blocks = vec![block(SectionKind::Essay, None, &"y".repeat(900))];
        blocks.extend(essay(2, 10));
        let groups = partition(blocks, 3);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn test_split_count_respects_block_limits() {
        assert_eq!(split_count(4, (1, 50), (6, 600)), (1, 3));
        assert_eq!(split_count(3, (0, 0), (5, 500)), (0, 3));
        assert_eq!(split_count(5, (2, 500), (1, 100)), (2, 1));
        let (i, e) = split_count(6, (4, 400), (4, 400));
        assert_eq!((i, e), (3, 3));
    }

    #[test]
    fn test_plan_orders_interview_before_essay() {
        let interview = vec![block(
            SectionKind::Interview,
            Some("What did you see"),
            "Q: What did you see?",
        )];
        let sections = plan_sections(interview, essay(2, 50), 0, &ContentConfig::default());
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].kind, SectionKind::Interview);
        assert_eq!(sections[0].title, "What did you see");
        assert_eq!(sections[1].kind, SectionKind::Essay);
        assert_eq!(
            sections.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_single_section_budget_merges_framings() {
        let config = ContentConfig {
            max_sections: 1,
            ..ContentConfig::default()
        };
        let interview = vec![block(SectionKind::Interview, Some("Dawn"), "Q: Dawn?")];
        let sections = plan_sections(interview, essay(1, 20), 0, &config);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].kind, SectionKind::Mixed);
        assert_eq!(sections[0].body.len(), 2);
    }

    #[test]
    fn test_untitled_group_uses_first_sentence() {
        let blocks = vec![block(SectionKind::Essay, None, "We reached Hakone at noon. It rained.")];
        let sections = plan_sections(Vec::new(), blocks, 0, &ContentConfig::default());
        assert_eq!(sections[0].title, "We reached Hakone at noon");
    }

    #[test]
    fn test_magazine_plan_uses_geo_attributes() {
        let image = |country: &str, city: &str| ImageAttributes {
            country: Some(country.to_string()),
            city: Some(city.to_string()),
            ..ImageAttributes::default()
        };
        let plan = magazine_plan(&[
            image("Japan", "Kyoto"),
            image("Japan", "Osaka"),
            image("Korea", "Busan"),
        ]);
        assert_eq!(plan.title, "Travel Notes: Japan");
        assert_eq!(plan.subtitle, "Moments from Kyoto, Osaka and Busan");

        assert_eq!(magazine_plan(&[]), MagazinePlan::default());
    }
}
