//! Parsing vision-model answers into image attributes

use magazine_common::ImageAttributes;

/// Parse `Country:` / `City:` / `Location:` / `Description:` lines.
///
/// Values of "Unknown" (any case) or empty values are left unset. Lines with
/// other labels are kept in `extra`. When no labelled line is found the whole
/// answer becomes the description.
pub fn parse_geo_description(text: &str) -> ImageAttributes {
    let mut attributes = ImageAttributes::default();
    let mut labelled = false;

    for line in text.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().trim_matches('*').to_ascii_lowercase();
        let value = value.trim().trim_matches('*').trim();
        let value = (!value.is_empty() && !value.eq_ignore_ascii_case("unknown"))
            .then(|| value.to_string());

        match label.as_str() {
            "country" => attributes.country = value,
            "city" => attributes.city = value,
            "location" | "landmark" => attributes.location = value,
            "description" => attributes.description = value,
            other => {
                if let Some(value) = value {
                    attributes.extra.insert(other.to_string(), value);
                }
                continue;
            }
        }
        labelled = true;
    }

    if !labelled {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            attributes.description = Some(trimmed.to_string());
        }
    }

    attributes.labels = [&attributes.country, &attributes.city, &attributes.location]
        .iter()
        .filter_map(|v| v.as_ref().map(|s| s.to_lowercase()))
        .collect();
    attributes.confidence = if attributes.country.is_some() { 0.9 } else { 0.5 };
    attributes
}
