// Extraction: one raw unit in, zero or one Record out.
//
// The only place that turns "whatever shape the source gives us" into the
// canonical record. Identity failures skip the unit; every other field
// degrades to an empty/zero default.

use chrono::DateTime;
use tracing::{debug, warn};

use harvest_common::{FetchError, HarvestError, Identity, RawUnit, Record, Result};

use crate::fetcher::Fetcher;

/// Extract a record from `unit`, expanding truncated text through the
/// fetcher first. Returns `None` (after logging) when the unit has no usable
/// identity.
pub async fn extract(fetcher: &mut dyn Fetcher, unit: RawUnit) -> Option<Record> {
    let identity = match identity_of(&unit) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(
                surface_key = %unit.surface_key(),
                error = %e,
                "Skipping unit without usable identity"
            );
            return None;
        }
    };

    let unit = if unit.truncated {
        expand_text(fetcher, unit, &identity).await
    } else {
        unit
    };

    Some(assemble(identity, &unit))
}

/// Build a record without any expansion step.
pub fn build_record(unit: &RawUnit) -> Result<Record> {
    let identity = identity_of(unit)?;
    Ok(assemble(identity, unit))
}

/// The `(username, timestamp)` key of a unit. The timestamp must be RFC 3339
/// and is kept verbatim.
pub fn identity_of(unit: &RawUnit) -> Result<Identity> {
    let username = unit
        .handle()
        .ok_or_else(|| HarvestError::UnidentifiableUnit("no username".into()))?;

    let timestamp = unit
        .timestamp
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HarvestError::UnidentifiableUnit(format!("{username}: no timestamp")))?;

    DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
        HarvestError::UnidentifiableUnit(format!("{username}: bad timestamp {timestamp:?}: {e}"))
    })?;

    Ok(Identity::new(username, timestamp))
}

/// Replace the unit's text with the expanded text when expansion works.
/// Falls back to the truncated text otherwise.
async fn expand_text(fetcher: &mut dyn Fetcher, mut unit: RawUnit, identity: &Identity) -> RawUnit {
    match fetcher.expand(&unit).await {
        Ok(expanded) => match expanded.text.filter(|t| !t.trim().is_empty()) {
            Some(text) => {
                unit.text = Some(text);
                unit.truncated = expanded.truncated;
            }
            None => debug!(%identity, "Expansion returned no text, keeping truncated text"),
        },
        Err(FetchError::Unsupported(_)) => {
            debug!(%identity, "Fetcher cannot expand, keeping truncated text");
        }
        Err(e) => {
            warn!(%identity, error = %e, "Expansion failed, keeping truncated text");
        }
    }
    unit
}

fn assemble(identity: Identity, unit: &RawUnit) -> Record {
    Record {
        display_name: unit
            .display_name
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        content: unit
            .text
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        image_url: unit.first_image().unwrap_or_default().to_string(),
        likes: count_field(&identity, "likes", unit.likes_text.as_deref()),
        retweets: count_field(&identity, "retweets", unit.retweets_text.as_deref()),
        identity,
    }
}

fn count_field(identity: &Identity, field: &str, text: Option<&str>) -> u64 {
    let Some(text) = text else {
        return 0;
    };
    parse_count(text).unwrap_or_else(|| {
        debug!(%identity, field, value = text, "Unparsable count, defaulting to 0");
        0
    })
}

/// Parse a display count such as `1,234`, `1.5K`, `2.3M` or `1.2万`.
///
/// Blank text means zero. Returns `None` for anything unrecognisable.
pub fn parse_count(text: &str) -> Option<u64> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Some(0);
    }

    let (number, multiplier) = split_suffix(&cleaned);
    if number.is_empty() {
        return None;
    }

    match multiplier {
        None => parse_grouped_integer(number),
        Some(multiplier) => {
            let decimal = if number.contains('.') {
                number.replace(',', "")
            } else {
                number.replace(',', ".")
            };
            if !decimal.chars().all(|c| c.is_ascii_digit() || c == '.') {
                return None;
            }
            let value: f64 = decimal.parse().ok()?;
            let scaled = (value * multiplier).round();
            if !scaled.is_finite() || scaled < 0.0 || scaled > u64::MAX as f64 {
                return None;
            }
            Some(scaled as u64)
        }
    }
}

fn split_suffix(text: &str) -> (&str, Option<f64>) {
    let Some(last) = text.chars().last() else {
        return (text, None);
    };
    let multiplier = match last {
        'k' | 'K' => 1e3,
        'm' | 'M' => 1e6,
        'b' | 'B' => 1e9,
        '万' => 1e4,
        '亿' => 1e8,
        _ => return (text, None),
    };
    (&text[..text.len() - last.len_utf8()], Some(multiplier))
}

/// Integer with optional `,` or `.` thousands grouping (groups of exactly three).
fn parse_grouped_integer(text: &str) -> Option<u64> {
    if let Some(sep) = [',', '.'].into_iter().find(|s| text.contains(*s)) {
        let mut groups = text.split(sep);
        let head = groups.next()?;
        if head.is_empty() || head.len() > 3 {
            return None;
        }
        let mut digits = head.to_string();
        for group in groups {
            if group.len() != 3 {
                return None;
            }
            digits.push_str(group);
        }
        return digits.parse().ok();
    }
    if !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{unit, MockFetcher};

    #[test]
    fn parses_plain_and_grouped_counts() {
        assert_eq!(parse_count(""), Some(0));
        assert_eq!(parse_count("  "), Some(0));
        assert_eq!(parse_count("0"), Some(0));
        assert_eq!(parse_count("42"), Some(42));
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count("1,234,567"), Some(1_234_567));
        assert_eq!(parse_count("1.234"), Some(1234));
        assert_eq!(parse_count("1 234"), Some(1234));
        assert_eq!(parse_count("1\u{202f}234"), Some(1234));
    }

    #[test]
    fn parses_abbreviated_counts() {
        assert_eq!(parse_count("1.5K"), Some(1_500));
        assert_eq!(parse_count("1.15K"), Some(1_150));
        assert_eq!(parse_count("12k"), Some(12_000));
        assert_eq!(parse_count("2.3M"), Some(2_300_000));
        assert_eq!(parse_count("1B"), Some(1_000_000_000));
        assert_eq!(parse_count("1,5K"), Some(1_500));
        assert_eq!(parse_count("1.2万"), Some(12_000));
        assert_eq!(parse_count("3亿"), Some(300_000_000));
    }

    #[test]
    fn rejects_garbage_counts() {
        assert_eq!(parse_count("abc"), None);
        assert_eq!(parse_count("-5"), None);
        assert_eq!(parse_count("1.5"), None);
        assert_eq!(parse_count("12,34"), None);
        assert_eq!(parse_count("K"), None);
        assert_eq!(parse_count("1.2.3K"), None);
    }

    #[test]
    fn builds_full_record() {
        let mut raw = unit("alice", "2025-03-01T10:00:00.000Z", "hello world");
        raw.display_name = Some(" Alice ".into());
        raw.image_urls = vec!["".into(), "https://pbs.twimg.com/media/x.jpg".into()];
        raw.likes_text = Some("1.2K".into());
        raw.retweets_text = Some("7".into());

        let record = build_record(&raw).unwrap();
        assert_eq!(record.identity.username, "@alice");
        assert_eq!(record.identity.timestamp, "2025-03-01T10:00:00.000Z");
        assert_eq!(record.display_name, "Alice");
        assert_eq!(record.content, "hello world");
        assert_eq!(record.image_url, "https://pbs.twimg.com/media/x.jpg");
        assert_eq!(record.likes, 1200);
        assert_eq!(record.retweets, 7);
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = RawUnit {
            author_href: Some("https://x.com/bob".into()),
            timestamp: Some("2025-03-01T10:00:00Z".into()),
            likes_text: Some("lots".into()),
            ..Default::default()
        };
        let record = build_record(&raw).unwrap();
        assert_eq!(record.identity.username, "@bob");
        assert_eq!(record.content, "");
        assert_eq!(record.display_name, "");
        assert!(!record.has_image());
        assert_eq!(record.likes, 0);
        assert_eq!(record.retweets, 0);
    }

    #[test]
    fn missing_username_is_unidentifiable() {
        let raw = RawUnit {
            timestamp: Some("2025-03-01T10:00:00Z".into()),
            text: Some("orphan".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_record(&raw),
            Err(HarvestError::UnidentifiableUnit(_))
        ));
    }

    #[test]
    fn missing_or_bad_timestamp_is_unidentifiable() {
        let mut raw = unit("alice", "", "text");
        assert!(matches!(
            build_record(&raw),
            Err(HarvestError::UnidentifiableUnit(_))
        ));
        raw.timestamp = Some("yesterday".into());
        assert!(matches!(
            build_record(&raw),
            Err(HarvestError::UnidentifiableUnit(_))
        ));
        raw.timestamp = None;
        assert!(build_record(&raw).is_err());
    }

    #[tokio::test]
    async fn extract_skips_unidentifiable_unit() {
        let mut fetcher = MockFetcher::new();
        let raw = RawUnit {
            text: Some("no author".into()),
            ..Default::default()
        };
        assert!(extract(&mut fetcher, raw).await.is_none());
    }

    #[tokio::test]
    async fn truncated_text_is_expanded() {
        let mut raw = unit("alice", "2025-03-01T10:00:00.000Z", "the beginning…");
        raw.truncated = true;
        let mut fetcher =
            MockFetcher::new().on_expand(&raw, Ok("the beginning and the end".into()));

        let record = extract(&mut fetcher, raw).await.unwrap();
        assert_eq!(record.content, "the beginning and the end");
        assert_eq!(fetcher.expand_calls(), 1);
    }

    #[tokio::test]
    async fn failed_expansion_keeps_truncated_text() {
        let mut raw = unit("alice", "2025-03-01T10:00:00.000Z", "the beginning…");
        raw.truncated = true;
        let mut fetcher = MockFetcher::new()
            .on_expand(&raw, Err(FetchError::Transient("element went stale".into())));

        let record = extract(&mut fetcher, raw).await.unwrap();
        assert_eq!(record.content, "the beginning…");
    }

    #[tokio::test]
    async fn unsupported_expansion_keeps_truncated_text() {
        let mut raw = unit("alice", "2025-03-01T10:00:00.000Z", "short…");
        raw.truncated = true;
        let mut fetcher = MockFetcher::new();

        let record = extract(&mut fetcher, raw).await.unwrap();
        assert_eq!(record.content, "short…");
        assert_eq!(fetcher.expand_calls(), 1);
    }

    #[tokio::test]
    async fn untruncated_unit_is_not_expanded() {
        let raw = unit("alice", "2025-03-01T10:00:00.000Z", "complete");
        let mut fetcher = MockFetcher::new();
        extract(&mut fetcher, raw).await.unwrap();
        assert_eq!(fetcher.expand_calls(), 0);
    }
}
