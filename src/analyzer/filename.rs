use regex::Regex;
use std::sync::LazyLock;

/// Digits directly before or after a "bpm" token: "128bpm", "95 bpm", "bpm140".
static BPM_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*bpm|bpm\s*(\d+)").unwrap());

/// Accepted range for a number tagged with "bpm".
const TAGGED_RANGE: (f64, f64) = (40.0, 250.0);
/// Accepted range for a bare number, which is a much weaker hint.
const BARE_RANGE: (f64, f64) = (60.0, 200.0);

/// Pull a tempo out of a clip's file name.
///
/// Looks for a number adjacent to "bpm" first (`_` and `-` count as spaces),
/// then for any standalone numeric token that looks like a tempo.
///
/// Examples:
/// - `groove_128bpm_fill.mid` → 128
/// - `loop-95-bpm.wav` → 95
/// - `Funk 100 take2.wav` → 100
/// - `drumhit.wav` → None
pub fn bpm_from_filename(file_name: &str) -> Option<f64> {
    let lower = file_name.to_lowercase();
    let stem = match lower.rfind('.') {
        Some(dot) if dot > 0 => &lower[..dot],
        _ => lower.as_str(),
    };
    let normalized = stem.replace(['_', '-'], " ");

    for caps in BPM_TOKEN_RE.captures_iter(&normalized) {
        let Some(digits) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        match digits.as_str().parse::<f64>() {
            Ok(bpm) if in_range(bpm, TAGGED_RANGE) => return Some(bpm),
            _ => {}
        }
    }

    normalized
        .split_whitespace()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|t| t.parse::<f64>().ok())
        .find(|&v| in_range(v, BARE_RANGE))
}

fn in_range(value: f64, (lo, hi): (f64, f64)) -> bool {
    value >= lo && value <= hi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_suffix() {
        assert_eq!(bpm_from_filename("groove_128bpm_fill.mid"), Some(128.0));
        assert_eq!(bpm_from_filename("Beat 140 BPM.wav"), Some(140.0));
    }

    #[test]
    fn test_bpm_separated_by_dashes() {
        assert_eq!(bpm_from_filename("loop-95-bpm.wav"), Some(95.0));
    }

    #[test]
    fn test_bpm_prefix() {
        assert_eq!(bpm_from_filename("bpm_85_shuffle.wav"), Some(85.0));
    }

    #[test]
    fn test_tagged_out_of_range_falls_back() {
        // 300 is rejected as a tagged tempo, 90 is accepted as a bare number.
        assert_eq!(bpm_from_filename("take_90_300bpm.wav"), Some(90.0));
        assert_eq!(bpm_from_filename("kick_300bpm.wav"), None);
    }

    #[test]
    fn test_bare_number() {
        assert_eq!(bpm_from_filename("Funk 100 take2.wav"), Some(100.0));
        assert_eq!(bpm_from_filename("take_2_of_45.wav"), None);
    }

    #[test]
    fn test_no_match() {
        assert_eq!(bpm_from_filename("drumhit.wav"), None);
        assert_eq!(bpm_from_filename(""), None);
    }
}
