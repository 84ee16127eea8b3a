//! Name Resolution
//!
//! Matches what a user typed ("cssr", "vn-cssr", "Ha") against the metric
//! or entity names actually present. Each level is tried in order and the
//! result says which level hit, so callers never get a silent best guess.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Case-insensitive equality.
    Exact,
    /// Equal after uppercasing and dropping non-alphanumerics.
    Normalized,
    Prefix,
    /// Either string contains the other.
    Contains,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Normalized => "normalized",
            MatchKind::Prefix => "prefix",
            MatchKind::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Matched { kind: MatchKind, name: String },
    Ambiguous { kind: MatchKind, candidates: Vec<String> },
    NoMatch,
}

impl Resolution {
    pub fn name(&self) -> Option<&str> {
        match self {
            Resolution::Matched { name, .. } => Some(name),
            _ => None,
        }
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn resolve<S: AsRef<str>>(input: &str, candidates: &[S]) -> Resolution {
    let input = input.trim();
    if input.is_empty() {
        return Resolution::NoMatch;
    }
    let upper = input.to_uppercase();
    let norm = normalize(input);
    let names: Vec<&str> = candidates.iter().map(|c| c.as_ref()).collect();

    // a case-insensitive exact hit is taken even if the list has case variants
    if let Some(name) = names.iter().find(|n| n.to_uppercase() == upper) {
        return matched(MatchKind::Exact, name);
    }

    let normalized = collect(&names, |n| !norm.is_empty() && normalize(n) == norm);
    if let Some(resolution) = settle(MatchKind::Normalized, normalized, true) {
        return resolution;
    }

    let prefixed = collect(&names, |n| n.to_uppercase().starts_with(&upper));
    if let Some(resolution) = settle(MatchKind::Prefix, prefixed, false) {
        return resolution;
    }

    let containing = collect(&names, |n| {
        let n = n.to_uppercase();
        n.contains(&upper) || upper.contains(&n)
    });
    settle(MatchKind::Contains, containing, true).unwrap_or(Resolution::NoMatch)
}

fn collect<'a>(names: &[&'a str], pred: impl Fn(&str) -> bool) -> Vec<&'a str> {
    names.iter().copied().filter(|n| pred(*n)).collect()
}

/// `None` means fall through to the next level.
fn settle(kind: MatchKind, hits: Vec<&str>, ambiguity_is_final: bool) -> Option<Resolution> {
    match hits.as_slice() {
        [] => None,
        [only] => Some(matched(kind, only)),
        _ if ambiguity_is_final => Some(Resolution::Ambiguous {
            kind,
            candidates: hits.iter().map(|s| s.to_string()).collect(),
        }),
        _ => None,
    }
}

fn matched(kind: MatchKind, name: &str) -> Resolution {
    Resolution::Matched {
        kind,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METRICS: &[&str] = &[
        "CSSR",
        "CSSR_Giamtru",
        "VN_CSSR",
        "CDR",
        "CDR_GiamTru",
        "ERAB_SR_2022",
        "HOSR_4G_2024",
    ];

    #[test]
    fn test_exact_is_case_insensitive() {
        assert_eq!(
            resolve("cssr", METRICS),
            Resolution::Matched {
                kind: MatchKind::Exact,
                name: "CSSR".to_string()
            }
        );
    }

    #[test]
    fn test_normalized_ignores_separators() {
        let resolution = resolve("vn-cssr", METRICS);
        assert_eq!(resolution.name(), Some("VN_CSSR"));
        assert!(matches!(
            resolution,
            Resolution::Matched {
                kind: MatchKind::Normalized,
                ..
            }
        ));
    }

    #[test]
    fn test_unique_prefix() {
        assert_eq!(
            resolve("hosr", METRICS),
            Resolution::Matched {
                kind: MatchKind::Prefix,
                name: "HOSR_4G_2024".to_string()
            }
        );
    }

    #[test]
    fn test_ambiguous_prefix_falls_through_to_contains() {
        // CDR and CDR_GiamTru both start with "CD"
        match resolve("cd", METRICS) {
            Resolution::Ambiguous { kind, candidates } => {
                assert_eq!(kind, MatchKind::Contains);
                assert_eq!(candidates, vec!["CDR", "CDR_GiamTru"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_contains_either_direction() {
        assert_eq!(resolve("4G", METRICS).name(), Some("HOSR_4G_2024"));
        // input longer than the candidate
        assert_eq!(resolve("ERAB_SR_2022_daily", METRICS).name(), Some("ERAB_SR_2022"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(resolve("throughput", METRICS), Resolution::NoMatch);
        assert_eq!(resolve("   ", METRICS), Resolution::NoMatch);
    }

    #[test]
    fn test_entities_with_owned_candidates() {
        let entities = vec!["Ha Noi".to_string(), "Ha Giang".to_string(), "Da Nang".to_string()];
        assert_eq!(resolve("hanoi", &entities).name(), Some("Ha Noi"));
        assert!(matches!(
            resolve("ha", &entities),
            Resolution::Ambiguous {
                kind: MatchKind::Contains,
                ..
            }
        ));
    }
}
