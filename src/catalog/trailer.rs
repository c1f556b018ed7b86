use crate::models::VideoCandidate;

type Rule = fn(&VideoCandidate) -> bool;

/// Ordered preferences; the first rule with a match decides.
const RULES: [Rule; 3] = [
    |v: &VideoCandidate| v.kind == "Trailer" && v.site == "YouTube" && v.official,
    |v: &VideoCandidate| v.kind == "Trailer" && v.site == "YouTube",
    |v: &VideoCandidate| v.kind == "Teaser" && v.site == "YouTube",
];

/// Picks the trailer key for a movie, or `None` if no candidate qualifies.
pub fn select_trailer(candidates: &[VideoCandidate]) -> Option<&VideoCandidate> {
    RULES
        .iter()
        .find_map(|rule| candidates.iter().find(|candidate| rule(*candidate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(key: &str, kind: &str, site: &str, official: bool) -> VideoCandidate {
        VideoCandidate {
            key: key.to_string(),
            site: site.to_string(),
            kind: kind.to_string(),
            official,
        }
    }

    #[test]
    fn official_trailer_beats_earlier_unofficial_one() {
        let videos = vec![
            video("teaser", "Teaser", "YouTube", true),
            video("fan", "Trailer", "YouTube", false),
            video("official", "Trailer", "YouTube", true),
        ];
        assert_eq!(select_trailer(&videos).unwrap().key, "official");
    }

    #[test]
    fn falls_back_to_any_trailer_then_teaser() {
        let videos = vec![
            video("teaser", "Teaser", "YouTube", false),
            video("fan", "Trailer", "YouTube", false),
        ];
        assert_eq!(select_trailer(&videos).unwrap().key, "fan");

        let teasers = vec![
            video("clip", "Clip", "YouTube", true),
            video("teaser", "Teaser", "YouTube", false),
        ];
        assert_eq!(select_trailer(&teasers).unwrap().key, "teaser");
    }

    #[test]
    fn ignores_other_sites_and_kinds() {
        let videos = vec![
            video("vimeo", "Trailer", "Vimeo", true),
            video("featurette", "Featurette", "YouTube", true),
        ];
        assert!(select_trailer(&videos).is_none());
        assert!(select_trailer(&[]).is_none());
    }
}
