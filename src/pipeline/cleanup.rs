//! Removal of non-speech annotations from transcript text.

use crate::models::SubtitleSegment;
use regex::Regex;
use std::sync::LazyLock;

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|<[^>]*>").expect("valid regex"));

static SOUND_PARENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[(*]\s*(?:music|music playing|laughs?|laughter|laughing|applause|noise|silence|inaudible|coughs?|coughing|sighs?|static|crosstalk|background noise|no speech)\s*[)*]",
    )
    .expect("valid regex")
});

static MUSIC_NOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[♪♫♩♬]+").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip non-speech markers and collapse whitespace.
pub fn strip_markers(text: &str) -> String {
    let text = BRACKETED.replace_all(text, " ");
    let text = SOUND_PARENS.replace_all(&text, " ");
    let text = MUSIC_NOTES.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Whether the text carries anything besides markers and punctuation.
pub fn has_content(text: &str) -> bool {
    strip_markers(text).chars().any(|c| c.is_alphanumeric())
}

/// Clean the original text of every segment and drop the ones left empty.
pub fn clean_transcript(segments: Vec<SubtitleSegment>) -> Vec<SubtitleSegment> {
    segments
        .into_iter()
        .filter_map(|mut segment| {
            segment.original_text = strip_markers(&segment.original_text);
            has_content(&segment.original_text).then_some(segment)
        })
        .collect()
}

/// Clean both texts; drop segments with no content in either.
pub fn clean_translated(segments: Vec<SubtitleSegment>) -> Vec<SubtitleSegment> {
    segments
        .into_iter()
        .filter_map(|mut segment| {
            segment.original_text = strip_markers(&segment.original_text);
            segment.translated_text = segment
                .translated_text
                .map(|t| strip_markers(&t))
                .filter(|t| has_content(t));

            let keep = has_content(&segment.original_text) || segment.translated_text.is_some();
            keep.then_some(segment)
        })
        .collect()
}
