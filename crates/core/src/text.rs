//! Word-level helpers shared by the writer, editor panel and segmenter.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?！？。]['\x22”’)\]]*\s+").expect("valid sentence regex"));
/// A lone capital initial ("J.") or "e.g."/"i.e." closing a candidate sentence.
static ABBREVIATION_TAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[\s(\["'“‘])(?:\p{Lu}|[eE]\.[gG]|[iI]\.[eE])\.$"#)
        .expect("valid abbreviation regex")
});

pub const DEFAULT_ENDING_WORDS: usize = 60;

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Output budget for a rewrite of `text`: words / 0.75 → tokens, plus 40%
/// headroom, truncated.
pub fn estimate_max_tokens(text: &str) -> u32 {
    let tokens = word_count(text).saturating_mul(28) / 15;
    u32::try_from(tokens).unwrap_or(u32::MAX).clamp(1024, 8192)
}

pub fn last_words(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(count);
    words[start..].join(" ")
}

pub fn truncate_to_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return text.to_string();
    }
    words[..limit].join(" ")
}

pub fn length_hint(source_words: usize) -> String {
    format!("Match the source length within ±10% (≈{source_words} words).")
}

/// Splits after terminal punctuation, except behind initials and e.g./i.e.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for found in SENTENCE_END_RE.find_iter(text) {
        let piece = text[start..found.end()].trim();
        if ABBREVIATION_TAIL_RE.is_match(piece) {
            continue;
        }
        if !piece.is_empty() {
            sentences.push(piece.to_string());
        }
        start = found.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

pub fn last_sentence(text: &str) -> String {
    split_sentences(text).pop().unwrap_or_default()
}

/// Jaccard overlap of lowercased word sets; two empty inputs count as identical.
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let left: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let right: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let union = left.union(&right).count() as f64;
    shared / union
}

/// Splits `text` into chunks of roughly `target` words. A chunk keeps growing
/// (at most `slack` extra words) until it ends on a sentence boundary.
pub fn chunk_words(text: &str, target: usize, slack: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let target = target.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let mut end = (start + target).min(words.len());
        let limit = (end + slack).min(words.len());
        while end < limit && !ends_sentence(words[end - 1]) {
            end += 1;
        }
        chunks.push(words[start..end].join(" "));
        start = end;
    }

    chunks
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', '”', '’', ')', ']'])
        .ends_with(['.', '!', '?', '！', '？', '。'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_tokens_are_clamped() {
        assert_eq!(estimate_max_tokens("one two three"), 1024);
        let long = "word ".repeat(6000);
        assert_eq!(estimate_max_tokens(&long), 8192);
        let mid = "word ".repeat(1500);
        assert_eq!(estimate_max_tokens(&mid), 2800);
        let thousand = "word ".repeat(1000);
        assert_eq!(estimate_max_tokens(&thousand), 1866);
    }

    #[test]
    fn last_words_takes_the_tail() {
        assert_eq!(last_words("a b c d e", 2), "d e");
        assert_eq!(last_words("a b", 10), "a b");
    }

    #[test]
    fn truncation_keeps_short_text_verbatim() {
        assert_eq!(truncate_to_words("keep  this", 5), "keep  this");
        assert_eq!(truncate_to_words("a b c d", 2), "a b");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let sentences = split_sentences("He ran. She said \"stop!\" Then silence？ End");
        assert_eq!(
            sentences,
            vec!["He ran.", "She said \"stop!\"", "Then silence？", "End"]
        );
        assert_eq!(last_sentence("One. Two three."), "Two three.");
    }

    #[test]
    fn initials_and_abbreviations_do_not_end_sentences() {
        assert_eq!(
            split_sentences("J. K. Rowling wrote books. She lived in Scotland."),
            vec!["J. K. Rowling wrote books.", "She lived in Scotland."]
        );
        assert_eq!(
            split_sentences("Bring tools, e.g. a saw. Or not, i.e. nothing. Fine."),
            vec!["Bring tools, e.g. a saw.", "Or not, i.e. nothing.", "Fine."]
        );
    }

    #[test]
    fn jaccard_measures_overlap() {
        assert_eq!(word_jaccard("", ""), 1.0);
        assert_eq!(word_jaccard("the door", "The door"), 1.0);
        assert!((word_jaccard("a b", "b c") - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn chunks_extend_to_sentence_end() {
        let text = "one two three. four five six seven. eight";
        let chunks = chunk_words(text, 2, 10);
        assert_eq!(chunks, vec!["one two three.", "four five six seven.", "eight"]);

        let capped = chunk_words("a b c d e f", 2, 1);
        assert_eq!(capped, vec!["a b c", "d e f"]);
    }

    #[test]
    fn length_hint_mentions_word_target() {
        assert!(length_hint(120).contains("≈120 words"));
    }
}
