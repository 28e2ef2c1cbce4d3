use once_cell::sync::Lazy;
use regex::Regex;

static BREAK_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*(?:br|/?p)\b[^>]*>").expect("valid break regex"));
static ANY_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
static CREDIT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:translator|editor)s?\s*:").expect("valid credit regex"));

/// Windows-1252 glyphs for bytes 0x80..=0x9F. Undefined slots keep their
/// Latin-1 control code point, matching how lenient decoders misread them.
const CP1252_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž', '\u{8f}',
    '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9d}', 'ž', 'Ÿ',
];

/// Turns crawler HTML into plain paragraphs, drops translator/editor credits
/// and repairs UTF-8 text that was decoded as Windows-1252.
pub fn strip_html(raw: &str) -> String {
    let with_breaks = BREAK_TAG_RE.replace_all(raw, "\n\n");
    let untagged = ANY_TAG_RE.replace_all(&with_breaks, "");
    let text = unescape_entities(&untagged);

    let kept = text
        .lines()
        .filter(|line| !CREDIT_LINE_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n");
    fix_mojibake(&kept)
}

/// Decodes named (the full HTML5 table) and numeric character references.
/// Unknown names are left as written.
pub fn unescape_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Undoes the classic "â€™" corruption: each run of Windows-1252 characters
/// that re-encodes to one valid UTF-8 sequence is replaced by that character.
pub fn fix_mojibake(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    while idx < chars.len() {
        match decode_misread(&chars[idx..]) {
            Some((repaired, used)) => {
                out.push(repaired);
                idx += used;
            }
            None => {
                out.push(chars[idx]);
                idx += 1;
            }
        }
    }
    out
}

fn decode_misread(chars: &[char]) -> Option<(char, usize)> {
    let lead = cp1252_byte(*chars.first()?)?;
    let width = match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let bytes = chars
        .get(..width)?
        .iter()
        .map(|c| cp1252_byte(*c))
        .collect::<Option<Vec<u8>>>()?;
    let decoded = std::str::from_utf8(&bytes).ok()?;
    decoded.chars().next().map(|c| (c, width))
}

fn cp1252_byte(c: char) -> Option<u8> {
    match c as u32 {
        code @ 0xA0..=0xFF => Some(code as u8),
        _ => CP1252_HIGH
            .iter()
            .position(|&high| high == c)
            .map(|pos| 0x80 + pos as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_decode_named_and_numeric() {
        assert_eq!(
            unescape_entities("Tom &amp; Jerry &#8212; &#x41; &unknown;"),
            "Tom & Jerry — A &unknown;"
        );
    }

    #[test]
    fn accented_and_symbol_entities_decode() {
        let cleaned = strip_html("<p>Caf&eacute; &copy; 2020 &mdash; na&iuml;ve</p>");
        assert_eq!(cleaned, "\n\nCafé © 2020 — naïve\n\n");
    }

    #[test]
    fn escaped_markup_is_not_treated_as_tags() {
        assert_eq!(strip_html("a &lt;b&gt; c"), "a <b> c");
    }

    #[test]
    fn credit_lines_are_removed() {
        let cleaned = strip_html("Line one\nTranslator: Foo\nEditors : Bar\nLine two");
        assert_eq!(cleaned, "Line one\nLine two");
    }

    #[test]
    fn paragraph_and_break_tags_become_blank_lines() {
        let cleaned = strip_html("<P class=\"x\">One</P><br/>Two<span>!</span>");
        assert_eq!(cleaned, "\n\nOne\n\n\n\nTwo!");
    }

    #[test]
    fn windows_1252_mojibake_is_repaired() {
        assert_eq!(
            fix_mojibake("Itâ€™s a â€œtestâ€\u{9d} â€” cafÃ©"),
            "It’s a “test” — café"
        );
        assert_eq!(strip_html("<p>Donâ€™t</p>"), "\n\nDon’t\n\n");
    }

    #[test]
    fn clean_latin1_text_is_untouched() {
        let text = "Café © naïve — “quoted” é.";
        assert_eq!(fix_mojibake(text), text);
    }
}
