//! Sentence boundary detection for streaming text
//!
//! Terminators are `. ? ! : ;` and their full-width forms `。？！：；`.
//! A terminator is not a boundary when it directly follows:
//! - a single uppercase letter ("U.S.A.")
//! - a digit ("1. Let's start")
//! - a digit, whitespace and `a`/`p` ("3:00 a.m.")
//! - `Mr`, `Ms`, `Dr`, `Mrs` or `Prof`
//!
//! The abbreviation rules win over real sentence ends, so "I met the Dr."
//! is never treated as finished.
//!
//! Offsets are in characters, not bytes.

const TERMINATORS: [char; 10] = ['.', '?', '!', ':', ';', '。', '？', '！', '：', '；'];

const ABBREVIATIONS: [&str; 5] = ["Mr", "Ms", "Dr", "Mrs", "Prof"];

/// Check if character terminates a sentence (before false-positive checks)
pub fn is_sentence_terminator(c: char) -> bool {
    TERMINATORS.contains(&c)
}

/// Offset just past the sentence terminator the text ends on, or 0
///
/// Trailing whitespace is ignored. Used to decide whether a streaming text
/// buffer is ready to flush.
pub fn match_end_of_sentence(text: &str) -> usize {
    let chars: Vec<char> = text.trim_end().chars().collect();
    match chars.last() {
        Some(&c) if is_sentence_terminator(c) && !is_suppressed(&chars, chars.len() - 1) => {
            chars.len()
        }
        _ => 0,
    }
}

/// Offsets just past every sentence terminator in the text, left to right
///
/// Returns an empty vector when there is no boundary.
pub fn find_sentence_ends(text: &str) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| is_sentence_terminator(c) && !is_suppressed(&chars, i))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Split text into complete sentences and the unfinished remainder
///
/// Sentences are trimmed. Punctuation-only pieces ("...", "?!") are merged
/// into the sentence before them. The remainder is returned untrimmed so
/// streamed chunks can keep appending to it.
pub fn split_sentences(text: &str) -> (Vec<&str>, &str) {
    let ends = find_sentence_ends(text);
    if ends.is_empty() {
        return (Vec::new(), text);
    }

    // Byte position of every char boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut ranges: Vec<(usize, usize)> = Vec::with_capacity(ends.len());
    let mut start = 0;
    for end in ends.into_iter().map(|e| boundaries[e]) {
        let has_words = text[start..end].chars().any(char::is_alphanumeric);
        match ranges.last_mut() {
            Some(last) if !has_words => last.1 = end,
            _ => ranges.push((start, end)),
        }
        start = end;
    }

    let sentences = ranges
        .into_iter()
        .map(|(s, e)| text[s..e].trim())
        .filter(|s| !s.is_empty())
        .collect();

    (sentences, &text[start..])
}

/// Whether the terminator at `index` is a known false positive
fn is_suppressed(chars: &[char], index: usize) -> bool {
    let before = &chars[..index];

    match before.last() {
        None => return false,
        Some(&c) if c.is_ascii_uppercase() || is_decimal_digit(c) => return true,
        Some(_) => {}
    }

    if let [.., digit, space, ap] = before {
        if is_decimal_digit(*digit) && space.is_whitespace() && matches!(ap, 'a' | 'p') {
            return true;
        }
    }

    ABBREVIATIONS.iter().any(|abbr| ends_with(before, abbr))
}

/// Zero of each decimal digit run recognized besides ASCII: Arabic-Indic,
/// the Indic scripts, Thai, Lao, Tibetan, Myanmar, Khmer, Mongolian and
/// full-width forms
const DIGIT_ZEROS: &[u32] = &[
    0x0660, 0x06F0, 0x0966, 0x09E6, 0x0A66, 0x0AE6, 0x0B66, 0x0BE6, 0x0C66, 0x0CE6, 0x0D66,
    0x0E50, 0x0ED0, 0x0F20, 0x1040, 0x17E0, 0x1810, 0xFF10,
];

/// Decimal digit in a positional script; superscripts, fractions and
/// numeral letters such as `²` or `Ⅷ` are not digits
fn is_decimal_digit(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_digit();
    }
    let code = c as u32;
    DIGIT_ZEROS.iter().any(|&zero| (zero..zero + 10).contains(&code))
}

fn ends_with(chars: &[char], suffix: &str) -> bool {
    let n = suffix.chars().count();
    chars.len() >= n && chars[chars.len() - n..].iter().copied().eq(suffix.chars())
}
