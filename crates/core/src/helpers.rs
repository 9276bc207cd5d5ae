//! Helper functions for text normalization.

use regex::Regex;
use std::sync::LazyLock;

static HORIZONTAL_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\x{00A0}]+").unwrap());
static SPACE_AROUND_NEWLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" *\n *").unwrap());
static SPACE_BEFORE_POINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +([.,])").unwrap());
static PUNCTUATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,;:!?…"«»¿¡()]+"#).unwrap());
static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Clean text by normalizing line endings and trimming trailing whitespace.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim_end()
        .to_string()
}

/// Split a corpus file into conversations (blank-line separated paragraphs).
pub fn split_paragraphs(text: &str) -> Vec<String> {
    PARAGRAPH_BREAK_RE
        .split(&clean_text(text))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Collapse horizontal whitespace, drop spaces around newlines and trim.
pub fn collapse_whitespace(text: &str) -> String {
    let s = HORIZONTAL_SPACE_RE.replace_all(text, " ");
    let s = SPACE_AROUND_NEWLINE_RE.replace_all(&s, "\n");
    s.trim().to_string()
}

/// Glue `.` and `,` to the preceding word.
///
/// Spacing before `?`, `!`, `:` and `;` is left alone (French typography).
pub fn attach_points(text: &str) -> String {
    SPACE_BEFORE_POINT_RE.replace_all(text, "$1").into_owned()
}

/// Whitespace and punctuation tidying applied to every turn at every level.
pub fn tidy_content(text: &str) -> String {
    attach_points(&collapse_whitespace(text))
}

/// Remove punctuation, keeping apostrophes and hyphens inside words.
pub fn strip_punctuation(text: &str) -> String {
    collapse_whitespace(&PUNCTUATION_RE.replace_all(text, " "))
}

/// Capitalize every part of a name.
///
/// Parts are separated by spaces, hyphens and apostrophes. Short all-caps
/// parts (`JR`, `M.`) are kept as they are.
pub fn capitalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut part = String::new();
    for ch in text.chars() {
        if matches!(ch, ' ' | '-' | '\'' | '’') {
            out.push_str(&capitalize_part(&part));
            part.clear();
            out.push(ch);
        } else {
            part.push(ch);
        }
    }
    out.push_str(&capitalize_part(&part));
    out
}

fn capitalize_part(part: &str) -> String {
    if part.chars().count() <= 2 && !part.chars().any(char::is_lowercase) {
        return part.to_string();
    }
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Whether the text carries any lexical content.
pub fn has_words(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("hello\r\nworld\r"), "hello\nworld");
        assert_eq!(clean_text("test  \n  "), "test");
    }

    #[test]
    fn test_split_paragraphs() {
        let text = "[speaker001:] a\n[speaker002:] b\n\n\n[speaker001:] c\r\n  \r\nlast\n";
        assert_eq!(
            split_paragraphs(text),
            vec!["[speaker001:] a\n[speaker002:] b", "[speaker001:] c", "last"]
        );
        assert!(split_paragraphs("\n\n").is_empty());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(
            capitalize("jean Jean JEAN JR jean-claude Jean-Claude d'estaing D'Estaing"),
            "Jean Jean Jean JR Jean-Claude Jean-Claude D'Estaing D'Estaing"
        );
        assert_eq!(capitalize("m. hide"), "M. Hide");
        assert_eq!(capitalize("Dr. Docteur JR"), "Dr. Docteur JR");
    }

    #[test]
    fn test_tidy_content() {
        assert_eq!(tidy_content("rire  . Je chante  ?"), "rire. Je chante ?");
        assert_eq!(tidy_content(" bruit , je \n  suis "), "bruit, je\nsuis");
        assert_eq!(tidy_content("pas ?..."), "pas ?...");
    }

    #[test]
    fn test_strip_punctuation() {
        assert_eq!(
            strip_punctuation("Tu me fais rire. Je chante ? Jean-Paul l'a dit!"),
            "Tu me fais rire Je chante Jean-Paul l'a dit"
        );
        assert_eq!(strip_punctuation("..."), "");
    }

    #[test]
    fn test_has_words() {
        assert!(has_words("ça"));
        assert!(!has_words(" ?... "));
    }
}
