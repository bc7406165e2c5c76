//! Sentence segmentation.
//!
//! A boundary is a run of terminal punctuation, optionally followed by
//! closing quotes or brackets, then whitespace, then something that can open
//! a sentence. Abbreviations and single-letter initials never end a sentence.
//! Letter-case checks use Unicode properties, so Cyrillic text splits the same
//! way Latin text does.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

const TERMINALS: &[char] = &['.', '!', '?', '…'];
const CLOSERS: &[char] = &['"', '\'', '”', '’', '»', ')', ']'];
const OPENERS: &[char] = &['"', '\'', '“', '‘', '«', '(', '[', '-', '–', '—'];

/// Lowercased forms, without the trailing period.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "e.g", "i.e", "cf", "fig", "vol",
    "approx", "dept", "inc", "ltd", "co", "corp", "jan", "feb", "mar", "apr", "jun", "jul",
    "aug", "sep", "sept", "oct", "nov", "dec", "т.е", "т.д", "т.п", "т.к", "др", "им", "стр",
    "рис", "см", "напр",
];

/// Collapse every whitespace run (newlines included) to one space and trim.
pub fn normalize_whitespace(raw: &str) -> String {
    WHITESPACE_RUN.replace_all(raw, " ").trim().to_string()
}

/// Split raw text into sentence-like units.
///
/// Whitespace is normalized first. Returns an empty vector for blank input.
pub fn split_sentences(raw: &str) -> Vec<String> {
    let text = normalize_whitespace(raw);
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if !TERMINALS.contains(&chars[i]) {
            i += 1;
            continue;
        }

        let terminal_start = i;
        while i < chars.len() && TERMINALS.contains(&chars[i]) {
            i += 1;
        }
        let single_period = i - terminal_start == 1 && chars[terminal_start] == '.';
        while i < chars.len() && CLOSERS.contains(&chars[i]) {
            i += 1;
        }

        let boundary = i;
        if boundary == chars.len() {
            break;
        }
        if chars[boundary] != ' ' {
            continue;
        }
        let next = boundary + 1;
        if next >= chars.len() || !opens_sentence(chars[next]) {
            continue;
        }
        if single_period && ends_with_abbreviation(&chars[start..terminal_start]) {
            continue;
        }

        push_sentence(&mut sentences, &chars[start..boundary]);
        start = next;
        i = next;
    }

    if start < chars.len() {
        push_sentence(&mut sentences, &chars[start..]);
    }

    sentences
}

/// Lowercased word tokens, apostrophes kept so contractions stay whole.
pub fn tokenize(sentence: &str) -> Vec<String> {
    sentence
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '’'))
        .filter(|token| !token.is_empty())
        .map(|token| token.trim_matches(|c| c == '\'' || c == '’').to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn push_sentence(sentences: &mut Vec<String>, chars: &[char]) {
    let sentence: String = chars.iter().collect();
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
}

fn opens_sentence(c: char) -> bool {
    c.is_uppercase() || c.is_numeric() || OPENERS.contains(&c)
}

/// Whether the word right before a period is an abbreviation or an initial.
fn ends_with_abbreviation(preceding: &[char]) -> bool {
    let word_start = preceding
        .iter()
        .rposition(|c| c.is_whitespace() || OPENERS.contains(c))
        .map_or(0, |pos| pos + 1);
    let word: String = preceding[word_start..].iter().collect();
    let word = word.to_lowercase();

    let mut letters = word.chars();
    if let (Some(only), None) = (letters.next(), letters.next()) {
        return only.is_alphabetic();
    }
    ABBREVIATIONS.contains(&word.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_simple_sentences() {
        assert_eq!(
            split_sentences("I love this. I hate that."),
            vec!["I love this.", "I hate that."]
        );
    }

    #[test]
    fn test_whitespace_runs_are_collapsed_first() {
        assert_eq!(
            split_sentences("  First line\n\n  continues.\tSecond\r\nline!  "),
            vec!["First line continues.", "Second line!"]
        );
    }

    #[test]
    fn test_abbreviations_and_initials_do_not_split() {
        assert_eq!(
            split_sentences("Dr. Smith met J. R. Tolkien, e.g. on Monday. It went well."),
            vec!["Dr. Smith met J. R. Tolkien, e.g. on Monday.", "It went well."]
        );
    }

    #[test]
    fn test_lowercase_continuation_does_not_split() {
        assert_eq!(
            split_sentences("The value is 3.5 in total. done"),
            vec!["The value is 3.5 in total. done"]
        );
    }

    #[test]
    fn test_terminal_runs_and_closing_quotes() {
        assert_eq!(
            split_sentences("Really?! \"Yes.\" Then go… Now."),
            vec!["Really?!", "\"Yes.\"", "Then go…", "Now."]
        );
    }

    #[test]
    fn test_cyrillic_sentences() {
        assert_eq!(
            split_sentences("Мне нравится. Это плохо, т.е. ужасно. Всё."),
            vec!["Мне нравится.", "Это плохо, т.е. ужасно.", "Всё."]
        );
    }

    #[test]
    fn test_text_without_terminal_is_one_sentence() {
        assert_eq!(split_sentences("no punctuation here"), vec!["no punctuation here"]);
    }

    #[test]
    fn test_blank_input_yields_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences(" \n\t ").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_contractions() {
        assert_eq!(
            tokenize("I don't like it, 'really'."),
            vec!["i", "don't", "like", "it", "really"]
        );
    }

    proptest! {
        #[test]
        fn prop_sentences_are_trimmed_and_non_empty(text in "[a-zA-Z .!?\n]{0,200}") {
            for sentence in split_sentences(&text) {
                prop_assert!(!sentence.is_empty());
                prop_assert_eq!(sentence.trim(), sentence.as_str());
                prop_assert!(!sentence.contains("  "));
            }
        }

        #[test]
        fn prop_splitting_preserves_words(text in "[a-zA-Z .!?\n]{0,200}") {
            let joined = split_sentences(&text).join(" ");
            prop_assert_eq!(joined, normalize_whitespace(&text));
        }
    }
}
