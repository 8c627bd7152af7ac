use std::sync::OnceLock;

use regex::Regex;

/// Corpus language, used only for stop-word and numeric classification.
/// Tokenization itself happens upstream and is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Ja,
    /// No language-specific stop-word list; digit-bearing words are still
    /// treated as stop words.
    Other,
}

impl Language {
    pub fn from_code(code: &str) -> Self {
        match code {
            "en" => Language::En,
            "ja" => Language::Ja,
            _ => Language::Other,
        }
    }
}

const EN_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "be", "do", "not", "and", "or", "but", "no", "any", "some", "this", "these",
    "that", "those", "i", "my", "me", "mine", "you", "your", "yours", "we", "our", "us", "ours",
    "he", "his", "him", "she", "her", "hers", "it", "its", "they", "them", "their",
];

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-0-9.]+$").unwrap())
}

fn digit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]").unwrap())
}

fn ja_hiragana_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\p{Hiragana}ー]+$").unwrap())
}

fn ja_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[年月日]*$").unwrap())
}

fn ja_latin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\p{Latin}").unwrap())
}

/// A word made only of digits, dots and hyphens (numbers, dates, versions).
pub fn is_numeric_word(word: &str) -> bool {
    !word.is_empty() && numeric_re().is_match(word)
}

/// Stop words get a fixed down-weighting multiplier in scoring. Any word
/// containing a digit is a stop word regardless of language.
pub fn is_stop_word(language: Language, word: &str) -> bool {
    if digit_re().is_match(word) {
        return true;
    }
    match language {
        Language::En => EN_STOP_WORDS.contains(&word),
        Language::Ja => {
            ja_hiragana_re().is_match(word)
                || ja_date_re().is_match(word)
                || ja_latin_re().is_match(word)
        }
        Language::Other => false,
    }
}

/// The down-weighting multiplier for a word: numeric words are penalized
/// harder than stop words, everything else is neutral.
pub fn word_weight(
    language: Language,
    word: &str,
    numeric_word_weight: f64,
    stop_word_weight: f64,
) -> f64 {
    if is_numeric_word(word) {
        numeric_word_weight
    } else if is_stop_word(language, word) {
        stop_word_weight
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_words() {
        assert!(is_numeric_word("1984"));
        assert!(is_numeric_word("-3.14"));
        assert!(is_numeric_word("12-31"));
        assert!(!is_numeric_word("3rd"));
        assert!(!is_numeric_word("pi"));
        assert!(!is_numeric_word(""));
    }

    #[test]
    fn english_stop_words() {
        assert!(is_stop_word(Language::En, "the"));
        assert!(is_stop_word(Language::En, "their"));
        assert!(!is_stop_word(Language::En, "cat"));
        // digit-bearing words are stop words in every language
        assert!(is_stop_word(Language::Other, "b52"));
    }

    #[test]
    fn japanese_stop_words() {
        assert!(is_stop_word(Language::Ja, "これ"));
        assert!(is_stop_word(Language::Ja, "年月"));
        assert!(is_stop_word(Language::Ja, "word"));
        assert!(!is_stop_word(Language::Ja, "辞書"));
    }

    #[test]
    fn weights() {
        assert_eq!(word_weight(Language::En, "1984", 0.2, 0.5), 0.2);
        assert_eq!(word_weight(Language::En, "the", 0.2, 0.5), 0.5);
        assert_eq!(word_weight(Language::En, "cat", 0.2, 0.5), 1.0);
    }
}
