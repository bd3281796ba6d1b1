//! Script-based language detection
//!
//! Each regional language owns one disjoint Unicode block. Languages are
//! checked in the fixed order of `SCRIPT_RANGES`; the first language with at
//! least one character in its block wins. Text with no regional characters is
//! tagged with the base language.
//!
//! Marathi, Nepali and Hindi share Devanagari and are all tagged `Hindi`;
//! Assamese shares the Bengali block and is tagged `Bengali`.

use crate::models::LanguageTag;

/// Detection order. Do not reorder: ties resolve to the earliest entry.
const SCRIPT_RANGES: &[(LanguageTag, char, char)] = &[
    (LanguageTag::Hindi, '\u{0900}', '\u{097F}'),     // Devanagari
    (LanguageTag::Bengali, '\u{0980}', '\u{09FF}'),   // Bengali
    (LanguageTag::Punjabi, '\u{0A00}', '\u{0A7F}'),   // Gurmukhi
    (LanguageTag::Gujarati, '\u{0A80}', '\u{0AFF}'),  // Gujarati
    (LanguageTag::Odia, '\u{0B00}', '\u{0B7F}'),      // Oriya
    (LanguageTag::Tamil, '\u{0B80}', '\u{0BFF}'),     // Tamil
    (LanguageTag::Telugu, '\u{0C00}', '\u{0C7F}'),    // Telugu
    (LanguageTag::Kannada, '\u{0C80}', '\u{0CFF}'),   // Kannada
    (LanguageTag::Malayalam, '\u{0D00}', '\u{0D7F}'), // Malayalam
];

pub struct LanguageDetector;

impl LanguageDetector {
    /// Total and deterministic: always returns a tag.
    pub fn detect(text: &str) -> LanguageTag {
        SCRIPT_RANGES
            .iter()
            .find(|(_, start, end)| text.chars().any(|c| (*start..=*end).contains(&c)))
            .map(|(tag, _, _)| *tag)
            .unwrap_or(LanguageTag::BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_text_is_base_language() {
        for text in ["what is my budget?", "", "   ", "₹5000 for groceries", "12345"] {
            assert_eq!(LanguageDetector::detect(text), LanguageTag::English);
        }
    }

    #[test]
    fn test_regional_scripts() {
        let cases = [
            ("मुद्रा योजना क्या है", LanguageTag::Hindi),
            ("আমার বাজেট কত", LanguageTag::Bengali),
            ("ਮੇਰਾ ਬਜਟ", LanguageTag::Punjabi),
            ("મારું બજેટ", LanguageTag::Gujarati),
            ("ମୋର ବଜେଟ", LanguageTag::Odia),
            ("என் பட்ஜெட்", LanguageTag::Tamil),
            ("నా బడ్జెట్", LanguageTag::Telugu),
            ("ನನ್ನ ಬಜೆಟ್", LanguageTag::Kannada),
            ("എന്റെ ബജറ്റ്", LanguageTag::Malayalam),
        ];

        for (text, expected) in cases {
            assert_eq!(LanguageDetector::detect(text), expected, "{}", text);
        }
    }

    #[test]
    fn test_mixed_script_resolves_by_fixed_order() {
        // Tamil appears first in the text, but Hindi is earlier in detection order
        let mixed = "பட்ஜெட் and बजट";
        assert_eq!(LanguageDetector::detect(mixed), LanguageTag::Hindi);
        assert_eq!(LanguageDetector::detect(mixed), LanguageDetector::detect(mixed));

        let code_mixed = "mera budget ₹5000 hai, योजना batao";
        assert_eq!(LanguageDetector::detect(code_mixed), LanguageTag::Hindi);
    }

    #[test]
    fn test_ranges_are_disjoint() {
        for (i, (_, a_start, a_end)) in SCRIPT_RANGES.iter().enumerate() {
            for (_, b_start, b_end) in SCRIPT_RANGES.iter().skip(i + 1) {
                assert!(a_end < b_start || b_end < a_start);
            }
        }
        assert!(SCRIPT_RANGES.iter().all(|(tag, _, _)| !tag.is_base()));
    }
}
