//! Language catalog: the static table of languages a project may use.
//!
//! Projects and users store language sets as `|`-joined codes (`"eng|zho"`).
//! This module resolves those codes against the catalog and converts between
//! the stored form and `Language` values.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Serialize;

/// Separator used in stored language lists. Never part of a valid code.
pub const DELIM: char = '|';

/// A catalog entry.
///
/// `Language::default()` is the zero-value placeholder produced for unknown
/// codes; it never validates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Language {
    pub id: u32,
    /// ISO 639-3 code, the identity of the language (e.g. "eng").
    pub code: &'static str,
    /// BCP 47 tag (e.g. "en").
    pub iso: &'static str,
    /// English display name.
    pub name: &'static str,
}

impl Language {
    const fn new(id: u32, code: &'static str, iso: &'static str, name: &'static str) -> Self {
        Self {
            id,
            code,
            iso,
            name,
        }
    }
}

const LANGUAGES: &[Language] = &[
    Language::new(1, "eng", "en", "English"),
    Language::new(2, "zho", "zh", "Chinese"),
    Language::new(3, "fra", "fr", "French"),
    Language::new(4, "deu", "de", "German"),
    Language::new(5, "spa", "es", "Spanish"),
    Language::new(6, "por", "pt", "Portuguese"),
    Language::new(7, "ita", "it", "Italian"),
    Language::new(8, "rus", "ru", "Russian"),
    Language::new(9, "jpn", "ja", "Japanese"),
    Language::new(10, "kor", "ko", "Korean"),
    Language::new(11, "ara", "ar", "Arabic"),
    Language::new(12, "hin", "hi", "Hindi"),
    Language::new(13, "nld", "nl", "Dutch"),
    Language::new(14, "pol", "pl", "Polish"),
    Language::new(15, "tur", "tr", "Turkish"),
    Language::new(16, "vie", "vi", "Vietnamese"),
    Language::new(17, "tha", "th", "Thai"),
    Language::new(18, "ind", "id", "Indonesian"),
    Language::new(19, "swe", "sv", "Swedish"),
    Language::new(20, "ukr", "uk", "Ukrainian"),
    Language::new(21, "ces", "cs", "Czech"),
    Language::new(22, "ell", "el", "Greek"),
    Language::new(23, "heb", "he", "Hebrew"),
    Language::new(24, "fin", "fi", "Finnish"),
];

struct Catalog {
    by_code: HashMap<&'static str, &'static Language>,
    by_id: HashMap<u32, &'static Language>,
}

static CATALOG: OnceLock<Catalog> = OnceLock::new();

fn catalog() -> &'static Catalog {
    CATALOG.get_or_init(|| Catalog {
        by_code: LANGUAGES.iter().map(|l| (l.code, l)).collect(),
        by_id: LANGUAGES.iter().map(|l| (l.id, l)).collect(),
    })
}

/// Every supported language, in catalog order.
pub fn all() -> &'static [Language] {
    LANGUAGES
}

pub fn resolve_by_code(code: &str) -> Option<&'static Language> {
    catalog().by_code.get(code).copied()
}

pub fn resolve_by_id(id: u32) -> Option<&'static Language> {
    catalog().by_id.get(&id).copied()
}

pub fn validate_one(lang: &Language) -> bool {
    resolve_by_code(lang.code).is_some()
}

pub fn validate_all(langs: &[Language]) -> bool {
    langs.iter().all(validate_one)
}

/// Decodes a stored list such as `"eng|zho"`.
///
/// Unknown codes are logged and replaced by `Language::default()` so the
/// result stays aligned with the input; callers that need a clean set must
/// run [`validate_all`] on the result.
pub fn parse_list(s: &str) -> Vec<Language> {
    if s.is_empty() {
        return Vec::new();
    }

    s.split(DELIM)
        .map(|code| match resolve_by_code(code) {
            Some(lang) => *lang,
            None => {
                tracing::warn!(code, "unknown language");
                Language::default()
            }
        })
        .collect()
}

pub fn format_list(langs: &[Language]) -> String {
    langs
        .iter()
        .map(|l| l.code)
        .collect::<Vec<_>>()
        .join(&DELIM.to_string())
}
