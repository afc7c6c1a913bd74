/*!
 * Japanese text segmentation utilities.
 *
 * Pure, stateless helpers that classify characters into scripts and pull the
 * characters worth annotating out of a record's source text.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<br\s*/?>|<[^>]*>").unwrap());

static WHITESPACE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Prolonged sound mark, shared by both kana scripts
const PROLONGED_SOUND_MARK: char = 'ー';

/// Script a character belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Hiragana,
    Katakana,
    Kanji,
    Other,
}

impl Script {
    pub fn is_kana(&self) -> bool {
        matches!(self, Script::Hiragana | Script::Katakana)
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Script::Hiragana => "hiragana",
            Script::Katakana => "katakana",
            Script::Kanji => "kanji",
            Script::Other => "other",
        };
        write!(f, "{}", name)
    }
}

pub fn is_hiragana(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309F}') || c == PROLONGED_SOUND_MARK
}

pub fn is_katakana(c: char) -> bool {
    matches!(c, '\u{30A0}'..='\u{30FF}')
}

pub fn is_kanji(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FAF}' | '\u{20000}'..='\u{2A6DF}')
}

pub fn is_japanese_char(c: char) -> bool {
    is_hiragana(c) || is_katakana(c) || is_kanji(c)
}

/// Classify a character; hiragana wins for the prolonged sound mark
pub fn classify(c: char) -> Script {
    if is_hiragana(c) {
        Script::Hiragana
    } else if is_katakana(c) {
        Script::Katakana
    } else if is_kanji(c) {
        Script::Kanji
    } else {
        Script::Other
    }
}

/// Unique Japanese characters of `text`, in order of first appearance
pub fn extract_unique_japanese_chars(text: &str) -> Vec<char> {
    let mut seen = HashSet::new();
    text.chars()
        .filter(|c| is_japanese_char(*c) && !c.is_whitespace())
        .filter(|c| seen.insert(*c))
        .collect()
}

/// Characters of a text grouped by script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterCategories {
    pub hiragana: Vec<char>,
    pub katakana: Vec<char>,
    pub kanji: Vec<char>,
}

impl CharacterCategories {
    pub fn total(&self) -> usize {
        self.hiragana.len() + self.katakana.len() + self.kanji.len()
    }
}

pub fn categorize_characters(text: &str) -> CharacterCategories {
    let mut categories = CharacterCategories::default();
    for c in extract_unique_japanese_chars(text) {
        match classify(c) {
            Script::Hiragana => categories.hiragana.push(c),
            Script::Katakana => categories.katakana.push(c),
            Script::Kanji => categories.kanji.push(c),
            Script::Other => {}
        }
    }
    categories
}

pub fn has_japanese_content(text: &str) -> bool {
    text.chars().any(is_japanese_char)
}

/// Trim and collapse runs of whitespace into single spaces
pub fn clean_text(text: &str) -> String {
    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

/// Flatten an HTML field value into a single line of plain text
pub fn html_to_text(html: &str) -> String {
    let without_tags = TAG_REGEX.replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    clean_text(&decoded)
}
