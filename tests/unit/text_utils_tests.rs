/*!
 * Tests for Japanese text utilities
 */

use kanjigloss::text_utils::{
    categorize_characters, classify, clean_text, extract_unique_japanese_chars, has_japanese_content,
    html_to_text, is_kanji, Script,
};

#[test]
fn test_classify_withEachScript_shouldReturnMatchingScript() {
    assert_eq!(classify('あ'), Script::Hiragana);
    assert_eq!(classify('カ'), Script::Katakana);
    assert_eq!(classify('日'), Script::Kanji);
    assert_eq!(classify('a'), Script::Other);
    assert_eq!(classify('。'), Script::Other);
}

#[test]
fn test_extract_unique_japanese_chars_withRepeats_shouldKeepFirstAppearanceOrder() {
    let chars = extract_unique_japanese_chars("日本の日本語 and カナ!");
    assert_eq!(chars, vec!['日', '本', 'の', '語', 'カ', 'ナ']);
}

#[test]
fn test_extract_unique_japanese_chars_withoutJapanese_shouldBeEmpty() {
    assert!(extract_unique_japanese_chars("hello, world 123").is_empty());
    assert!(!has_japanese_content("hello"));
    assert!(has_japanese_content("hello 世界"));
}

#[test]
fn test_categorize_characters_shouldGroupByScript() {
    let categories = categorize_characters("ひらがなカタカナ漢字");
    assert_eq!(categories.hiragana, vec!['ひ', 'ら', 'が', 'な']);
    assert_eq!(categories.katakana, vec!['カ', 'タ', 'ナ']);
    assert_eq!(categories.kanji, vec!['漢', '字']);
    assert_eq!(categories.total(), 9);
}

#[test]
fn test_is_kanji_withExtensionBCharacter_shouldBeTrue() {
    assert!(is_kanji('\u{20B9F}'));
    assert!(!is_kanji('ア'));
}

#[test]
fn test_clean_text_shouldTrimAndCollapseWhitespace() {
    assert_eq!(clean_text("  日本\t\n 語  "), "日本 語");
    assert_eq!(clean_text(""), "");
}

#[test]
fn test_html_to_text_withTagsAndEntities_shouldFlatten() {
    assert_eq!(html_to_text("<div>日本<br/>語</div>"), "日本 語");
    assert_eq!(html_to_text("<b>A</b>&nbsp;&amp;&lt;b&gt;"), "A &<b>");
    assert_eq!(html_to_text("<p>   </p>"), "");
}
