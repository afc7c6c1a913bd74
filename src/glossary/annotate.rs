/*!
 * Per-record annotation.
 *
 * Annotation runs in two phases through the call pool: first the kana
 * readings and kanji lookups of the characters in the text, then the romaji
 * of every reading of the kanji that resolved.
 */

use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use crate::app_config::GeneralConfig;
use crate::text_utils::{classify, extract_unique_japanese_chars, Script};

use super::calls::{CallPool, CallResults};
use super::model::{
    AnnotationResult, CharacterAnnotation, KanjiInfo, KanjiReading, LookupKey, ReadingKind, RecordStatus,
};

/// Builds the `AnnotationResult` of one record's text
#[derive(Clone)]
pub struct Annotator {
    pool: CallPool,
    general: GeneralConfig,
}

impl Annotator {
    pub fn new(pool: CallPool, general: GeneralConfig) -> Self {
        Self { pool, general }
    }

    pub fn general(&self) -> &GeneralConfig {
        &self.general
    }

    fn wants(&self, script: Script) -> bool {
        match script {
            Script::Hiragana => self.general.include_hiragana,
            Script::Katakana => self.general.include_katakana,
            Script::Kanji => self.general.include_kanji,
            Script::Other => false,
        }
    }

    /// Keys needed for the characters of `text`, in order of first appearance
    pub fn character_keys(&self, text: &str) -> Vec<(char, Script, LookupKey)> {
        extract_unique_japanese_chars(text)
            .into_iter()
            .filter_map(|c| {
                let script = classify(c);
                if !self.wants(script) {
                    return None;
                }
                let key = if script.is_kana() {
                    LookupKey::reading(&c.to_string())
                } else {
                    LookupKey::meaning(c)
                };
                Some((c, script, key))
            })
            .collect()
    }

    /// Annotate plain text
    pub async fn annotate(&self, text: &str, cancel: &CancellationToken) -> AnnotationResult {
        let characters = self.character_keys(text);
        if characters.is_empty() {
            return AnnotationResult::empty();
        }

        let mut results = self
            .pool
            .run_all(characters.iter().map(|(_, _, key)| key.clone()).collect(), cancel)
            .await;

        if self.general.include_romaji && !cancel.is_cancelled() {
            let reading_keys = self.reading_keys(&characters, &results);
            if !reading_keys.is_empty() {
                let readings = self.pool.run_all(reading_keys, cancel).await;
                results.merge(readings);
            }
        }

        self.assemble(&characters, &results)
    }

    /// Romaji keys for the readings of resolved kanji not already resolved
    fn reading_keys(&self, characters: &[(char, Script, LookupKey)], results: &CallResults) -> Vec<LookupKey> {
        let mut seen = HashSet::new();
        characters
            .iter()
            .filter_map(|(_, _, key)| results.value(key).and_then(|v| v.kanji_info()))
            .flat_map(|info| info.kun_readings.iter().chain(info.on_readings.iter()))
            .map(|reading| LookupKey::reading(reading))
            .filter(|key| !key.text().is_empty() && !results.contains(key) && seen.insert(key.clone()))
            .collect()
    }

    fn kanji_readings(&self, info: &KanjiInfo, results: &CallResults) -> Vec<KanjiReading> {
        if !self.general.include_romaji {
            return Vec::new();
        }

        let kun = info.kun_readings.iter().map(|r| (r, ReadingKind::Kun));
        let on = info.on_readings.iter().map(|r| (r, ReadingKind::On));
        kun.chain(on)
            .map(|(reading, kind)| KanjiReading {
                reading: reading.clone(),
                kind,
                romaji: results
                    .value(&LookupKey::reading(reading))
                    .and_then(|v| v.romaji())
                    .map(str::to_string),
            })
            .collect()
    }

    fn assemble(&self, characters: &[(char, Script, LookupKey)], results: &CallResults) -> AnnotationResult {
        let entries = characters
            .iter()
            .filter_map(|(character, script, key)| {
                let value = results.value(key)?;
                match (script, value.romaji(), value.kanji_info()) {
                    (Script::Hiragana | Script::Katakana, Some(romaji), _) => Some(CharacterAnnotation::Kana {
                        character: *character,
                        script: *script,
                        romaji: romaji.to_string(),
                    }),
                    (Script::Kanji, _, Some(info)) => Some(CharacterAnnotation::Kanji {
                        character: *character,
                        info: info.clone(),
                        readings: self.kanji_readings(info, results),
                    }),
                    _ => None,
                }
            })
            .collect();

        let status: RecordStatus = results.status();
        AnnotationResult {
            entries,
            failures: results.failures(),
            lookups: results.len(),
            status,
        }
    }
}
