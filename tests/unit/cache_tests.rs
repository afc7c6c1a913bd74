/*!
 * Tests for the lookup cache store
 */

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use kanjigloss::app_config::CacheConfig;
use kanjigloss::glossary::{AnnotationPayload, CacheEntry, CacheStore, KanjiInfo, LookupKey};

use crate::common;

fn reading(romaji: &str) -> AnnotationPayload {
    AnnotationPayload::Reading {
        romaji: romaji.to_string(),
    }
}

fn kanji(character: &str, meaning: &str) -> AnnotationPayload {
    AnnotationPayload::Kanji(KanjiInfo {
        kanji: character.to_string(),
        meanings: vec![meaning.to_string()],
        kun_readings: vec!["ひ".to_string()],
        on_readings: vec!["ニチ".to_string()],
        ..KanjiInfo::default()
    })
}

#[test]
fn test_put_and_get_withEnabledCache_shouldReturnValue() {
    let store = CacheStore::in_memory(1024 * 1024);
    let key = LookupKey::meaning('日');
    store.put(key.clone(), kanji("日", "day"));

    assert_eq!(store.get(&key), Some(kanji("日", "day")));
    assert!(store.contains(&key));
    assert!(store.is_dirty());
    assert!(store.get(&LookupKey::reading("日")).is_none());
}

#[test]
fn test_lookup_key_withSurroundingWhitespace_shouldNormalize() {
    let store = CacheStore::in_memory(1024 * 1024);
    store.put(LookupKey::reading("  にち "), reading("nichi"));
    assert_eq!(store.get(&LookupKey::reading("にち")), Some(reading("nichi")));
}

#[test]
fn test_insert_entry_overBudget_shouldEvictOldestFirst() {
    let now = Utc::now();
    let entries: Vec<CacheEntry> = [("あ", "a"), ("い", "i"), ("う", "u")]
        .iter()
        .enumerate()
        .map(|(i, (kana, romaji))| {
            CacheEntry::with_timestamp(
                LookupKey::reading(kana),
                reading(romaji),
                now + ChronoDuration::seconds(i as i64),
            )
            .unwrap()
        })
        .collect();
    let entry_size = entries[0].size_bytes;
    let store = CacheStore::in_memory(entry_size * 2 + entry_size / 2);

    for entry in entries {
        store.insert_entry(entry);
    }

    assert_eq!(store.len(), 2);
    assert!(store.total_bytes() <= store.max_bytes());
    assert!(!store.contains(&LookupKey::reading("あ")));
    assert!(store.contains(&LookupKey::reading("い")));
    assert!(store.contains(&LookupKey::reading("う")));
}

#[test]
fn test_insert_entry_olderThanExisting_shouldEvictTheOlderEntry() {
    let now = Utc::now();
    let newer = CacheEntry::with_timestamp(LookupKey::reading("か"), reading("ka"), now).unwrap();
    let older =
        CacheEntry::with_timestamp(LookupKey::reading("き"), reading("ki"), now - ChronoDuration::hours(1)).unwrap();
    let store = CacheStore::in_memory(newer.size_bytes + newer.size_bytes / 2);

    store.insert_entry(newer);
    store.insert_entry(older);

    assert_eq!(store.len(), 1);
    assert!(store.contains(&LookupKey::reading("か")));
}

#[test]
fn test_flush_and_load_withFile_shouldRestoreEntries() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("api_cache.json");

    let store = CacheStore::with_path(&path, 1024 * 1024);
    store.put(LookupKey::reading("あ"), reading("a"));
    store.put(LookupKey::meaning('日'), kanji("日", "sun"));

    let report = store.flush()?;
    assert_eq!(report.entries, 2);
    assert!(!report.over_budget);
    assert!(!store.is_dirty());

    let restored = CacheStore::with_path(&path, 1024 * 1024);
    assert_eq!(restored.load()?, 2);
    assert_eq!(restored.get(&LookupKey::reading("あ")), Some(reading("a")));
    assert_eq!(restored.get(&LookupKey::meaning('日')), Some(kanji("日", "sun")));
    assert_eq!(restored.total_bytes(), store.total_bytes());
    Ok(())
}

#[test]
fn test_flush_shouldLeaveOnlyTheCacheFile() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("api_cache.json");

    let store = CacheStore::with_path(&path, 1024 * 1024);
    for (kana, romaji) in [("さ", "sa"), ("し", "shi"), ("す", "su")] {
        store.put(LookupKey::reading(kana), reading(romaji));
        store.flush()?;
    }

    let files: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files, vec!["api_cache.json".to_string()]);

    let content: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(content["version"], 1);
    assert!(content["entries"]["reading:し"].is_object());
    Ok(())
}

#[test]
fn test_flush_afterFillingPastBudget_shouldKeepFileWithinBudget() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("api_cache.json");
    let store = CacheStore::with_path(&path, 20_000);

    for i in 0..400u32 {
        let character = char::from_u32(0x4E00 + i).unwrap();
        let info = KanjiInfo {
            kanji: character.to_string(),
            meanings: vec!["sun".to_string(), "day".to_string(), "counter for days".to_string()],
            kun_readings: vec!["ひ".to_string(), "-び".to_string(), "-か".to_string()],
            on_readings: vec!["ニチ".to_string(), "ジツ".to_string()],
            grade: Some(1),
            stroke_count: Some(4),
            jlpt: Some(4),
        };
        store.put(LookupKey::meaning(character), AnnotationPayload::Kanji(info));
    }
    assert!(store.len() < 400);

    let report = store.flush()?;
    assert!(report.bytes <= store.max_bytes(), "file {} exceeds budget {}", report.bytes, store.max_bytes());
    assert!(!report.over_budget);
    assert_eq!(report.entries, store.len());
    // envelope plus every entry, minus the trailing separator
    assert_eq!(report.bytes, 26 + store.total_bytes() - 1);
    assert_eq!(std::fs::metadata(&path)?.len(), report.bytes);
    Ok(())
}

#[test]
fn test_flush_withEmptyCache_shouldWriteOnlyTheEnvelope() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let store = CacheStore::with_path(dir.path().join("api_cache.json"), 1024);

    let report = store.flush()?;
    assert_eq!(report.entries, 0);
    assert_eq!(report.bytes, 26);
    Ok(())
}

#[test]
fn test_insert_entry_largerThanBudget_shouldBeEvicted() {
    let store = CacheStore::in_memory(1);
    store.insert_entry(CacheEntry::new(LookupKey::reading("あ"), reading("a")).unwrap());
    assert!(store.is_empty());
    assert_eq!(store.total_bytes(), 0);
}

#[test]
fn test_open_withCorruptFile_shouldStartEmpty() -> Result<()> {
    let dir = common::create_temp_dir()?;
    std::fs::write(dir.path().join("api_cache.json"), "{ truncated")?;

    let store = CacheStore::open(&CacheConfig::default(), dir.path());
    assert!(store.is_enabled());
    assert!(store.is_empty());
    assert!(!store.is_dirty());
    Ok(())
}

#[test]
fn test_open_withDisabledConfig_shouldNotStore() {
    let config = CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    };
    let store = CacheStore::open(&config, ".");
    store.put(LookupKey::reading("あ"), reading("a"));

    assert!(!store.is_enabled());
    assert!(store.get(&LookupKey::reading("あ")).is_none());
    assert_eq!(store.flush().unwrap().entries, 0);
}

#[test]
fn test_clear_shouldRemoveEntriesAndFile() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("api_cache.json");
    let store = CacheStore::with_path(&path, 1024 * 1024);
    store.put(LookupKey::reading("あ"), reading("a"));
    store.flush()?;
    assert!(path.exists());

    store.clear()?;
    assert!(store.is_empty());
    assert_eq!(store.total_bytes(), 0);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_put_fromManyThreads_shouldKeepTrackedSizeConsistent() {
    let store = Arc::new(CacheStore::in_memory(u64::MAX));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..50 {
                    store.put(LookupKey::reading(&format!("k{}-{}", t, i)), reading("x"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 400);
    let stats = store.stats();
    assert_eq!(stats.entries, 400);
    assert_eq!(stats.tracked_bytes, store.total_bytes());
}

#[tokio::test]
async fn test_flush_async_shouldWriteFile() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("api_cache.json");
    let store = Arc::new(CacheStore::with_path(&path, 1024 * 1024));
    store.put(LookupKey::meaning('月'), kanji("月", "moon"));

    let report = store.flush_async().await?;
    assert_eq!(report.entries, 1);
    assert!(path.exists());
    assert_eq!(store.stats().file_bytes, report.bytes);
    Ok(())
}
