/*!
 * Integration tests for the application controller
 */

use anyhow::Result;

use kanjigloss::app_controller::Controller;
use kanjigloss::database::models::NewNote;
use kanjigloss::glossary::RunState;
use kanjigloss::records::{FieldMapping, RecordSelector};

use crate::common;

#[tokio::test]
async fn test_run_glossary_with_shouldAnnotateNotesAndSaveHistory() -> Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let mut controller = Controller::new_for_test(common::fast_config(), dir.path().to_path_buf())?;
    let id = controller
        .repository()
        .insert_note(&NewNote::new("Japanese", "Vocab").with_field("Front", "日本"))
        .await?;
    let (_reading, meaning, services) = common::mock_services();
    meaning.respond_kanji("日", &["day"], &[], &[]);

    let selector = RecordSelector::new(Some("Japanese".to_string()), Some("Vocab".to_string()));
    let fields = FieldMapping::new("Front", "Glossary");
    let summary = controller.run_glossary_with(&selector, &fields, services).await?;

    assert_eq!(summary.state, RunState::Completed);
    assert_eq!(summary.stats.updated, 1);
    let note = controller.repository().get_note(id).await?.unwrap();
    assert!(note.field("Glossary").unwrap().contains("day"));

    let runs = controller.list_runs(10).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, summary.run_id.to_string());
    assert!(runs[0].is_successful());

    controller.shutdown().await?;
    assert!(dir.path().join("api_cache.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_cache_commands_shouldReportFlushAndClear() -> Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let mut controller = Controller::new_for_test(common::fast_config(), dir.path().to_path_buf())?;
    controller
        .repository()
        .insert_note(&NewNote::new("Default", "Basic").with_field("Front", "山川"))
        .await?;
    let (_reading, _meaning, services) = common::mock_services();

    controller
        .run_glossary_with(&RecordSelector::default(), &FieldMapping::new("Front", "Glossary"), services)
        .await?;

    let stats = controller.cache_stats();
    assert_eq!(stats.entries, 2);
    assert!(stats.file_bytes > 0);

    let report = controller.flush_cache().await?;
    assert_eq!(report.entries, 2);

    controller.clear_cache()?;
    let stats = controller.cache_stats();
    assert_eq!(stats.entries, 0);
    assert!(!dir.path().join("api_cache.json").exists());
    Ok(())
}

#[tokio::test]
async fn test_run_glossary_with_secondRun_shouldReuseCacheAcrossControllers() -> Result<()> {
    common::init_logging();
    let dir = common::create_temp_dir()?;
    let (_reading, meaning, services) = common::mock_services();

    let mut first = Controller::new_for_test(common::fast_config(), dir.path().to_path_buf())?;
    first
        .repository()
        .insert_note(&NewNote::new("Default", "Basic").with_field("Front", "猫"))
        .await?;
    first
        .run_glossary_with(&RecordSelector::default(), &FieldMapping::new("Front", "Glossary"), services.clone())
        .await?;
    first.shutdown().await?;
    assert_eq!(meaning.calls_for("猫"), 1);

    let mut second = Controller::new_for_test(common::fast_config(), dir.path().to_path_buf())?;
    second
        .repository()
        .insert_note(&NewNote::new("Default", "Basic").with_field("Front", "猫"))
        .await?;
    let summary = second
        .run_glossary_with(&RecordSelector::default(), &FieldMapping::new("Front", "Glossary"), services)
        .await?;

    assert_eq!(summary.stats.cache_hits, 1);
    assert_eq!(summary.stats.api_calls, 0);
    assert_eq!(meaning.calls_for("猫"), 1);
    Ok(())
}

#[tokio::test]
async fn test_new_withInvalidConfig_shouldFail() {
    let dir = common::create_temp_dir().unwrap();
    let mut config = common::fast_config();
    config.performance.parallel_workers = 0;

    assert!(Controller::new_for_test(config, dir.path().to_path_buf()).is_err());
}

#[test]
fn test_format_duration_shouldPickLargestUnit() {
    use std::time::Duration;

    assert_eq!(Controller::format_duration(Duration::from_millis(1500)), "1.500s");
    assert_eq!(Controller::format_duration(Duration::from_secs(125)), "2m 5s");
    assert_eq!(Controller::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
}
