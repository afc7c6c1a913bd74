use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::app_config::Config;
use crate::database::models::RunRecord;
use crate::database::NoteRepository;
use crate::glossary::{
    CacheFlusher, CacheStats, CacheStore, FlushReport, HtmlRenderer, Orchestrator, ProgressUpdate, RunSummary,
};
use crate::records::{FieldMapping, RecordSelector};
use crate::services::ServicePair;

/// Capacity of the progress channel between a run and the progress bar
const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// Main application controller wiring configuration, cache, storage and runs
pub struct Controller {
    config: Config,
    repository: NoteRepository,
    cache: Arc<CacheStore>,
    flusher: Option<CacheFlusher>,
}

impl Controller {
    /// Create a controller; the cache file lives in `work_dir`
    pub fn new<P: AsRef<Path>>(config: Config, work_dir: P, repository: NoteRepository) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let cache = Arc::new(CacheStore::open(&config.cache, work_dir));

        Ok(Self {
            config,
            repository,
            cache,
            flusher: None,
        })
    }

    /// Controller over an in-memory database and a temporary cache location
    pub fn new_for_test(config: Config, work_dir: PathBuf) -> Result<Self> {
        Self::new(config, work_dir, NoteRepository::new_in_memory()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &NoteRepository {
        &self.repository
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Start the periodic cache flush, if configured
    pub fn start_background_flush(&mut self) {
        if self.flusher.is_none() {
            self.flusher = Some(CacheFlusher::start(Arc::clone(&self.cache), self.config.cache.save_interval()));
        }
    }

    /// Annotate the selected notes using the configured remote services
    pub async fn run_glossary(&mut self, selector: &RecordSelector, fields: &FieldMapping) -> Result<RunSummary> {
        let services = ServicePair::from_config(&self.config.services)?;
        self.run_glossary_with(selector, fields, services).await
    }

    /// Annotate the selected notes with the given lookup services
    pub async fn run_glossary_with(
        &mut self,
        selector: &RecordSelector,
        fields: &FieldMapping,
        services: ServicePair,
    ) -> Result<RunSummary> {
        if let Some(note_type) = &selector.note_type {
            self.repository.ensure_field(note_type, &fields.target_field).await?;
        }
        self.start_background_flush();

        let orchestrator = Arc::new(Orchestrator::new(
            self.config.clone(),
            Arc::new(self.repository.clone()),
            services,
            Arc::new(HtmlRenderer::new(self.config.templates.clone())),
            Arc::clone(&self.cache),
        ));

        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let progress_task = tokio::spawn(report_progress(rx));

        let cancel = orchestrator.cancellation_token();
        let interrupt_task = tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        warn!("Interrupted, stopping after the current batch");
                        cancel.cancel();
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });

        info!("🚀 kanjigloss: run {}", orchestrator.run_id());
        let result = orchestrator.run(selector, fields, Some(tx)).await;

        interrupt_task.abort();
        if let Err(e) = progress_task.await {
            warn!("Progress reporter ended abnormally: {}", e);
        }

        let summary = result?;
        let run = RunRecord::from_summary(&summary, selector, fields)?;
        if let Err(e) = self.repository.save_run(&run).await {
            warn!("Failed to save run history: {}", e);
        }

        info!("{}", summary.stats.summary());
        Ok(summary)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn flush_cache(&self) -> Result<FlushReport> {
        Ok(self.cache.flush_async().await?)
    }

    pub fn clear_cache(&self) -> Result<()> {
        Ok(self.cache.clear()?)
    }

    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.repository.recent_runs(limit).await
    }

    /// Stop the background flush and write the cache one last time
    pub async fn shutdown(mut self) -> Result<()> {
        let report = match self.flusher.take() {
            Some(flusher) => flusher.shutdown().await,
            None => self.cache.flush_async().await,
        };
        match report {
            Ok(report) if report.entries > 0 => info!("API cache saved: {} entries", report.entries),
            Ok(_) => {}
            Err(e) => warn!("Failed to save API cache: {}", e),
        }
        Ok(())
    }

    // Format duration in a human-readable format
    pub fn format_duration(duration: std::time::Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}

/// Feed the progress bar from run snapshots until the run drops its sender
async fn report_progress(mut rx: mpsc::Receiver<ProgressUpdate>) {
    let progress_bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} notes ({percent}%) {msg}")
        .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress_bar.set_style(style.progress_chars("█▓▒░"));

    while let Some(update) = rx.recv().await {
        let stats = &update.stats;
        progress_bar.set_length(stats.total_records);
        progress_bar.set_position(stats.attempted());

        let eta = stats
            .eta()
            .map(|eta| format!(", ETA {}", Controller::format_duration(eta)))
            .unwrap_or_default();
        progress_bar.set_message(format!(
            "batch {}/{}, {} failed, {:.0}% cache hits{}",
            update.batch_index + 1,
            update.total_batches,
            stats.failed,
            stats.cache_hit_rate(),
            eta
        ));
    }

    progress_bar.finish_and_clear();
}
