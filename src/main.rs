// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{info, LevelFilter, Level, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::{Path, PathBuf};

use kanjigloss::app_config::{self, Config};
use kanjigloss::app_controller::Controller;
use kanjigloss::database::{NoteDatabase, NoteRepository};
use kanjigloss::glossary::RunState;
use kanjigloss::records::{FieldMapping, RecordSelector};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// Options shared by every command that touches the configuration or the database
#[derive(Args, Debug)]
struct CommonArgs {
    /// Configuration file path; the cache file is kept next to it
    #[arg(short, long, default_value = "glossary.json")]
    config_path: PathBuf,

    /// Note database path (defaults to the user data directory)
    #[arg(long, env = "KANJIGLOSS_DB")]
    db: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Only annotate notes of this deck
    #[arg(short, long)]
    deck: Option<String>,

    /// Only annotate notes of this note type
    #[arg(short, long)]
    note_type: Option<String>,

    /// Field holding the Japanese text
    #[arg(short, long, default_value = "Front")]
    source_field: String,

    /// Field receiving the glossary HTML
    #[arg(short, long, default_value = "Glossary")]
    target_field: String,

    /// Overwrite glossaries that already exist
    #[arg(short, long)]
    force_overwrite: bool,

    /// Leave notes whose target field already has content
    #[arg(short, long)]
    ignore_existing: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct ImportArgs {
    /// Tab-separated file, one note per line
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Deck of the imported notes
    #[arg(short, long, default_value = "Default")]
    deck: String,

    /// Note type of the imported notes
    #[arg(short, long, default_value = "Basic")]
    note_type: String,

    /// Field names assigned to the columns, in order
    #[arg(short, long = "field", value_delimiter = ',', default_values_t = vec!["Front".to_string(), "Back".to_string()])]
    fields: Vec<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Show cache size and location
    Stats,
    /// Write the cache file now
    Flush,
    /// Drop every cached lookup
    Clear,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Annotate notes with a Japanese glossary
    Run(RunArgs),

    /// Import notes from a tab-separated file
    Import(ImportArgs),

    /// Inspect or manage the lookup cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// List recent runs
    Runs {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Generate shell completions for kanjigloss
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// kanjigloss - Japanese glossaries for flashcard notes
#[derive(Parser, Debug)]
#[command(name = "kanjigloss")]
#[command(version)]
#[command(about = "Annotate flashcard notes with a Japanese glossary")]
#[command(long_about = "kanjigloss reads the Japanese text of a note field, looks up every kana and kanji
and writes an HTML glossary with romaji, meanings and readings into another field.

EXAMPLES:
    kanjigloss import words.tsv -d Japanese -n Vocab        # Load notes
    kanjigloss run -d Japanese -s Front -t Glossary          # Annotate a deck
    kanjigloss run -n Vocab -f                               # Regenerate every glossary
    kanjigloss cache stats                                   # Show cache usage
    kanjigloss runs -n 5                                     # Show the last five runs
    kanjigloss completions bash > kanjigloss.bash            # Generate bash completions

CONFIGURATION:
    Configuration is stored in glossary.json by default. If the file doesn't
    exist, a default one will be created automatically. The lookup cache is
    saved in the same directory.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "1;31",
            Level::Warn => "1;33",
            Level::Info => "1;32",
            Level::Debug => "1;36",
            Level::Trace => "1;35",
        }
    }

    fn emoji_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "❌ ",
            Level::Warn => "🚧 ",
            Level::Info => " ",
            Level::Debug => "🔍 ",
            Level::Trace => "📋 ",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let level = record.level();
            let _ = writeln!(
                std::io::stderr(),
                "\x1B[{}m{} {} {}\x1B[0m",
                Self::color_for_level(level),
                now,
                Self::emoji_for_level(level),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Trace is the ceiling; the effective level is lowered once the config is known
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "kanjigloss", &mut std::io::stdout());
            Ok(())
        }
        Commands::Run(args) => run_glossary(args).await,
        Commands::Import(args) => run_import(args).await,
        Commands::Cache { action, common } => run_cache(action, common).await,
        Commands::Runs { limit, common } => run_history(limit, common).await,
    }
}

/// Load the config, apply overrides and the log level, and open the controller
fn open_controller(common: &CommonArgs, adjust: impl FnOnce(&mut Config)) -> Result<Controller> {
    let mut config = Config::load_or_create(&common.config_path)?;
    adjust(&mut config);
    if let Some(log_level) = &common.log_level {
        config.log_level = log_level.clone().into();
    }
    log::set_max_level(config.log_level.to_level_filter());

    let repository = match &common.db {
        Some(path) => NoteRepository::new(NoteDatabase::open(path)?),
        None => NoteRepository::new_default()?,
    };

    Controller::new(config, work_dir(&common.config_path), repository).context("Configuration validation failed")
}

fn work_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn run_glossary(args: RunArgs) -> Result<()> {
    let mut controller = open_controller(&args.common, |config| {
        if args.force_overwrite {
            config.general.force_overwrite = true;
        }
        if args.ignore_existing {
            config.general.ignore_existing = true;
        }
    })?;

    let selector = RecordSelector::new(args.deck, args.note_type);
    let fields = FieldMapping::new(args.source_field, args.target_field);

    let start = std::time::Instant::now();
    let outcome = controller.run_glossary(&selector, &fields).await;
    controller.shutdown().await?;
    let summary = outcome?;

    info!(
        "Run {} finished as {} in {}",
        summary.run_id,
        summary.state,
        Controller::format_duration(start.elapsed())
    );
    for warning in &summary.cache_warnings {
        info!("Cache warning: {}", warning);
    }

    match summary.state {
        RunState::Failed => Err(anyhow::anyhow!(
            "Run failed: {}",
            summary.error.as_deref().unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

async fn run_import(args: ImportArgs) -> Result<()> {
    let controller = open_controller(&args.common, |_| {})?;
    let count = controller
        .repository()
        .import_tsv(&args.file, &args.deck, &args.note_type, &args.fields)
        .await?;
    println!("Imported {} notes into deck '{}'", count, args.deck);
    Ok(())
}

async fn run_cache(action: CacheCommand, common: CommonArgs) -> Result<()> {
    let controller = open_controller(&common, |_| {})?;

    match action {
        CacheCommand::Stats => {
            let stats = controller.cache_stats();
            if !stats.enabled {
                println!("Cache is disabled");
                return Ok(());
            }
            println!("Entries:       {}", stats.entries);
            println!(
                "Tracked size:  {:.1} KB of {:.1} KB",
                stats.tracked_bytes as f64 / 1024.0,
                stats.max_bytes as f64 / 1024.0
            );
            if let Some(path) = controller.cache().path() {
                println!("File:          {}", path.display());
            }
            println!("File size:     {:.1} KB", stats.file_bytes as f64 / 1024.0);
        }
        CacheCommand::Flush => {
            let report = controller.flush_cache().await?;
            println!("Saved {} entries ({} bytes)", report.entries, report.bytes);
        }
        CacheCommand::Clear => {
            controller.clear_cache()?;
            println!("Cache cleared");
        }
    }
    Ok(())
}

async fn run_history(limit: usize, common: CommonArgs) -> Result<()> {
    let controller = open_controller(&common, |_| {})?;
    let runs = controller.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet");
    }
    for run in runs {
        println!("{}", run);
    }
    println!("{}", controller.repository().inventory().await?);
    Ok(())
}
