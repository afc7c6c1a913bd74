/*!
 * # kanjigloss - Japanese glossary annotation for flashcard notes
 *
 * A Rust library that walks a collection of notes, extracts the Japanese
 * characters of a source field and writes an HTML glossary (kana romaji,
 * kanji meanings and readings) into a target field.
 *
 * ## Features
 *
 * - Lookups against a reading (romaji) service and a kanji meaning service
 * - Persistent, size-bounded lookup cache with single-flight deduplication
 * - Globally paced outbound calls with a single retry on transient errors
 * - Bounded parallelism per record and per batch
 * - Cooperative cancellation between batches
 * - Run statistics and run history
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `glossary`: The annotation pipeline:
 *   - `glossary::cache`: Lookup cache store
 *   - `glossary::lookup`: Cache-aware lookup client
 *   - `glossary::batch`: Record pool and batch partitioning
 *   - `glossary::orchestrator`: Run state machine
 * - `services`: HTTP clients for the lookup services
 * - `records`: Record repository contract
 * - `database`: SQLite note storage and run history
 * - `text_utils`: Japanese character classification
 * - `app_controller`: Main application controller
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod errors;
pub mod glossary;
pub mod records;
pub mod services;
pub mod text_utils;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::Controller;
pub use errors::{AppError, CacheError, LookupError, RepositoryError, RunError};
pub use glossary::{CacheStore, Orchestrator, RunState, RunStatistics, RunSummary};
pub use records::{FieldMapping, Record, RecordRepository, RecordSelector};
