/*!
 * Glossary annotation pipeline.
 *
 * - `model`: lookup keys, payloads and per-record results
 * - `cache`: sharded, size-bounded cache with single-flight and atomic flush
 * - `flusher`: periodic background flush of the cache
 * - `pacer`: global spacing of outbound calls and inter-batch pauses
 * - `lookup`: cache-aware, retrying lookup client
 * - `calls`: bounded fan-out of a record's lookups
 * - `annotate`: two-phase annotation of one record's text
 * - `templates`: renderer and HTML templates
 * - `stats`: run statistics
 * - `batch`: batch partitioning and the record pool
 * - `orchestrator`: run state machine
 */

pub mod annotate;
pub mod batch;
pub mod cache;
pub mod calls;
pub mod flusher;
pub mod lookup;
pub mod model;
pub mod orchestrator;
pub mod pacer;
pub mod stats;
pub mod templates;

pub use annotate::Annotator;
pub use batch::{BatchJob, FailureReason, RecordOutcome, RecordPool, RecordReport};
pub use cache::{CacheEntry, CacheStats, CacheStore, Flight, FlushReport};
pub use calls::{CallPool, CallResults};
pub use flusher::CacheFlusher;
pub use lookup::{LookupClient, LookupSettings};
pub use model::{AnnotationPayload, AnnotationResult, KanjiInfo, LookupKey, LookupKind, RecordStatus};
pub use orchestrator::{Orchestrator, ProgressUpdate, RunState, RunSummary};
pub use pacer::Pacer;
pub use stats::{RunStatistics, StatKind, StatisticsAggregator};
pub use templates::{GlossaryTemplates, HtmlRenderer, Renderer};
