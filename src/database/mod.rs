/*!
 * SQLite persistence for notes and run history.
 *
 * - Notes: deck, note type and named HTML fields, the records annotated by a run
 * - Runs: history of finished runs with their statistics
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::{Inventory, NoteDatabase};
pub use repository::NoteRepository;
