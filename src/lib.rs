//! # EpochDir
//!
//! A write-optimized, read-capable **indexed directory store**. Many
//! producers append unordered key/value pairs; the store persists them
//! as a two-log layout — a bulk data log and a structurally rich index
//! log — organized into epochs, tables, and blocks, so later point
//! lookups read only the minimum bytes required.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        DirWriter                           │
//! │   append(k,v) ── hash ──► partition                        │
//! │  ┌──────────────┐  ┌──────────────┐       ┌─────────────┐  │
//! │  │  DirLogger 0 │  │  DirLogger 1 │  ...  │ DirLogger N │  │
//! │  │  mem ⇄ spare │  │  mem ⇄ spare │       │             │  │
//! │  └──────┬───────┘  └──────┬───────┘       └──────┬──────┘  │
//! │         │ swap + background compaction           │         │
//! │  ┌──────▼───────────────────────────────────────▼───────┐ │
//! │  │ TableLogger: blocks ► tables ► epochs ► footer        │ │
//! │  └──────┬───────────────────────────────┬────────────────┘ │
//! │         ▼                               ▼                  │
//! │     data log (shared)            index log (per part)      │
//! └────────────────────────────────────────────────────────────┘
//!
//!  read(k): footer ► epoch index ► table handle ► bloom filter
//!           ► index block ► data block ► value
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`encoding`] | Varints, fixed integers, length-prefixed slices, masked CRC32C |
//! | [`block`] | Restart-interval key/value blocks with binary-search seek |
//! | [`filter`] | Per-table bloom filter blocks |
//! | [`layout`] | Block/table handles, the footer, epoch keys, key-shortening helpers |
//! | [`memtable`] | Append-then-sort write buffers |
//! | [`io`] | `Env` substrate, buffered/rotating log sinks, cached log sources |
//! | [`pool`] | Fixed-size worker pool for compactions and parallel reads |
//! | [`table`] | The block/table/epoch assembler |
//! | [`writer`] | Double-buffered write path with background compaction |
//! | [`reader`] | Bloom-gated point-query read path |
//! | [`options`] | Directory and flush options |
//! | [`error`] | The crate-wide error taxonomy |
//!
//! ## Key properties
//!
//! - **Write-optimized** — producers append into in-memory buffers;
//!   sorting happens once per buffer at compaction time, and every disk
//!   write is a large sequential append.
//! - **Self-describing output** — once `finish` returns, the index log
//!   alone bootstraps a reader: footer, epoch index, per-table handles.
//! - **Bounded reads** — per-table key bounds, bloom filters, and
//!   block-level binary search keep a point lookup to a handful of
//!   block reads.
//! - **Epoch ordering** — multi-value reads concatenate values in
//!   `(epoch, table, insertion)` order, byte-identical between serial
//!   and parallel modes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use epochdir::{DirOptions, DirReader, DirWriter};
//!
//! # fn main() -> Result<(), epochdir::Error> {
//! let options = DirOptions::default();
//!
//! let writer = DirWriter::open(options.clone(), "/tmp/plfs-dir")?;
//! writer.append(b"particle-0042", b"x=1.5 y=0.2")?;
//! writer.epoch_flush()?;
//! writer.finish()?;
//!
//! let reader = DirReader::open(options, "/tmp/plfs-dir")?;
//! let value = reader.read(b"particle-0042")?;
//! assert_eq!(value, b"x=1.5 y=0.2");
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod io;
pub mod layout;
pub mod memtable;
pub mod options;
pub mod pool;
pub mod reader;
pub mod table;
pub mod writer;

pub use error::{Error, Result};
pub use io::{Env, FsEnv, LogSink, LogSource, LogType, MemEnv, RotationType, SinkOptions};
pub use options::{DirOptions, FlushOptions};
pub use pool::ThreadPool;
pub use reader::{Dir, DirReader};
pub use writer::{CompactionStats, DirLogger, DirWriter};
