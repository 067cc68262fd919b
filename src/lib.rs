//! # Photo Compose
//!
//! A batch worker that builds composite photographs (a background template,
//! foreground photos and text) and delivers them as JPEG to an FTP server.
//!
//! # Architecture: Spool → Compose → Deliver
//!
//! ```text
//! enqueue   job.json  →  spool/pending/      (durable, FIFO)
//! worker    claim     →  Composer::run       (fetch, transform, paste, text, encode)
//! deliver   staged    →  FTP CWD/MKD/STOR    (one session per job)
//! ```
//!
//! Every job runs inside a retry state machine; a job that exhausts its
//! attempts lands in `spool/failed/` with its last error. All logging goes
//! through `tracing`; INFO-and-above events are also batched into NDJSON
//! files on the same remote store.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Pure layer transforms: crop, rotate, filter, scale, watermark, text, paste, encode |
//! | [`pipeline`] | Composition requests and the [`pipeline::Composer`] that runs them |
//! | [`fetch`] | Template and source retrieval over HTTP(S) or from local paths |
//! | [`remote`] | Remote store sessions (FTP, local directory) and path walking |
//! | [`logsink`] | Batched remote log sink and its `tracing` layer |
//! | [`task`] | Retry state machine with injectable sleeper |
//! | [`queue`] | On-disk job spool |
//! | [`worker`] | Drains the spool through the composer under retry |
//! | [`config`] | `config.toml` loading, validation, environment overrides |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Text Scales With Output, Images With Canvas
//!
//! Text sizes are authored against a 1000px reference width and multiplied
//! by `output_width / 1000` before drawing, while image layer widths are
//! percentages of the template. Both are drawn on the template-sized canvas,
//! which is resized to the output width last.
//! Separator pages have no template, so their text is drawn at its declared
//! size.
//!
//! ## Parallel Layers, Serial Paste
//!
//! Layer transform chains are independent and run on the rayon pool. Pasting
//! happens afterwards in input order so later layers always cover earlier ones.

pub mod config;
pub mod fetch;
pub mod imaging;
pub mod logsink;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod remote;
pub mod task;
pub mod worker;
