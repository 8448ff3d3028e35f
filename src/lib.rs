//! # Thread Sync
//!
//! Incremental synchronization of staged discussion threads into remote
//! stores. Staged parquet files are scanned over a trailing window of days,
//! turned into fingerprinted text items, and written to a remote only when
//! the remote's copy is missing or stale.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────┐   ┌─────────┐   ┌──────────┐
//! │ scanner  │──▶│ fingerprint │──▶│ probe  │──▶│ planner │──▶│ executor │
//! │ (window) │   │ (items, h)  │   │ (get)  │   │ (diff)  │   │ (write)  │
//! └──────────┘   └─────────────┘   └────────┘   └─────────┘   └────┬─────┘
//!                                      ▲                           │
//!                                      └──────── RemoteSink ◀──────┘
//!                                        vector index | object store
//! ```
//!
//! The loop in [`run`] buffers items, flushes them through the prober,
//! planner and executor, and stops on input exhaustion, an exhausted write
//! budget, or persistent rate limiting.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Configuration errors and exit codes |
//! | [`models`] | Core data types |
//! | [`scanner`] | Window scanner over the staged tree |
//! | [`staged`] | Parquet row reader |
//! | [`fingerprint`] | Item ids, text normalization, fingerprints |
//! | [`sink`] | Remote sink trait and call outcomes |
//! | [`probe`] | Remote state prober |
//! | [`planner`] | Diff and budget planner |
//! | [`executor`] | Batched writes with rate-limit backoff |
//! | [`artifact`] | NDJSON output artifacts |
//! | [`run`] | Run accumulator |
//! | [`embedding`] | Embedding providers |
//! | [`vectorize`] | Vector index client and sink |
//! | [`object_store`] | S3-compatible client and sink |
//! | [`progress`] | Progress reporting on stderr |

pub mod artifact;
pub mod config;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod index_cmd;
pub mod models;
pub mod object_store;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod run;
pub mod scanner;
pub mod sink;
pub mod staged;
pub mod upload_cmd;
pub mod vectorize;
