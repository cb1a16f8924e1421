//! # Origin Crawler
//!
//! Incrementally crawls registered messaging-channel origins, ingests new
//! document-bearing items exactly once, tracks each origin's liveness, and
//! hands downloaded files to an external analyzer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ OriginStore │──▶│ HealthTracker│──▶│ CursorTraversal │
//! │  (SQLite)   │   │ probe/fresh  │   │ filter + dedup  │
//! └─────────────┘   └──────────────┘   └───────┬─────────┘
//!                                              │
//!                          ┌───────────────────┤
//!                          ▼                   ▼
//!                  ┌──────────────┐    ┌──────────────┐
//!                  │  Ingestion   │    │   Analysis   │
//!                  │ (atomic txn) │    │ (subprocess) │
//!                  └──────────────┘    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ocrawl init                          # create database
//! ocrawl add-origin some_channel       # register an origin
//! ocrawl crawl                         # run one crawl cycle
//! ocrawl origins                       # inspect dead scores and cursors
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Per-domain error types |
//! | [`store`] | Origin, history and source persistence |
//! | [`channel`] | Channel-protocol client abstraction |
//! | [`health`] | Liveness and snapshot freshness |
//! | [`ingest`] | Atomic source ingestion |
//! | [`traversal`] | Cursor-based item enumeration |
//! | [`analysis`] | External analyzer dispatch |
//! | [`crawl`] | Crawl cycle orchestration |
//! | [`register`] | Origin registration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analysis;
pub mod channel;
pub mod config;
pub mod crawl;
pub mod db;
pub mod error;
pub mod health;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod origins;
pub mod register;
pub mod store;
pub mod traversal;
