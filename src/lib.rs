//! # toxit
//!
//! Scheduled toxicity scoring and cross-community overlap graphs.
//!
//! A single long-lived processor polls a task queue. Each due task names a
//! set of communities; for every one of them the processor collects text
//! samples and moderators, scores all samples through a remote batch
//! inference endpoint, derives moderator and author overlap graphs, and
//! stores per-community statistics together with the edges.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Collector  │──▶│  Scorer   │──▶│  Graph   │──▶│ Aggregate │──▶│  SQLite  │
//! │ snapshots  │   │ HTTP/batch│   │ overlaps │   │ min/max/… │   │  results │
//! └────────────┘   └───────────┘   └──────────┘   └───────────┘   └──────────┘
//!        ▲                                                             │
//!        └──────────────── TaskProcessor (poll → claim → run) ◀────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! toxit init                              # create database
//! toxit task add rust golang --scope week # schedule a run
//! toxit run                               # start the poll loop
//! toxit stats 1                           # inspect the results
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`collector`] | Content collection seam and snapshot collector |
//! | [`scoring`] | Batch scoring client |
//! | [`graph`] | Overlap edge builder |
//! | [`aggregate`] | Per-community statistics |
//! | [`store`] | Task queue and result persistence |
//! | [`processor`] | Poll loop and task runs |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aggregate;
pub mod collector;
pub mod config;
pub mod db;
pub mod graph;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod scoring;
pub mod stats;
pub mod store;
pub mod task_cmd;
