//! # Patty
//!
//! Extracts exercises from scanned textbook pages, classifies them into
//! pedagogical categories and adapts them into typed interactive exercises
//! by dispatching structured requests to LLM providers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────────────────────┐   ┌──────────┐
//! │ CLI (patty)  │──▶│ SQLite: batches, page extractions,    │◀──│  Daemon   │
//! │ sandbox ops  │   │ exercises, classifications, adaptations│   │  ticks    │
//! └──────────────┘   └───────────────────────────────────────┘   └────┬─────┘
//!                                                                     │
//!                          ┌──────────────────┬───────────────────────┤
//!                          ▼                  ▼                       ▼
//!                    ┌───────────┐     ┌──────────────┐        ┌────────────┐
//!                    │ extraction│     │classification│        │ adaptation │
//!                    │ PDF+vision│     │  classifier  │        │    LLM     │
//!                    └───────────┘     └──────────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! patty init
//! patty upload-pdf ./scans/grammaire.pdf
//! patty extract <sha256> --prompt-file ./prompts/extract.txt --model dummy-1 --run-classification
//! patty run-submission-daemon
//! patty export --output ./out/approved.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Persisted entities |
//! | [`store`] | Repository functions over one connection |
//! | [`llm`] | Provider-agnostic LLM client |
//! | [`blobs`] | Blob store for PDFs and image crops |
//! | [`pdf`] | PDF cache, rasterization, upload |
//! | [`vision`] | Image detection, cropping, annotation |
//! | [`classifier`] | Exercise classifiers |
//! | [`services`] | External collaborators owned by the daemon |
//! | [`extraction`] | Extraction stage |
//! | [`classification`] | Classification stage |
//! | [`adaptation`] | Adaptation stage, adjustments, review |
//! | [`sandbox`] | User operations creating batches |
//! | [`lineage`] | Origin of any record |
//! | [`daemon`] | Submission daemon |
//! | [`stats`] | Backlog and counts |
//! | [`export`] | JSON export of approved adaptations |
//! | [`commands`] | CLI entry points |

pub mod adaptation;
pub mod blobs;
pub mod classification;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod db;
pub mod export;
pub mod extraction;
pub mod lineage;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pdf;
pub mod sandbox;
pub mod services;
pub mod stats;
pub mod store;
pub mod subprocess;
pub mod vision;
