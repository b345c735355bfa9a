//! Pipeline stages of a tagging run.
//!
//! Each submodule implements exactly one step. Only [`graph`] and
//! [`tagger`] touch the PDF object representation; every other stage works
//! on plain values from [`crate::model`].
//!
//! ## Data Flow
//!
//! ```text
//! manifest ──▶ generate ──▶ fallback ──▶ tagger ──▶ publish
//! (SQLite/txt)  (LLM)       (defaults)   (lopdf)    (store)
//! ```
//!
//! 1. [`manifest`]  — load image references from SQLite or flat text
//! 2. [`generate`]  — describe images one at a time behind a
//!    [`schedule::IntervalScheduler`], links concurrently; retry, backoff
//!    and timeout around every [`inference`] call; [`postprocess`] cleans
//!    the replies
//! 3. [`fallback`]  — default text for references with no result at all
//! 4. [`tagger`]    — single pass over the normalised [`graph`], matching
//!    by object number and draining the result maps
//! 5. [`publish`]   — serialise, hand to the store, drop the scratch workspace

pub mod fallback;
pub mod generate;
pub mod graph;
pub mod inference;
pub mod manifest;
pub mod postprocess;
pub mod publish;
pub mod schedule;
pub mod tagger;
