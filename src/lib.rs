//! # Meter Cache Core Library
//!
//! Polls an electricity meter over an optical serial link (IEC 62056-21 mode C
//! readout), caches every acquired measurement in an append-only repository and
//! serves the cache over HTTP.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: Transport sessions (serial and mock) and the [`adapters::Meter`]
//!   client that turns a readout into a [`measurement::Measurement`].
//! - **`actors`**: The long-lived workers: periodic [`actors::Poller`], the
//!   [`actors::PagerActor`] read path and the [`actors::CacheDumper`].
//! - **`repository`**: The [`repository::MeasurementRepository`] contract with
//!   in-memory and JSON-lines file implementations.
//! - **`service`**: HTTP retrieval endpoints.
//! - **`config`**: Figment-based configuration (TOML file plus environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide [`error::MeterError`].

pub mod actors;
pub mod adapters;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod repository;
pub mod service;

pub use error::{MeterError, MeterResult};
