//! Retrieval service exposing the measurement cache.

pub mod http;

pub use http::{router, HttpService, MeasurementsResponse};
