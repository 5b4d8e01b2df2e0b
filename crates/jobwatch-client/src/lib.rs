//! Job API client for Jobwatch.
//!
//! Defines the contract the tracker consumes ([`JobApi`]) and an HTTP
//! implementation over the REST endpoints.

pub mod api;
pub mod http;

pub use api::{JobApi, StartResponse, StatusReport};
pub use http::HttpJobApi;
