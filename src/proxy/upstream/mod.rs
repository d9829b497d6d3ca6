pub mod client;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use client::UpstreamClient;
pub use types::{Backend, BackendRequest, BackendResponse, RequestMethod, UpstreamError};
