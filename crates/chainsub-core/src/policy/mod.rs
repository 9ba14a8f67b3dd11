//! Retry policy shared by the gap scanner and the HTTP transport.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
