//! qdrop-test-utils: Test infrastructure for qdrop.
//!
//! Provides:
//! - MockEndpoint: In-memory connection endpoint for testing without network

mod mock_endpoint;

pub use mock_endpoint::{mock_endpoint_pair, MockEndpoint};
