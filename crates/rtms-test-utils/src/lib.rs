//! # RTMS Test Utilities
//!
//! Shared test utilities for the RTMS client crates.
//!
//! ## Modules
//!
//! - `mock_server` - Scripted RTMS WebSocket server on an ephemeral port
//! - `fixtures` - Credentials, control messages and media frames
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rtms_test_utils::{fixtures, MockRtmsServer};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = MockRtmsServer::accepting().await.unwrap();
//!     let stream = fixtures::TestStream::random();
//!
//!     // Join with stream.signature() against server.url(), then:
//!     server.wait_for("CLIENT_READY_ACK", 1).await.unwrap();
//!     server.send_media(&fixtures::bob_audio()).unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_server;

pub use mock_server::{MockRtmsServer, MockRtmsServerBuilder};
