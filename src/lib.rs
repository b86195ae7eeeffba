//! Rust SDK for the Teegon open platform.
//!
//! The crate is organized by transport surface:
//! - `api`: signed HTTP client for the platform router.
//! - `notify`: persistent websocket pub/sub client with heartbeat and
//!   automatic reconnect.
//! - `sign`: request signature primitive shared by both surfaces.
//! - `request_id`: correlation id generator.
//! - `retry`: shared retry utilities.

/// Platform HTTP client and response types.
pub mod api;
/// Realtime notify client, protocol types, and session helpers.
pub mod notify;
/// Monotonic request id generator.
pub mod request_id;
/// Retry helpers used across the SDK.
pub mod retry;
/// Request signing.
pub mod sign;

pub use api::{ApiClient, ApiClientOptions, ApiError, ApiResponse, Params};
pub use notify::{Delivery, DeliveryQueue, NotifyError, NotifyOptions, NotifySession};
