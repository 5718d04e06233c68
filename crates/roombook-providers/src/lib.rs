//! Collaborator traits and implementations for roombook.
//!
//! This crate provides the boundaries the engine talks through:
//!
//! - [`RemoteApi`] - the reservation/notification backend
//! - [`DeliveryChannel`] - shows alerts now or at a later instant
//! - [`KeyValueStore`] - local persistence for caches and queued writes
//! - [`ApiError`] - error type for remote operations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  HTTP backend   │    │  in-process     │
//! └────────┬────────┘    └────────┬────────┘
//!          │                      │
//!          ▼                      ▼
//! ┌─────────────────┐    ┌─────────────────┐
//! │    HttpApi      │    │   InMemoryApi   │
//! └────────┬────────┘    └────────┬────────┘
//!          │      RemoteApi       │
//!          └──────────┬───────────┘
//!                     ▼
//!             roombook-engine ──► DeliveryChannel
//!                     │
//!                     ▼
//!               KeyValueStore
//! ```

pub mod api;
pub mod delivery;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;
pub mod store;

pub use api::{BoxFuture, JsonObject, RemoteApi};
#[cfg(feature = "desktop")]
pub use delivery::{DesktopChannel, DesktopConfig};
pub use delivery::{
    AlertPayload, DeliveryChannel, DeliveryError, DeliveryId, DeliveryResult, PermissionStatus,
    RecordedSchedule, RecordingChannel,
};
pub use error::{ApiError, ApiErrorCode, ApiResult};
#[cfg(feature = "http")]
pub use http::{HttpApi, HttpConfig};
pub use memory::InMemoryApi;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, StoreResult};
