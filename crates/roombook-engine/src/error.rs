//! Engine error types.

use roombook_core::{ReservationStatus, ValidationError};
use roombook_providers::{ApiError, DeliveryError, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the engine.
///
/// A booking conflict is not an error: conflict-aware operations return it
/// as part of their outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected before reaching the API.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The state machine does not allow the requested change.
    #[error("Reservation {reservation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        reservation_id: String,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// Cancelling a reservation that has already started.
    #[error("Reservation {reservation_id} has already started")]
    AlreadyStarted { reservation_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// The actor may not perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The API could not be reached and no fallback applies.
    #[error("Network error: {0}")]
    Network(#[source] ApiError),

    /// Any other API failure.
    #[error("API error: {0}")]
    Api(#[source] ApiError),

    /// Alerts were not permitted by the user.
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

impl EngineError {
    /// Creates an invalid transition error.
    pub fn invalid_transition(
        reservation_id: impl Into<String>,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> Self {
        Self::InvalidTransition {
            reservation_id: reservation_id.into(),
            from,
            to,
        }
    }

    /// Creates a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Returns true if the error came from an unreachable API.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        if err.is_network() {
            Self::Network(err)
        } else if err.is_not_found() {
            Self::NotFound(err.message().to_string())
        } else {
            Self::Api(err)
        }
    }
}
