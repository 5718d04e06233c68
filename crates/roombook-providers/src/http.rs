//! HTTP implementation of [`RemoteApi`].
//!
//! Talks JSON to the booking backend with a bearer token. Every request is
//! bounded by the client timeout; timeouts and connection failures map to
//! [`ApiErrorCode::NetworkError`](crate::ApiErrorCode::NetworkError) so the
//! engine can fall back to its cache.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use roombook_core::{
    Notification, NotificationPreference, Reservation, ReservationDraft, StatusTransition,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::api::{BoxFuture, JsonObject, RemoteApi};
use crate::error::{ApiError, ApiResult};

/// Configuration for [`HttpApi`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL; endpoint paths are appended to it.
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl HttpConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    /// Creates a configuration for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(base_url.as_ref())?,
            token: None,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("roombook/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct TransitionBatch<'a> {
    transitions: &'a [StatusTransition],
}

#[derive(Deserialize)]
struct UnreadCount {
    count: u32,
}

/// The booking backend over HTTP.
#[derive(Debug)]
pub struct HttpApi {
    client: Client,
    config: HttpConfig,
}

impl HttpApi {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built or
    /// the base URL cannot carry path segments.
    pub fn new(config: HttpConfig) -> ApiResult<Self> {
        if config.base_url.cannot_be_a_base() {
            return Err(ApiError::configuration(format!(
                "base URL {} cannot carry paths",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ApiError::configuration("failed to create HTTP client").with_source(e))?;
        Ok(Self { client, config })
    }

    /// Builds `base_url/segment/...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.config.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "API request");
        let request = self.client.request(method, url);
        match self.config.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn json_body<T: Serialize + ?Sized>(
        request: RequestBuilder,
        body: &T,
    ) -> ApiResult<RequestBuilder> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::internal("failed to encode request body").with_source(e))?;
        Ok(request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes))
    }

    async fn send(request: RequestBuilder) -> ApiResult<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::network("request timeout")
            } else if e.is_connect() {
                ApiError::network(format!("connection failed: {}", e))
            } else {
                ApiError::network(format!("request failed: {}", e))
            }
        })?;
        check_status(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("failed to read response: {}", e)))?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::invalid_response(format!("failed to parse response: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<T> {
        let response = Self::send(self.request(Method::GET, self.endpoint(segments))).await?;
        Self::read_json(response).await
    }
}

/// Maps non-success statuses to API errors.
async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(ApiError::rate_limited(format!(
            "rate limit exceeded{}",
            retry_after
                .map(|s| format!(", retry after {} seconds", s))
                .unwrap_or_default()
        )));
    }

    let body = response.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::UNAUTHORIZED => ApiError::authentication("token expired or invalid"),
        StatusCode::FORBIDDEN => ApiError::forbidden(format!("access denied: {}", body)),
        StatusCode::NOT_FOUND => ApiError::not_found(body),
        StatusCode::CONFLICT => ApiError::conflict(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ApiError::bad_request(body),
        s if s.is_server_error() => ApiError::server(format!("API error ({}): {}", s, body)),
        s => ApiError::invalid_response(format!("unexpected status {}: {}", s, body)),
    };
    warn!(status = %status, error = %err, "API request failed");
    Err(err)
}

impl RemoteApi for HttpApi {
    fn name(&self) -> &str {
        "http"
    }

    fn list_user_reservations(&self, user_id: &str) -> BoxFuture<'_, ApiResult<Vec<Reservation>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.get_json(&["users", &user_id, "reservations"]).await })
    }

    fn list_room_reservations(&self, room_id: &str) -> BoxFuture<'_, ApiResult<Vec<Reservation>>> {
        let room_id = room_id.to_string();
        Box::pin(async move { self.get_json(&["rooms", &room_id, "reservations"]).await })
    }

    fn get_reservation(&self, id: &str) -> BoxFuture<'_, ApiResult<Reservation>> {
        let id = id.to_string();
        Box::pin(async move { self.get_json(&["reservations", &id]).await })
    }

    fn create_reservation(
        &self,
        draft: &ReservationDraft,
    ) -> BoxFuture<'_, ApiResult<Reservation>> {
        let draft = draft.clone();
        Box::pin(async move {
            let request = self.request(Method::POST, self.endpoint(&["reservations"]));
            let response = Self::send(Self::json_body(request, &draft)?).await?;
            Self::read_json(response).await
        })
    }

    fn apply_transitions(
        &self,
        transitions: &[StatusTransition],
    ) -> BoxFuture<'_, ApiResult<Vec<Reservation>>> {
        let transitions = transitions.to_vec();
        Box::pin(async move {
            let request = self.request(
                Method::POST,
                self.endpoint(&["reservations", "transitions"]),
            );
            let body = TransitionBatch {
                transitions: &transitions,
            };
            let response = Self::send(Self::json_body(request, &body)?).await?;
            Self::read_json(response).await
        })
    }

    fn list_notifications(&self, user_id: &str) -> BoxFuture<'_, ApiResult<Vec<Notification>>> {
        let user_id = user_id.to_string();
        Box::pin(async move { self.get_json(&["users", &user_id, "notifications"]).await })
    }

    fn create_notification(
        &self,
        notification: &Notification,
    ) -> BoxFuture<'_, ApiResult<Notification>> {
        let notification = notification.clone();
        Box::pin(async move {
            let request = self.request(Method::POST, self.endpoint(&["notifications"]));
            let response = Self::send(Self::json_body(request, &notification)?).await?;
            Self::read_json(response).await
        })
    }

    fn mark_notification_read(&self, id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["notifications", &id, "read"]);
            Self::send(self.request(Method::POST, url)).await?;
            Ok(())
        })
    }

    fn mark_all_notifications_read(&self, user_id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["users", &user_id, "notifications", "read-all"]);
            Self::send(self.request(Method::POST, url)).await?;
            Ok(())
        })
    }

    fn delete_notification(&self, id: &str) -> BoxFuture<'_, ApiResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let url = self.endpoint(&["notifications", &id]);
            Self::send(self.request(Method::DELETE, url)).await?;
            Ok(())
        })
    }

    fn unread_count(&self, user_id: &str) -> BoxFuture<'_, ApiResult<u32>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let count: UnreadCount = self
                .get_json(&["users", &user_id, "notifications", "unread-count"])
                .await?;
            Ok(count.count)
        })
    }

    fn get_preferences(
        &self,
        user_id: &str,
    ) -> BoxFuture<'_, ApiResult<Option<NotificationPreference>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            match self.get_json(&["users", &user_id, "preferences"]).await {
                Ok(prefs) => Ok(Some(prefs)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn patch_preferences(
        &self,
        user_id: &str,
        patch: &JsonObject,
    ) -> BoxFuture<'_, ApiResult<NotificationPreference>> {
        let user_id = user_id.to_string();
        let patch = patch.clone();
        Box::pin(async move {
            let url = self.endpoint(&["users", &user_id, "preferences"]);
            let request = self.request(Method::PATCH, url);
            let response = Self::send(Self::json_body(request, &patch)?).await?;
            Self::read_json(response).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(HttpConfig::new(base).unwrap()).unwrap()
    }

    #[test]
    fn endpoint_appends_segments() {
        let api = api("https://book.example.com/api/v1/");
        assert_eq!(
            api.endpoint(&["users", "alice", "reservations"]).as_str(),
            "https://book.example.com/api/v1/users/alice/reservations"
        );
    }

    #[test]
    fn endpoint_encodes_ids() {
        let api = api("https://book.example.com");
        assert_eq!(
            api.endpoint(&["reservations", "a b/c"]).as_str(),
            "https://book.example.com/reservations/a%20b%2Fc"
        );
    }

    #[test]
    fn rejects_non_base_url() {
        let config = HttpConfig::new("mailto:ops@example.com").unwrap();
        let err = HttpApi::new(config).unwrap_err();
        assert_eq!(err.code(), crate::ApiErrorCode::ConfigurationError);
    }

    #[test]
    fn config_builder() {
        let config = HttpConfig::new("https://book.example.com")
            .unwrap()
            .with_token("secret")
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(3));
    }
}
