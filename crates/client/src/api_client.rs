//! HTTP gateway for the marketplace messaging API.
//!
//! Stateless typed wrappers over the REST endpoints. Every call either
//! resolves with the decoded response or fails with an [`ApiError`]; no
//! function here mutates client-held state; merging results into the
//! conversation store is the caller's job.

use fablink_shared::{
    try_problem_detail, ApiError, Conversation, CreateConversationRequest, Message, MessagesPage,
    SendMessageRequest, UnreadCountResponse,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// HTTP client for making authenticated API requests.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Configure the bearer credential. Storage and refresh of the token are
    /// owned by the embedding application.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn handle_response<TRes: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<TRes, ApiError> {
        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            let body = try_problem_detail(&text).unwrap_or(text);
            return Err(ApiError::Http { status, body });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.get(self.url(path)));
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        Self::handle_response(resp).await
    }

    /// Make an authenticated POST request with JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.post(self.url(path))).json(body);
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        Self::handle_response(resp).await
    }

    /// Make an authenticated PATCH request with JSON body
    pub async fn patch_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.patch(self.url(path))).json(body);
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        Self::handle_response(resp).await
    }

    // --- Messaging API methods ---

    /// List all conversations the current user participates in.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/api/conversations").await
    }

    /// Fetch one page of message history, newest-first. Callers reverse the
    /// items to ascending order before merging into the store.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagesPage, ApiError> {
        let mut path = format!("/api/conversations/{conversation_id}/messages?limit={limit}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&cursor={cursor}"));
        }
        self.get_json(&path).await
    }

    /// Send a message. An empty (trimmed) body is rejected locally without
    /// making a request.
    pub async fn send_message(&self, conversation_id: &str, body: &str) -> Result<Message, ApiError> {
        if body.trim().is_empty() {
            return Err(ApiError::Validation("message body is empty".to_string()));
        }
        self.post_json(
            &format!("/api/conversations/{conversation_id}/messages"),
            &SendMessageRequest {
                body: body.to_string(),
            },
        )
        .await
    }

    /// Reset the current user's unread counter for a conversation.
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.post_json(&format!("/api/conversations/{conversation_id}/read"), &())
            .await
    }

    /// Open (or return the existing) conversation with another user. The
    /// server is idempotent per participant pair; the store reconciles the
    /// result by ID so no visible duplicate appears.
    pub async fn create_conversation(
        &self,
        other_user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        self.post_json(
            "/api/conversations",
            &CreateConversationRequest {
                other_user_id: other_user_id.to_string(),
                project_id: project_id.map(str::to_string),
            },
        )
        .await
    }

    /// Total unread count across all conversations for the current user.
    pub async fn unread_count(&self) -> Result<UnreadCountResponse, ApiError> {
        self.get_json("/api/conversations/unread-count").await
    }

    /// Touch the current user's "last seen" timestamp.
    pub async fn heartbeat(&self) -> Result<(), ApiError> {
        self.patch_json("/api/me/last-seen", &()).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_body_is_rejected_without_a_request() {
        // base_url left unset on purpose; validation must fire first.
        let client = ApiClient::new();
        let err = client.send_message("c1", "   \n\t ").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn url_joins_base_and_path() {
        let client = ApiClient::new().with_base_url("https://api.fablink.dev/");
        assert_eq!(
            client.url("/api/conversations"),
            "https://api.fablink.dev/api/conversations"
        );
        assert_eq!(client.url("api/conversations"), "https://api.fablink.dev/api/conversations");
    }
}
