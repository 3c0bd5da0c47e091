//! Chat service wire payloads and typed routes.
//!
//! [`ChatBackend`] is the seam between the conversation synchronizer and the
//! transport: production code goes through [`ChatApi`] over the tokened
//! client, tests script the trait directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::client::{ClientError, TokenedClient};

/// Lightweight listing entry for a stored chat thread. The server's order is
/// authoritative and is never re-sorted client-side.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Full history of one conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDetail {
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub ai_message: AiMessage,
    #[serde(default)]
    pub new_conversation_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiMessage {
    pub content: String,
}

/// The chat service routes the synchronizer depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError>;

    async fn fetch_conversation(&self, id: &str) -> Result<ConversationDetail, ClientError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError>;

    async fn send_chat(
        &self,
        prompt: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ClientError>;

    async fn resend_verification(&self) -> Result<(), ClientError>;
}

/// Production [`ChatBackend`] over the bearer-authenticated client.
#[derive(Clone)]
pub struct ChatApi {
    client: TokenedClient,
}

impl ChatApi {
    pub fn new(client: TokenedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatBackend for ChatApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.client.get_json("conversations").await
    }

    async fn fetch_conversation(&self, id: &str) -> Result<ConversationDetail, ClientError> {
        self.client.get_json(&format!("conversations/{id}")).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ClientError> {
        self.client.delete(&format!("conversations/{id}")).await
    }

    async fn send_chat(
        &self,
        prompt: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ClientError> {
        let request = ChatRequest {
            prompt: prompt.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        };
        self.client.post_json("chat", &request).await
    }

    async fn resend_verification(&self) -> Result<(), ClientError> {
        self.client
            .call(
                reqwest::Method::POST,
                "auth/resend-verification",
                Some(&serde_json::json!({})),
            )
            .await?;
        Ok(())
    }
}
