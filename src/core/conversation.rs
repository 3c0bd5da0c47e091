//! Conversation state and its synchronization against the chat service.
//!
//! [`ConversationSync`] owns the summary list and the single active
//! conversation. All mutation goes through its operations; surfaces read
//! snapshots and forward intents. Supersession policy for overlapping
//! fetches: every mutating operation advances a generation counter, and a
//! fetch result is applied only if the counter still matches the value
//! captured at dispatch — a later operation silently discards what an
//! earlier in-flight one brings back.

use std::sync::Arc;

use crate::api::{ChatBackend, ConversationSummary};
use crate::core::client::ClientError;
use crate::core::message::Message;

/// One chat thread held in memory. `id` is `None` for a conversation started
/// locally until the server assigns one.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub id: Option<String>,
    pub messages: Vec<Message>,
}

impl Conversation {
    fn new_local() -> Self {
        Self::default()
    }
}

pub struct ConversationSync {
    backend: Arc<dyn ChatBackend>,
    summaries: Vec<ConversationSummary>,
    active: Option<Conversation>,
    busy: bool,
    generation: u64,
}

impl ConversationSync {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            summaries: Vec::new(),
            active: None,
            busy: false,
            generation: 0,
        }
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().and_then(|conv| conv.id.as_deref())
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    fn advance_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Replaces the summary list with the server's. On failure the previous
    /// list stays untouched; there is no partial merge.
    pub async fn refresh_summaries(&mut self) -> Result<(), ClientError> {
        let summaries = self.backend.list_conversations().await?;
        self.summaries = summaries;
        Ok(())
    }

    /// Clears the active conversation locally. The remote copy is untouched.
    pub fn start_new(&mut self) {
        self.advance_generation();
        self.active = None;
    }

    /// Activates a conversation, discarding the previous history from
    /// memory. Selecting the already-active conversation is a no-op.
    pub async fn select(&mut self, id: &str) -> Result<(), ClientError> {
        if self.active_id() == Some(id) {
            return Ok(());
        }
        let generation = self.advance_generation();
        self.busy = true;
        self.active = None;

        let fetched = self.backend.fetch_conversation(id).await;
        self.busy = false;
        if self.generation != generation {
            // Superseded while in flight; the newer operation owns the state.
            return Ok(());
        }

        let detail = fetched?;
        let messages = detail
            .messages
            .into_iter()
            .map(|wire| Message::from_wire(&wire.sender, wire.content, wire.created_at.as_deref()))
            .collect();
        self.active = Some(Conversation {
            id: Some(id.to_string()),
            messages,
        });
        Ok(())
    }

    /// Deletes a conversation remotely. If it was the active one, the local
    /// history is dropped too, and the summary list is refreshed afterwards
    /// so it can never show the deleted thread.
    pub async fn delete(&mut self, id: &str) -> Result<(), ClientError> {
        self.backend.delete_conversation(id).await?;
        self.advance_generation();
        if self.active_id() == Some(id) {
            self.active = None;
        }
        self.refresh_summaries().await
    }

    /// Sends a prompt. Empty or whitespace-only input is a silent no-op.
    ///
    /// The user's message is appended optimistically (to a fresh local
    /// conversation when none is active) and is never rolled back; a failed
    /// call instead appends an assistant-authored error entry carrying the
    /// server or transport message. On success the assistant reply is
    /// appended, and a conversation that had no id adopts the
    /// server-assigned one and triggers a summary refresh so it shows up in
    /// the list.
    pub async fn send(&mut self, text: &str) {
        let prompt = text.trim();
        if prompt.is_empty() {
            return;
        }
        let prompt = prompt.to_string();

        self.advance_generation();
        self.busy = true;
        let conversation = self.active.get_or_insert_with(Conversation::new_local);
        conversation.messages.push(Message::user_now(&prompt));
        let conversation_id = conversation.id.clone();

        let outcome = self
            .backend
            .send_chat(&prompt, conversation_id.as_deref())
            .await;
        self.busy = false;

        match outcome {
            Ok(reply) => {
                if let Some(conversation) = self.active.as_mut() {
                    conversation.messages.push(Message::ai_now(reply.ai_message.content));
                    if conversation.id.is_none() {
                        conversation.id = reply.new_conversation_id;
                        if let Err(err) = self.refresh_summaries().await {
                            tracing::warn!("summary refresh after new conversation failed: {err}");
                        }
                    }
                }
            }
            Err(err) => {
                if let Some(conversation) = self.active.as_mut() {
                    conversation
                        .messages
                        .push(Message::ai_now(format!("⚠️ Error: {}", err.chat_display())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AiMessage, ChatReply, ConversationDetail, WireMessage};
    use crate::core::message::Sender;
    use crate::utils::test_utils::ScriptedBackend;

    fn summary(id: &str, title: &str) -> ConversationSummary {
        ConversationSummary {
            id: id.to_string(),
            title: title.to_string(),
            updated_at: None,
        }
    }

    fn reply(content: &str, new_id: Option<&str>) -> ChatReply {
        ChatReply {
            ai_message: AiMessage {
                content: content.to_string(),
            },
            new_conversation_id: new_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn refresh_replaces_summaries_wholesale() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_list(Ok(vec![summary("c1", "First")]));
        backend.push_list(Ok(vec![summary("c2", "Second"), summary("c3", "Third")]));
        let mut sync = ConversationSync::new(backend);

        sync.refresh_summaries().await.unwrap();
        assert_eq!(sync.summaries().len(), 1);

        sync.refresh_summaries().await.unwrap();
        let ids: Vec<&str> = sync.summaries().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3"]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_previous_list() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_list(Ok(vec![summary("c1", "First")]));
        backend.push_list(Err(ClientError::Network("offline".to_string())));
        let mut sync = ConversationSync::new(backend);

        sync.refresh_summaries().await.unwrap();
        assert!(sync.refresh_summaries().await.is_err());
        assert_eq!(sync.summaries().len(), 1);
        assert_eq!(sync.summaries()[0].id, "c1");
    }

    #[tokio::test]
    async fn selecting_loads_history_and_sets_the_active_id() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail {
            messages: vec![
                WireMessage {
                    sender: "user".to_string(),
                    content: "hi".to_string(),
                    created_at: Some("2024-05-02T09:30:00Z".to_string()),
                },
                WireMessage {
                    sender: "ai".to_string(),
                    content: "hello".to_string(),
                    created_at: None,
                },
            ],
        }));
        let mut sync = ConversationSync::new(backend);

        sync.select("c1").await.unwrap();
        assert_eq!(sync.active_id(), Some("c1"));
        let messages = &sync.active().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Ai);
        assert!(!sync.is_busy());
    }

    #[tokio::test]
    async fn selecting_the_active_conversation_is_a_no_op() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        let mut sync = ConversationSync::new(backend.clone());

        sync.select("c1").await.unwrap();
        sync.select("c1").await.unwrap();
        assert_eq!(backend.calls(), vec!["fetch:c1"]);
    }

    #[tokio::test]
    async fn failed_select_clears_the_active_conversation_and_busy_flag() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        backend.push_fetch(Err(ClientError::Rejected {
            status: 404,
            message: "not found".to_string(),
        }));
        let mut sync = ConversationSync::new(backend);

        sync.select("c1").await.unwrap();
        assert!(sync.select("c2").await.is_err());
        assert!(sync.active().is_none());
        assert!(!sync.is_busy());
    }

    #[tokio::test]
    async fn empty_input_is_a_silent_no_op() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut sync = ConversationSync::new(backend.clone());

        sync.send("").await;
        sync.send("   ").await;
        assert!(sync.active().is_none());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_input_leaves_an_open_conversation_untouched() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        let mut sync = ConversationSync::new(backend.clone());

        sync.select("c1").await.unwrap();
        sync.send("   ").await;
        assert_eq!(sync.active().unwrap().messages.len(), 0);
        assert_eq!(backend.calls(), vec!["fetch:c1"]);
    }

    #[tokio::test]
    async fn sending_without_an_active_conversation_adopts_the_new_id() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Ok(reply("hello", Some("c1"))));
        backend.push_list(Ok(vec![summary("c1", "hi")]));
        let mut sync = ConversationSync::new(backend.clone());

        sync.send("hi").await;

        assert_eq!(sync.active_id(), Some("c1"));
        let messages = &sync.active().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].raw_content, "hi");
        assert_eq!(messages[1].sender, Sender::Ai);
        assert_eq!(messages[1].raw_content, "hello");
        // The refresh was triggered so the new conversation shows up.
        assert_eq!(backend.calls(), vec!["chat:hi", "list"]);
        assert_eq!(sync.summaries().len(), 1);
    }

    #[tokio::test]
    async fn sending_into_an_existing_conversation_does_not_refresh() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        backend.push_chat(Ok(reply("sure", None)));
        let mut sync = ConversationSync::new(backend.clone());

        sync.select("c1").await.unwrap();
        sync.send("again").await;

        assert_eq!(sync.active_id(), Some("c1"));
        assert_eq!(backend.calls(), vec!["fetch:c1", "chat:again"]);
    }

    #[tokio::test]
    async fn failed_send_keeps_the_user_message_and_appends_an_error_entry() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_chat(Err(ClientError::Rejected {
            status: 429,
            message: "quota exceeded".to_string(),
        }));
        let mut sync = ConversationSync::new(backend);

        sync.send("hi").await;

        let messages = &sync.active().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].raw_content, "hi");
        assert_eq!(messages[1].sender, Sender::Ai);
        assert!(messages[1].raw_content.contains("quota exceeded"));
        assert!(!sync.is_busy());
    }

    #[tokio::test]
    async fn deleting_the_active_conversation_clears_it_and_refreshes() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        backend.push_delete(Ok(()));
        backend.push_list(Ok(vec![]));
        let mut sync = ConversationSync::new(backend.clone());

        sync.select("c1").await.unwrap();
        sync.delete("c1").await.unwrap();

        assert!(sync.active().is_none());
        assert_eq!(backend.calls(), vec!["fetch:c1", "delete:c1", "list"]);
    }

    #[tokio::test]
    async fn deleting_another_conversation_keeps_the_active_one() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        backend.push_delete(Ok(()));
        backend.push_list(Ok(vec![summary("c1", "kept")]));
        let mut sync = ConversationSync::new(backend);

        sync.select("c1").await.unwrap();
        sync.delete("c2").await.unwrap();
        assert_eq!(sync.active_id(), Some("c1"));
    }

    #[tokio::test]
    async fn failed_delete_leaves_state_untouched() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        backend.push_delete(Err(ClientError::Network("offline".to_string())));
        let mut sync = ConversationSync::new(backend.clone());

        sync.select("c1").await.unwrap();
        assert!(sync.delete("c1").await.is_err());
        assert_eq!(sync.active_id(), Some("c1"));
        // No refresh after a failed delete.
        assert_eq!(backend.calls(), vec!["fetch:c1", "delete:c1"]);
    }

    #[tokio::test]
    async fn start_new_discards_only_local_state() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fetch(Ok(ConversationDetail { messages: vec![] }));
        let mut sync = ConversationSync::new(backend.clone());

        sync.select("c1").await.unwrap();
        sync.start_new();
        assert!(sync.active().is_none());
        assert_eq!(backend.calls(), vec!["fetch:c1"]);
    }
}
