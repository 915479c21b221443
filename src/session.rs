//! Chat session state.
//!
//! A [`Session`] owns everything that changes while chatting: settings, the
//! knowledge base, the conversation history, and usage totals. It is driven
//! from one control task. The only concurrent piece is the outbound request,
//! which runs on its own tokio task and hands its result back through a
//! single in-flight slot; the session applies that result in [`Session::finish`].
//!
//! A second [`Session::submit`] while a request is in flight is rejected with
//! [`ChatError::Busy`]. History and usage change only when a request
//! succeeds.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ChatReply, ChatRequest, ChatTransport, HttpTransport};
use crate::config::{Config, API_KEY_ENV};
use crate::error::ChatError;
use crate::models::{ConversationMessage, ImageSource, MessageContent, Role};
use crate::prompt::{assemble_user_turn, user_question};
use crate::search::SearchOptions;
use crate::settings::Settings;
use crate::store::DocumentStore;
use crate::usage::UsageAccumulator;

const SUMMARY_REQUEST: &str = "Please summarize our previous conversation";

struct InFlight {
    turn: ConversationMessage,
    handle: JoinHandle<Result<ChatReply, ChatError>>,
}

pub struct Session {
    config: Config,
    settings: Settings,
    store: DocumentStore,
    history: Vec<ConversationMessage>,
    usage: UsageAccumulator,
    transport: Arc<dyn ChatTransport>,
    api_key_override: Option<String>,
    web_search: bool,
    in_flight: Option<InFlight>,
}

impl Session {
    pub fn new(
        config: Config,
        settings: Settings,
        store: DocumentStore,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            web_search: config.api.web_search,
            config,
            settings,
            store,
            history: Vec::new(),
            usage: UsageAccumulator::new(),
            transport,
            api_key_override: None,
            in_flight: None,
        }
    }

    /// Load settings and the knowledge base from the locations in `config`
    /// and connect the HTTP transport.
    pub fn open(config: Config) -> Result<Self> {
        let settings = Settings::load(&config.settings.path);
        let store = DocumentStore::load(
            &config.knowledge_base.dir,
            &config.knowledge_base.include_globs,
        )
        .with_context(|| {
            format!(
                "Failed to load knowledge base: {}",
                config.knowledge_base.dir.display()
            )
        })?;
        let transport = HttpTransport::new(&config.api)?;

        let mut session = Self::new(config, settings, store, Arc::new(transport));
        session.api_key_override = std::env::var(API_KEY_ENV).ok();
        Ok(session)
    }

    pub fn with_api_key_override(mut self, key: Option<String>) -> Self {
        self.api_key_override = key;
        self
    }

    pub fn api_key(&self) -> Option<String> {
        self.settings
            .effective_api_key(self.api_key_override.clone())
    }

    /// Dispatch `message` (plus any images) on a background task.
    ///
    /// Fails without dispatching when no API key is configured or a request
    /// is already in flight.
    pub fn submit(&mut self, message: &str, images: &[ImageSource]) -> Result<(), ChatError> {
        if self.in_flight.is_some() {
            return Err(ChatError::Busy);
        }
        let api_key = self.api_key().ok_or(ChatError::MissingApiKey)?;

        let turn = assemble_user_turn(
            &self.store,
            message,
            images,
            self.config.retrieval.max_results,
            &SearchOptions::from(&self.config.retrieval),
        );

        let mut messages = self.history.clone();
        messages.push(turn.clone());
        let request = ChatRequest::new(
            &self.config.api,
            messages,
            &self.settings.system_prompt,
            self.config.api.prompt_caching,
        )
        .with_web_search(self.web_search);

        debug!(
            history = self.history.len(),
            images = images.len(),
            "dispatching chat request"
        );
        let transport = Arc::clone(&self.transport);
        let handle = tokio::spawn(async move { transport.complete(&api_key, &request).await });

        self.in_flight = Some(InFlight { turn, handle });
        Ok(())
    }

    pub fn web_search(&self) -> bool {
        self.web_search
    }

    /// Flip the web search hint for later requests; returns the new state.
    pub fn toggle_web_search(&mut self) -> bool {
        self.web_search = !self.web_search;
        self.web_search
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Wait for the in-flight request and apply its result.
    ///
    /// Cancel-safe: dropping this future leaves the request in flight.
    pub async fn finish(&mut self) -> Result<String, ChatError> {
        let joined = match self.in_flight.as_mut() {
            Some(in_flight) => (&mut in_flight.handle).await,
            None => return Err(ChatError::Idle),
        };
        let turn = match self.in_flight.take() {
            Some(in_flight) => in_flight.turn,
            None => return Err(ChatError::Idle),
        };

        let reply = match joined {
            Ok(result) => result?,
            Err(e) if e.is_cancelled() => return Err(ChatError::Cancelled),
            Err(e) => return Err(ChatError::TaskFailed(e.to_string())),
        };

        if let Some(usage) = &reply.usage {
            self.usage.add(usage);
        }
        self.history.push(turn);
        self.history.push(ConversationMessage::assistant(reply.content.clone()));
        Ok(reply.content)
    }

    /// Abort the in-flight request, if any. Returns whether one was aborted.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.handle.abort();
                info!("chat request cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn send(&mut self, message: &str, images: &[ImageSource]) -> Result<String, ChatError> {
        self.submit(message, images)?;
        self.finish().await
    }

    /// Ask the model for a short summary of the conversation so far.
    ///
    /// Caching is disabled for this one-off request. Usage is recorded; the
    /// history is left alone (see [`Session::replace_with_summary`]).
    pub async fn summarize(&mut self) -> Result<String, ChatError> {
        if self.history.is_empty() {
            return Err(ChatError::EmptyConversation);
        }
        if self.in_flight.is_some() {
            return Err(ChatError::Busy);
        }
        let api_key = self.api_key().ok_or(ChatError::MissingApiKey)?;

        let request = ChatRequest::new(
            &self.config.api,
            vec![ConversationMessage::user(MessageContent::Text(
                summary_prompt(&self.history),
            ))],
            &self.settings.system_prompt,
            false,
        )
        .with_web_search(self.web_search);
        let reply = self.transport.complete(&api_key, &request).await?;
        if let Some(usage) = &reply.usage {
            self.usage.add(usage);
        }
        Ok(reply.content)
    }

    /// Replace the history with a two-turn summary exchange.
    pub fn replace_with_summary(&mut self, summary: &str) {
        self.history = vec![
            ConversationMessage::user(MessageContent::Text(SUMMARY_REQUEST.to_string())),
            ConversationMessage::assistant(summary),
        ];
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn load_history(&mut self, messages: Vec<ConversationMessage>) {
        self.history = messages;
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn usage(&self) -> &UsageAccumulator {
        &self.usage
    }

    pub fn usage_summary(&self) -> String {
        self.usage.summary_line(&self.config.pricing)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn save_settings(&self) -> Result<()> {
        self.settings.save(&self.config.settings.path)
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DocumentStore {
        &mut self.store
    }
}

fn summary_prompt(history: &[ConversationMessage]) -> String {
    let mut conversation = String::new();
    for msg in history {
        let text = msg.content.text();
        let text = match msg.role {
            Role::User => user_question(&text),
            Role::Assistant => text.as_str(),
        };
        if text.trim().is_empty() {
            continue;
        }
        conversation.push_str(&format!("{}: {}\n\n", msg.role, text));
    }
    format!(
        "Briefly summarize the core of the following conversation, pulling out the key \
         information and important conclusions:\n\n{}\
         Use 2-3 paragraphs of no more than 50 words each.",
        conversation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::Usage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Transport that replays canned results and records requests.
    struct ScriptedTransport {
        replies: Mutex<Vec<Result<ChatReply, ChatError>>>,
        seen: Mutex<Vec<ChatRequest>>,
        delay: Option<std::time::Duration>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<ChatReply, ChatError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow() -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(vec![Ok(reply("late", None))]),
                seen: Mutex::new(Vec::new()),
                delay: Some(std::time::Duration::from_secs(30)),
            })
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn complete(
            &self,
            _api_key: &str,
            request: &ChatRequest,
        ) -> Result<ChatReply, ChatError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn reply(content: &str, usage: Option<Usage>) -> ChatReply {
        ChatReply {
            content: content.to_string(),
            usage,
        }
    }

    fn session(transport: Arc<ScriptedTransport>, tmp: &TempDir) -> Session {
        let mut store = DocumentStore::empty(tmp.path());
        store
            .add("notes.txt", "The quick brown fox. The fox jumps.")
            .unwrap();
        Session::new(Config::default(), Settings::default(), store, transport)
            .with_api_key_override(Some("test-key".into()))
    }

    #[tokio::test]
    async fn success_appends_both_turns_and_usage() {
        let tmp = TempDir::new().unwrap();
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            cache_creation_input_tokens: 5,
            cache_read_input_tokens: 7,
        };
        let transport = ScriptedTransport::new(vec![Ok(reply("hi there", Some(usage)))]);
        let mut s = session(transport.clone(), &tmp);

        let text = s.send("hello", &[]).await.unwrap();
        assert_eq!(text, "hi there");
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[0].role, Role::User);
        assert_eq!(s.history()[0].content, MessageContent::Text("hello".into()));
        assert_eq!(s.history()[1], ConversationMessage::assistant("hi there"));
        assert_eq!(s.usage().input_tokens, 100);
        assert_eq!(s.usage().cache_read_tokens, 7);
        assert!(!s.is_busy());
    }

    #[tokio::test]
    async fn request_carries_history_and_retrieved_context() {
        let tmp = TempDir::new().unwrap();
        let transport =
            ScriptedTransport::new(vec![Ok(reply("one", None)), Ok(reply("two", None))]);
        let mut s = session(transport.clone(), &tmp);
        s.settings_mut().system_prompt = "be brief".into();

        s.send("first", &[]).await.unwrap();
        s.send("fox", &[]).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second.messages.len(), 3);
        assert!(second.messages[2]
            .content
            .text()
            .contains("Source: notes.txt"));
        assert!(second.wants_cache());
        assert_eq!(second.max_tokens, 4096);
    }

    #[tokio::test]
    async fn api_error_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![Err(ChatError::Api {
            status: 401,
            body: "unauthorized".into(),
        })]);
        let mut s = session(transport, &tmp);

        let err = s.send("hello", &[]).await.unwrap_err();
        match err {
            ChatError::Api { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(s.history().is_empty());
        assert_eq!(*s.usage(), UsageAccumulator::new());
        assert!(!s.is_busy());
    }

    #[tokio::test]
    async fn missing_key_is_not_dispatched() {
        let tmp = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(Vec::new());
        let mut s = session(transport.clone(), &tmp).with_api_key_override(None);

        assert!(matches!(
            s.submit("hello", &[]),
            Err(ChatError::MissingApiKey)
        ));
        assert!(!s.is_busy());
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_submit_while_busy_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(ScriptedTransport::slow(), &tmp);

        s.submit("one", &[]).unwrap();
        assert!(matches!(s.submit("two", &[]), Err(ChatError::Busy)));
        assert!(s.cancel());
        assert!(!s.is_busy());
        assert!(s.history().is_empty());
    }

    #[tokio::test]
    async fn dropped_finish_keeps_request_in_flight() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(ScriptedTransport::slow(), &tmp);
        s.submit("one", &[]).unwrap();

        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), s.finish()).await;
        assert!(timed_out.is_err());
        assert!(s.is_busy());
        s.cancel();
    }

    #[tokio::test]
    async fn finish_without_request_is_idle() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(ScriptedTransport::new(Vec::new()), &tmp);
        assert!(matches!(s.finish().await, Err(ChatError::Idle)));
    }

    #[tokio::test]
    async fn summarize_does_not_touch_history() {
        let tmp = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![
            Ok(reply("answer", None)),
            Ok(reply(
                "short summary",
                Some(Usage {
                    prompt_tokens: 9,
                    ..Default::default()
                }),
            )),
        ]);
        let mut s = session(transport.clone(), &tmp);
        s.send("question", &[]).await.unwrap();

        let summary = s.summarize().await.unwrap();
        assert_eq!(summary, "short summary");
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.usage().input_tokens, 9);

        let seen = transport.seen.lock().unwrap();
        let req = &seen[1];
        assert_eq!(req.messages.len(), 1);
        assert!(req.messages[0].content.text().contains("user: question"));
        assert!(!req.wants_cache());
        drop(seen);

        s.replace_with_summary(&summary);
        assert_eq!(s.history().len(), 2);
        assert_eq!(
            s.history()[1],
            ConversationMessage::assistant("short summary")
        );
    }

    #[tokio::test]
    async fn summary_prompt_uses_literal_user_message() {
        let tmp = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![
            Ok(reply("foxes are quick", None)),
            Ok(reply("summary", None)),
        ]);
        let mut s = session(transport.clone(), &tmp);
        s.send("fox", &[]).await.unwrap();
        assert!(s.history()[0].content.text().contains("Source: notes.txt"));

        s.summarize().await.unwrap();
        let seen = transport.seen.lock().unwrap();
        let prompt = seen[1].messages[0].content.text();
        assert!(prompt.contains("user: fox\n\nassistant: foxes are quick\n\n"));
        assert!(!prompt.contains("Relevant knowledge base content"));
        assert!(!prompt.contains("The quick brown fox"));
    }

    #[tokio::test]
    async fn web_search_toggle_adds_system_hint() {
        let tmp = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![
            Ok(reply("one", None)),
            Ok(reply("two", None)),
            Ok(reply("summary", None)),
        ]);
        let mut s = session(transport.clone(), &tmp);
        s.settings_mut().system_prompt = "be brief".into();
        assert!(!s.web_search());

        s.send("first", &[]).await.unwrap();
        assert!(s.toggle_web_search());
        s.send("second", &[]).await.unwrap();
        s.summarize().await.unwrap();

        let seen = transport.seen.lock().unwrap();
        let blocks = |i: usize| seen[i].system.as_ref().map(|b| b.len()).unwrap_or(0);
        assert_eq!(blocks(0), 1);
        assert_eq!(blocks(1), 2);
        assert_eq!(blocks(2), 2);
        let second = seen[1].system.as_ref().unwrap();
        assert!(second[0].cache_control.is_some());
        assert!(second[1].cache_control.is_none());
        drop(seen);

        assert!(!s.toggle_web_search());
    }

    #[tokio::test]
    async fn summarize_empty_history_fails() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(ScriptedTransport::new(Vec::new()), &tmp);
        assert!(matches!(
            s.summarize().await,
            Err(ChatError::EmptyConversation)
        ));
    }

    #[tokio::test]
    async fn clear_empties_history() {
        let tmp = TempDir::new().unwrap();
        let transport = ScriptedTransport::new(vec![Ok(reply("x", None))]);
        let mut s = session(transport, &tmp);
        s.send("q", &[]).await.unwrap();
        s.clear();
        assert!(s.history().is_empty());
    }
}
