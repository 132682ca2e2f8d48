use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::GenerateError;
use crate::observability::{create_trace_sink, TraceEvent, TraceSink};
use crate::providers::{self, ChatMessage, Provider};
use crate::sessions::{create_session_store, ConversationEntry, SessionId, SessionStore};
use crate::templates::{create_template_loader, TemplateLoader};

/// Template field that receives the caller's free-form input.
pub const HUMAN_INPUT_FIELD: &str = "human_input";

/// Template name recorded in traces for caller-written prompts.
pub const RAW_PROMPT_TRACE_NAME: &str = "(prompt)";

/// Model and template defaults for a [`Generator`].
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub provider_name: String,
    pub model: String,
    pub temperature: f64,
    pub default_template: String,
    /// Upper bound on one model call.
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            provider_name: "openai".into(),
            model: "gpt-4".into(),
            temperature: 0.7,
            default_template: crate::templates::BUNDLED_TEMPLATE_NAME.into(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Runs generation turns against per-session conversation memory.
///
/// The generator never holds a store or history lock across the model call.
/// A turn touches the store twice: a read-only lookup to snapshot the history
/// before the call, and a get-or-create to append the finished turn after a
/// successful one.
pub struct Generator {
    store: Arc<dyn SessionStore>,
    templates: Arc<dyn TemplateLoader>,
    provider: Arc<dyn Provider>,
    traces: Arc<dyn TraceSink>,
    options: GenerationOptions,
}

impl Generator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        templates: Arc<dyn TemplateLoader>,
        provider: Arc<dyn Provider>,
        traces: Arc<dyn TraceSink>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            store,
            templates,
            provider,
            traces,
            options,
        }
    }

    /// Wire every component from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let provider_name = config.default_provider.as_deref().unwrap_or("openai");
        let provider = providers::create_provider(
            provider_name,
            config.api_key.as_deref(),
            config.api_url.as_deref(),
            config.provider.timeout(),
        )?;

        let options = GenerationOptions {
            provider_name: provider_name.to_string(),
            model: config
                .default_model
                .clone()
                .unwrap_or_else(|| "gpt-4".into()),
            temperature: config.default_temperature,
            default_template: config.templates.default_template.clone(),
            timeout: config.provider.timeout(),
        };

        tracing::debug!(
            provider = provider_name,
            model = %options.model,
            templates = %config.templates_dir().display(),
            "Generator configured"
        );

        Ok(Self::new(
            create_session_store(&config.sessions),
            create_template_loader(&config.templates_dir()),
            provider,
            create_trace_sink(&config.observability, &config.workspace_dir),
            options,
        ))
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn templates(&self) -> &Arc<dyn TemplateLoader> {
        &self.templates
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Keep a caller-supplied session id, or mint a fresh one.
    pub fn begin_or_resume(&self, session_id: Option<&str>) -> SessionId {
        session_id
            .and_then(SessionId::parse)
            .unwrap_or_else(SessionId::generate)
    }

    /// Run one turn with the default template.
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        fields: HashMap<String, String>,
        human_input: &str,
    ) -> Result<String, GenerateError> {
        self.run_turn_with(session_id, None, fields, human_input)
            .await
    }

    /// Run one turn, optionally naming the template.
    ///
    /// Nothing is appended to the session unless the model call succeeds.
    pub async fn run_turn_with(
        &self,
        session_id: &SessionId,
        template_name: Option<&str>,
        mut fields: HashMap<String, String>,
        human_input: &str,
    ) -> Result<String, GenerateError> {
        let template_name = template_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.options.default_template);
        let template = self.templates.load(template_name).await?;

        if template.declares(HUMAN_INPUT_FIELD) {
            fields.insert(HUMAN_INPUT_FIELD.to_string(), human_input.to_string());
        }
        let prompt = template.fill(&fields)?;

        self.complete_turn(session_id, template.name(), prompt, human_input)
            .await
    }

    /// Run one turn with a caller-written prompt instead of a template.
    ///
    /// The prompt is sent verbatim and stored as the human entry. A blank
    /// prompt falls back to the default template with no fields.
    pub async fn run_prompt(
        &self,
        session_id: &SessionId,
        prompt: &str,
    ) -> Result<String, GenerateError> {
        if prompt.trim().is_empty() {
            return self
                .run_turn_with(session_id, None, HashMap::new(), "")
                .await;
        }
        self.complete_turn(session_id, RAW_PROMPT_TRACE_NAME, prompt.to_string(), prompt)
            .await
    }

    async fn complete_turn(
        &self,
        session_id: &SessionId,
        template_name: &str,
        prompt: String,
        human_input: &str,
    ) -> Result<String, GenerateError> {
        // Lookup only: a turn that fails must not create the session.
        let mut messages: Vec<ChatMessage> = self
            .store
            .get(session_id)
            .map(|history| history.snapshot())
            .unwrap_or_default()
            .iter()
            .map(ChatMessage::from)
            .collect();
        messages.push(ChatMessage::user(prompt.as_str()));

        tracing::debug!(
            session_id = %session_id,
            template = template_name,
            prior_entries = messages.len() - 1,
            "Sending turn to model"
        );

        let started_at = Utc::now();
        let result = match tokio::time::timeout(
            self.options.timeout,
            self.provider
                .chat_with_history(&messages, &self.options.model, self.options.temperature),
        )
        .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(GenerateError::Upstream(providers::sanitize_api_error(
                &format!("{e:#}"),
            ))),
            Err(_) => Err(GenerateError::Upstream(format!(
                "{} did not respond within {}s",
                self.provider.name(),
                self.options.timeout.as_secs()
            ))),
        };
        let finished_at = Utc::now();

        if let Ok(text) = &result {
            let human = (!human_input.trim().is_empty())
                .then(|| ConversationEntry::human(human_input));
            self.store
                .get_or_create(session_id)
                .append_turn(human, ConversationEntry::assistant(text.as_str()));
        }

        let (output, error) = match &result {
            Ok(text) => (Some(text.clone()), None),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Generation turn failed");
                (None, Some(e.to_string()))
            }
        };
        self.traces.record(&TraceEvent {
            session_id: session_id.to_string(),
            template: template_name.to_string(),
            model: self.options.model.clone(),
            input: prompt,
            success: output.is_some(),
            output,
            error,
            started_at,
            finished_at,
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopTraceSink;
    use crate::sessions::{InMemorySessionStore, Role};
    use crate::templates::InMemoryTemplateLoader;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies "T1", "T2", … and records every message list it receives.
    #[derive(Default)]
    struct ScriptedProvider {
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat_with_history(
            &self,
            messages: &[ChatMessage],
            _model: &str,
            _temperature: f64,
        ) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                anyhow::bail!("openai API error (429): quota exceeded");
            }
            Ok(format!("T{n}"))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<TraceEvent>>,
    }

    impl TraceSink for RecordingSink {
        fn record(&self, event: &TraceEvent) {
            self.events.lock().push(event.clone());
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct Harness {
        generator: Generator,
        provider: Arc<ScriptedProvider>,
        sink: Arc<RecordingSink>,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let provider = Arc::new(provider);
        let sink = Arc::new(RecordingSink::default());
        let templates = InMemoryTemplateLoader::new()
            .with_template("brief", "Write a brief about {overview}.")
            .with_template("chat", "Context: {overview}\nUser: {human_input}");
        let generator = Generator::new(
            Arc::new(InMemorySessionStore::default()),
            Arc::new(templates),
            provider.clone(),
            sink.clone(),
            GenerationOptions {
                default_template: "brief".into(),
                timeout: Duration::from_secs(5),
                ..GenerationOptions::default()
            },
        );
        Harness {
            generator,
            provider,
            sink,
        }
    }

    fn overview(text: &str) -> HashMap<String, String> {
        HashMap::from([("overview".to_string(), text.to_string())])
    }

    #[test]
    fn begin_or_resume_keeps_given_id() {
        let h = harness(ScriptedProvider::default());
        assert_eq!(h.generator.begin_or_resume(Some("u1")).as_str(), "u1");
    }

    #[test]
    fn begin_or_resume_mints_fresh_ids() {
        let h = harness(ScriptedProvider::default());
        let a = h.generator.begin_or_resume(None);
        let b = h.generator.begin_or_resume(Some("  "));
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[tokio::test]
    async fn first_turn_records_assistant_reply() {
        let h = harness(ScriptedProvider::default());
        let u1 = SessionId::from("u1");

        let text = h.generator.run_turn(&u1, overview("X"), "").await.unwrap();
        assert_eq!(text, "T1");

        let history = h.generator.store().history_of(&u1).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].content, "T1");
    }

    #[tokio::test]
    async fn minted_session_records_first_reply() {
        let h = harness(ScriptedProvider::default());
        let id = h.generator.begin_or_resume(None);

        let text = h.generator.run_turn(&id, overview("X"), "").await.unwrap();
        assert_eq!(text, "T1");

        let history = h.generator.store().history_of(&id).unwrap();
        let contents: Vec<(Role, &str)> = history
            .iter()
            .map(|e| (e.role, e.content.as_str()))
            .collect();
        assert_eq!(contents, [(Role::Assistant, "T1")]);
    }

    #[tokio::test]
    async fn failed_anonymous_turns_create_no_sessions() {
        let h = harness(ScriptedProvider {
            fail: true,
            ..ScriptedProvider::default()
        });

        for _ in 0..3 {
            let id = h.generator.begin_or_resume(None);
            assert!(h.generator.run_turn(&id, overview("X"), "hi").await.is_err());
        }
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.generator.store().session_count(), 0);
    }

    #[tokio::test]
    async fn failed_turn_keeps_existing_history() {
        let h = harness(ScriptedProvider::default());
        let u1 = SessionId::from("u1");
        h.generator.run_turn(&u1, overview("X"), "").await.unwrap();

        let failing = Generator::new(
            h.generator.store().clone(),
            h.generator.templates().clone(),
            Arc::new(ScriptedProvider {
                fail: true,
                ..ScriptedProvider::default()
            }),
            Arc::new(NoopTraceSink),
            h.generator.options().clone(),
        );
        assert!(failing.run_turn(&u1, overview("Y"), "more").await.is_err());

        let history = h.generator.store().history_of(&u1).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "T1");
    }

    #[tokio::test]
    async fn raw_prompt_skips_template_and_joins_history() {
        let h = harness(ScriptedProvider::default());
        let u1 = SessionId::from("u1");

        h.generator.run_turn(&u1, overview("X"), "").await.unwrap();
        let text = h
            .generator
            .run_prompt(&u1, "Draft a PRD for a habit tracker")
            .await
            .unwrap();
        assert_eq!(text, "T2");

        let seen = h.provider.seen.lock();
        assert_eq!(
            seen[1],
            vec![
                ChatMessage::assistant("T1"),
                ChatMessage::user("Draft a PRD for a habit tracker")
            ]
        );
        drop(seen);

        let history = h.generator.store().history_of(&u1).unwrap();
        let contents: Vec<(Role, &str)> = history
            .iter()
            .map(|e| (e.role, e.content.as_str()))
            .collect();
        assert_eq!(
            contents,
            [
                (Role::Assistant, "T1"),
                (Role::Human, "Draft a PRD for a habit tracker"),
                (Role::Assistant, "T2")
            ]
        );

        let events = h.sink.events.lock();
        assert_eq!(events[1].template, RAW_PROMPT_TRACE_NAME);
        assert_eq!(events[1].input, "Draft a PRD for a habit tracker");
    }

    #[tokio::test]
    async fn blank_raw_prompt_uses_default_template() {
        let h = harness(ScriptedProvider::default());
        let err = h
            .generator
            .run_prompt(&SessionId::from("u1"), "   ")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerateError::MissingVariable {
                template: "brief".into(),
                variable: "overview".into()
            }
        );
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_turn_sends_prior_history() {
        let h = harness(ScriptedProvider::default());
        let u1 = SessionId::from("u1");

        h.generator.run_turn(&u1, overview("X"), "").await.unwrap();
        h.generator
            .run_turn(&u1, overview("Y"), "add metrics")
            .await
            .unwrap();

        let seen = h.provider.seen.lock();
        assert_eq!(seen[0], vec![ChatMessage::user("Write a brief about X.")]);
        assert_eq!(
            seen[1],
            vec![
                ChatMessage::assistant("T1"),
                ChatMessage::user("Write a brief about Y.")
            ]
        );
        drop(seen);

        let history = h.generator.store().history_of(&u1).unwrap();
        let contents: Vec<(Role, &str)> = history
            .iter()
            .map(|e| (e.role, e.content.as_str()))
            .collect();
        assert_eq!(
            contents,
            [
                (Role::Assistant, "T1"),
                (Role::Human, "add metrics"),
                (Role::Assistant, "T2")
            ]
        );
    }

    #[tokio::test]
    async fn missing_variable_skips_model_and_history() {
        let h = harness(ScriptedProvider::default());
        let u1 = SessionId::from("u1");

        let err = h
            .generator
            .run_turn(&u1, HashMap::new(), "hello")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerateError::MissingVariable {
                template: "brief".into(),
                variable: "overview".into()
            }
        );
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            h.generator.store().history_of(&u1),
            Err(GenerateError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_template_is_missing_template() {
        let h = harness(ScriptedProvider::default());
        let err = h
            .generator
            .run_turn_with(&SessionId::from("u1"), Some("nope"), overview("X"), "")
            .await
            .unwrap_err();
        assert_eq!(err, GenerateError::MissingTemplate("nope".into()));
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_failure_leaves_history_unchanged() {
        let h = harness(ScriptedProvider {
            fail: true,
            ..ScriptedProvider::default()
        });
        let u1 = SessionId::from("u1");

        let err = h
            .generator
            .run_turn(&u1, overview("X"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Upstream(ref m) if m.contains("quota")));
        assert_eq!(
            h.generator.store().history_of(&u1),
            Err(GenerateError::SessionNotFound("u1".into()))
        );

        let events = h.sink.events.lock();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(events[0].output.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out_as_upstream_error() {
        let h = harness(ScriptedProvider {
            delay: Some(Duration::from_secs(60)),
            ..ScriptedProvider::default()
        });
        let u1 = SessionId::from("u1");

        let err = h
            .generator
            .run_turn(&u1, overview("X"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Upstream(ref m) if m.contains("within 5s")));
        assert_eq!(
            h.generator.store().history_of(&u1),
            Err(GenerateError::SessionNotFound("u1".into()))
        );
        assert_eq!(h.generator.store().session_count(), 0);
    }

    #[tokio::test]
    async fn human_input_fills_declared_field() {
        let h = harness(ScriptedProvider::default());
        let u1 = SessionId::from("u1");

        h.generator
            .run_turn_with(&u1, Some("chat"), overview("launch"), "keep it short")
            .await
            .unwrap();

        let seen = h.provider.seen.lock();
        assert_eq!(
            seen[0].last().unwrap().content,
            "Context: launch\nUser: keep it short"
        );
    }

    #[tokio::test]
    async fn successful_turn_is_traced() {
        let h = harness(ScriptedProvider::default());
        h.generator
            .run_turn(&SessionId::from("u7"), overview("X"), "")
            .await
            .unwrap();

        let events = h.sink.events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
        assert_eq!(events[0].session_id, "u7");
        assert_eq!(events[0].template, "brief");
        assert_eq!(events[0].input, "Write a brief about X.");
        assert_eq!(events[0].output.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn sessions_do_not_share_history() {
        let h = harness(ScriptedProvider::default());
        let a = SessionId::from("a");
        let b = SessionId::from("b");

        h.generator.run_turn(&a, overview("X"), "").await.unwrap();
        h.generator.run_turn(&b, overview("Y"), "").await.unwrap();

        let seen = h.provider.seen.lock();
        assert_eq!(seen[1].len(), 1);
        drop(seen);
        assert_eq!(h.generator.store().history_of(&a).unwrap().len(), 1);
        assert_eq!(h.generator.store().history_of(&b).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn noop_sink_is_accepted() {
        let generator = Generator::new(
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InMemoryTemplateLoader::new().with_template("brief", "static")),
            Arc::new(ScriptedProvider::default()),
            Arc::new(NoopTraceSink),
            GenerationOptions {
                default_template: "brief".into(),
                ..GenerationOptions::default()
            },
        );
        let text = generator
            .run_turn(&SessionId::from("s"), HashMap::new(), "")
            .await
            .unwrap();
        assert_eq!(text, "T1");
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_do_not_interleave() {
        let h = Arc::new(harness(ScriptedProvider::default()));
        let u1 = SessionId::from("u1");

        let mut handles = Vec::new();
        for n in 0..8 {
            let h = h.clone();
            let id = u1.clone();
            handles.push(tokio::spawn(async move {
                h.generator
                    .run_turn(&id, overview("X"), &format!("q{n}"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let history = h.generator.store().history_of(&u1).unwrap();
        assert_eq!(history.len(), 16);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, Role::Human);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }
}
