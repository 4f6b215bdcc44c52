use std::{
    collections::HashMap,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, LazyLock},
};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc::Receiver, watch};

use crate::{
    APP_DATA_DIR, LLM_CHAT_MODEL_DEFAULT, LLM_CHAT_TEMPERATURE_DEFAULT, LLM_MODEL_PREFIX_DEFAULT,
    REQUEST_TIMEOUT_MS_DEFAULT,
    error::{NxchatError, NxchatResult},
    llm::{
        provider::{ChatProvider, open_ai::OpenAiProvider},
        tool::ToolRegistry,
    },
    locale::Lang,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[default]
    OpenAI,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: Protocol,
    pub base_url: String,
    pub api_key: String,
    pub lang: Lang,
    pub model_config: ModelConfig,
    pub request_timeout_ms: u64,
    pub disable_list_models: bool,
    pub model_prefix: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub top_p: f64,
    pub stream: bool,
}

#[derive(Debug)]
pub enum ChatCompletionEvent {
    /// Full text so far and the fragment that was just appended
    Update { text: String, delta: String },
    Finish(String),
    Error(NxchatError),
}

#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub config: ModelConfig,
}

/// Abort handle of a running chat request, cloning shares the same request
#[derive(Clone, Debug)]
pub struct ChatController {
    sender: Arc<watch::Sender<bool>>,
}

pub struct ChatCompletionStream {
    receiver: Receiver<ChatCompletionEvent>,
    controller: ChatController,
}

/// Sink for the events of one chat request
pub trait ChatCallbacks {
    fn on_update(&mut self, _text: &str, _delta: &str) {}

    fn on_finish(&mut self, text: String);

    fn on_error(&mut self, _err: NxchatError) {}

    fn on_controller(&mut self, _controller: ChatController) {}
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(strum::Display, strum::EnumString, Copy, Clone, Debug, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum Role {
    Bot,
    User,
    System,
    Function,
}

/// Conversation owned by the caller instead of a process-wide store
#[derive(Clone, Debug, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmUsage {
    pub used: Option<f64>,
    pub total: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmModel {
    pub name: String,
    pub available: bool,
}

pub fn load_config() -> NxchatResult<Config> {
    let cfg: Config = confy::load_path(&*CHAT_CONFIG_PATH)?;
    Ok(cfg)
}

pub async fn chat(
    messages: &[ChatMessage],
    options: &ChatOptions,
) -> NxchatResult<ChatCompletionStream> {
    let provider = default_provider()?;
    Ok(provider.chat(messages, options))
}

pub async fn usage() -> NxchatResult<LlmUsage> {
    default_provider()?.usage().await
}

pub async fn models() -> NxchatResult<Vec<LlmModel>> {
    default_provider()?.models().await
}

pub async fn config_chat(protocol: &str, options: &HashMap<String, String>) -> NxchatResult<()> {
    let mut cfg: Config = confy::load_path(&*CHAT_CONFIG_PATH).unwrap_or(Config::default());

    cfg.protocol = Protocol::from_str(protocol)?;

    if let Some(base_url) = options.get("base_url") {
        cfg.base_url = base_url.trim().to_string();
    }

    if let Some(api_key) = options.get("api_key") {
        cfg.api_key = api_key.trim().to_string();
    }

    if let Some(model) = options.get("model") {
        cfg.model_config.model = model.trim().to_string();
    }

    if let Some(lang) = options.get("lang") {
        cfg.lang = Lang::from_str(lang.trim())?;
    }

    if let Some(stream) = options.get("stream") {
        cfg.model_config.stream = parse_option("stream", stream)?;
    }

    if let Some(temperature) = options.get("temperature") {
        cfg.model_config.temperature = parse_option("temperature", temperature)?;
    }

    if let Some(top_p) = options.get("top_p") {
        cfg.model_config.top_p = parse_option("top_p", top_p)?;
    }

    if let Some(presence_penalty) = options.get("presence_penalty") {
        cfg.model_config.presence_penalty = parse_option("presence_penalty", presence_penalty)?;
    }

    if let Some(frequency_penalty) = options.get("frequency_penalty") {
        cfg.model_config.frequency_penalty =
            parse_option("frequency_penalty", frequency_penalty)?;
    }

    if let Some(request_timeout_ms) = options.get("request_timeout_ms") {
        cfg.request_timeout_ms = parse_option("request_timeout_ms", request_timeout_ms)?;
    }

    if let Some(disable_list_models) = options.get("disable_list_models") {
        cfg.disable_list_models = parse_option("disable_list_models", disable_list_models)?;
    }

    if let Some(model_prefix) = options.get("model_prefix") {
        cfg.model_prefix = model_prefix.trim().to_string();
    }

    if cfg.api_key.is_empty() {
        return Err(NxchatError::Required(
            "OPTION_REQUIRED",
            "Required option 'api_key' is missing".to_string(),
        ));
    }

    if cfg.model_config.model.is_empty() {
        return Err(NxchatError::Required(
            "OPTION_REQUIRED",
            "Required option 'model' is missing".to_string(),
        ));
    }

    confy::store_path(&*CHAT_CONFIG_PATH, &cfg)?;

    Ok(())
}

pub mod function;
pub mod provider;
pub mod stream;
pub mod tool;

static CHAT_CONFIG_PATH: LazyLock<PathBuf> = LazyLock::new(|| APP_DATA_DIR.join("llm-chat.toml"));

fn default_provider() -> NxchatResult<OpenAiProvider> {
    let cfg = load_config()?;

    let provider = match cfg.protocol {
        Protocol::OpenAI => OpenAiProvider::from_config(&cfg)
            .with_tools(Arc::new(ToolRegistry::with_builtins())),
    };

    Ok(provider)
}

fn parse_option<T: FromStr>(name: &str, value: &str) -> NxchatResult<T> {
    value.trim().parse().map_err(|_| {
        NxchatError::Invalid(
            "INVALID_OPTION",
            format!("Invalid value '{value}' for option '{name}'"),
        )
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            base_url: String::new(),
            api_key: String::new(),
            lang: Lang::default(),
            model_config: ModelConfig::default(),
            request_timeout_ms: REQUEST_TIMEOUT_MS_DEFAULT,
            disable_list_models: true,
            model_prefix: LLM_MODEL_PREFIX_DEFAULT.to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: LLM_CHAT_MODEL_DEFAULT.to_string(),
            temperature: LLM_CHAT_TEMPERATURE_DEFAULT,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            top_p: 1.0,
            stream: true,
        }
    }
}

impl ChatOptions {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.config.stream = stream;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.config.top_p = top_p;
        self
    }
}

impl ChatController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `abort` has been called
    pub async fn aborted(&self) {
        let mut receiver = self.sender.subscribe();
        let _ = receiver.wait_for(|aborted| *aborted).await;
    }
}

impl Default for ChatController {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatCompletionStream {
    pub fn new(receiver: Receiver<ChatCompletionEvent>, controller: ChatController) -> Self {
        Self {
            receiver,
            controller,
        }
    }

    pub fn controller(&self) -> ChatController {
        self.controller.clone()
    }

    pub fn close(&mut self) {
        self.controller.abort();
        self.receiver.close()
    }

    pub async fn next(&mut self) -> Option<ChatCompletionEvent> {
        self.receiver.recv().await
    }

    /// Feed every event into `callbacks`, stopping at the first terminal event
    pub async fn drive<C: ChatCallbacks>(mut self, callbacks: &mut C) {
        callbacks.on_controller(self.controller());

        while let Some(event) = self.next().await {
            match event {
                ChatCompletionEvent::Update { text, delta } => {
                    callbacks.on_update(&text, &delta);
                }
                ChatCompletionEvent::Finish(text) => {
                    callbacks.on_finish(text);
                    return;
                }
                ChatCompletionEvent::Error(err) => {
                    callbacks.on_error(err);
                    return;
                }
            }
        }
    }

    /// Wait for the final answer, dropping incremental updates
    pub async fn collect(self) -> NxchatResult<String> {
        let mut collector = FinalText::default();
        self.drive(&mut collector).await;

        match collector.0 {
            Some(result) => result,
            None => Err(NxchatError::Invalid(
                "STREAM_CLOSED",
                "Chat stream closed without an answer".to_string(),
            )),
        }
    }
}

#[derive(Default)]
struct FinalText(Option<NxchatResult<String>>);

impl ChatCallbacks for FinalText {
    fn on_finish(&mut self, text: String) {
        self.0 = Some(Ok(text));
    }

    fn on_error(&mut self, err: NxchatError) {
        self.0 = Some(Err(err));
    }
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: &str) {
        self.messages.push(ChatMessage::new(role, content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        updates: Vec<String>,
        finishes: Vec<String>,
        errors: usize,
        has_controller: bool,
    }

    impl ChatCallbacks for Recorder {
        fn on_update(&mut self, text: &str, _delta: &str) {
            self.updates.push(text.to_string());
        }

        fn on_finish(&mut self, text: String) {
            self.finishes.push(text);
        }

        fn on_error(&mut self, _err: NxchatError) {
            self.errors += 1;
        }

        fn on_controller(&mut self, _controller: ChatController) {
            self.has_controller = true;
        }
    }

    #[tokio::test]
    async fn test_drive_stops_at_first_finish() {
        let (sender, receiver) = mpsc::channel(8);
        let stream = ChatCompletionStream::new(receiver, ChatController::new());

        for event in [
            ChatCompletionEvent::Update {
                text: "He".to_string(),
                delta: "He".to_string(),
            },
            ChatCompletionEvent::Finish("He".to_string()),
            ChatCompletionEvent::Finish("Hello".to_string()),
        ] {
            sender.send(event).await.unwrap();
        }
        drop(sender);

        let mut recorder = Recorder::default();
        stream.drive(&mut recorder).await;

        assert!(recorder.has_controller);
        assert_eq!(recorder.updates, vec!["He"]);
        assert_eq!(recorder.finishes, vec!["He"]);
        assert_eq!(recorder.errors, 0);
    }

    #[tokio::test]
    async fn test_controller_abort_is_shared() {
        let controller = ChatController::new();
        let cloned = controller.clone();
        assert!(!cloned.is_aborted());

        controller.abort();
        controller.abort();
        assert!(cloned.is_aborted());

        cloned.aborted().await;
    }

    #[test]
    fn test_config_default() {
        let cfg = Config::default();
        assert!(cfg.disable_list_models);
        assert_eq!(cfg.model_prefix, "gpt-");
        assert_eq!(cfg.model_config.model, "gpt-3.5-turbo");
        assert!(cfg.model_config.stream);
    }
}
