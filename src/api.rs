use std::collections::HashMap;

use crate::{auth, error::NxchatResult, llm};

pub use crate::{
    auth::{AuthSettings, Screen, Session, UserRole},
    llm::{
        ChatCallbacks, ChatCompletionEvent, ChatCompletionStream, ChatController, ChatMessage,
        ChatOptions, ChatSession, Config, LlmModel, LlmUsage, ModelConfig, Protocol, Role,
        function::{FUNCTION_CALLING_STOP, GptFunction},
        provider::{ChatProvider, open_ai::OpenAiProvider},
        tool::{MAX_TOOL_ROUNDS, ToolHandler, ToolRegistry},
    },
    locale::Lang,
};

pub static LLM_SUPPORTED_PROTOCOLS: [&str; 1] = ["openai"];

pub fn llm_load_config() -> NxchatResult<Config> {
    llm::load_config()
}

pub async fn llm_config(protocol: &str, options: &HashMap<String, String>) -> NxchatResult<()> {
    llm::config_chat(protocol, options).await
}

pub async fn llm_chat(
    messages: &[ChatMessage],
    options: &ChatOptions,
) -> NxchatResult<ChatCompletionStream> {
    llm::chat(messages, options).await
}

pub async fn llm_usage() -> NxchatResult<LlmUsage> {
    llm::usage().await
}

pub async fn llm_models() -> NxchatResult<Vec<LlmModel>> {
    llm::models().await
}

pub fn auth_settings() -> AuthSettings {
    AuthSettings::from_env()
}

pub fn auth_screen() -> NxchatResult<Screen> {
    auth::current_screen()
}

pub async fn auth_sign_in(code: &str, redirect_uri: &str) -> NxchatResult<Session> {
    let session = auth_settings().exchange_code(code, redirect_uri).await?;
    auth::store_session(&session)?;
    Ok(session)
}

pub fn auth_session() -> NxchatResult<Option<Session>> {
    auth::load_session()
}

pub fn auth_sign_out() -> NxchatResult<()> {
    auth::clear_session()
}
