use crate::{
    error::NxchatResult,
    llm::{ChatCompletionStream, ChatMessage, ChatOptions, LlmModel, LlmUsage},
};

pub mod open_ai;

pub trait ChatProvider {
    /// Start a chat request, failures are delivered as the stream's terminal event
    fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> ChatCompletionStream;

    fn usage(&self) -> impl std::future::Future<Output = NxchatResult<LlmUsage>> + Send;

    fn models(&self) -> impl std::future::Future<Output = NxchatResult<Vec<LlmModel>>> + Send;
}
