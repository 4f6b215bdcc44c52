use std::sync::Arc;

use chrono::Local;
use futures::StreamExt;
use log::{debug, error, info, warn};
use reqwest::{RequestBuilder, StatusCode, header::CONTENT_TYPE};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{
    sync::mpsc::{self, Sender},
    time::{Duration, timeout},
};
use url::Url;

use crate::{
    CHANNEL_BUFFER_DEFAULT, LLM_MODEL_PREFIX_DEFAULT, REQUEST_TIMEOUT_MS_DEFAULT,
    error::*,
    llm::{
        ChatCompletionEvent, ChatCompletionStream, ChatController, ChatMessage, ChatOptions,
        Config, LlmModel, LlmUsage, ModelConfig, Role,
        function::{PreparedMessages, prepare_messages},
        provider::ChatProvider,
        stream::{ChatStreamMachine, OpenVerdict, SseDecoder, classify_open, failure_text},
        tool::{MAX_TOOL_ROUNDS, ToolRegistry},
    },
    locale::Lang,
    utils::{
        datetime::{format_date, month_to_tomorrow},
        net::{join_url, normalize_base_url},
    },
};

pub static CHAT_PATH: &str = "v1/chat/completions";
pub static USAGE_PATH: &str = "dashboard/billing/usage";
pub static SUBS_PATH: &str = "dashboard/billing/subscription";
pub static LIST_MODEL_PATH: &str = "v1/models";

static DEFAULT_MODELS: [&str; 11] = [
    "gpt-4",
    "gpt-4-0314",
    "gpt-4-0613",
    "gpt-4-32k",
    "gpt-4-32k-0314",
    "gpt-4-32k-0613",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0301",
    "gpt-3.5-turbo-0613",
    "gpt-3.5-turbo-16k",
    "gpt-3.5-turbo-16k-0613",
];

#[derive(Clone, Debug)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    lang: Lang,
    request_timeout_ms: u64,
    disable_list_models: bool,
    model_prefix: String,
    tools: Arc<ToolRegistry>,
}

/// A `function_call` requested by the model
#[derive(Debug, PartialEq)]
struct FunctionCall {
    name: String,
    raw_arguments: String,
    arguments: Value,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            api_key: api_key.to_string(),
            lang: Lang::default(),
            request_timeout_ms: REQUEST_TIMEOUT_MS_DEFAULT,
            disable_list_models: true,
            model_prefix: LLM_MODEL_PREFIX_DEFAULT.to_string(),
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.base_url, &cfg.api_key)
            .with_lang(cfg.lang)
            .with_request_timeout_ms(cfg.request_timeout_ms)
            .with_list_models(!cfg.disable_list_models, &cfg.model_prefix)
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self
    }

    pub fn with_request_timeout_ms(mut self, request_timeout_ms: u64) -> Self {
        self.request_timeout_ms = request_timeout_ms;
        self
    }

    pub fn with_list_models(mut self, enabled: bool, model_prefix: &str) -> Self {
        self.disable_list_models = !enabled;
        self.model_prefix = model_prefix.to_string();
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn path(&self, path: &str) -> NxchatResult<Url> {
        join_url(&self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("Content-Type", "application/json");

        if self.api_key.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    fn unauthorized_message(&self, unauthorized: bool) -> Option<&'static str> {
        if unauthorized {
            Some(self.lang.unauthorized())
        } else {
            None
        }
    }

    async fn stream_chat(
        &self,
        payload: &Value,
        controller: &ChatController,
        sender: &Sender<ChatCompletionEvent>,
    ) -> NxchatResult<()> {
        let mut machine = ChatStreamMachine::new();

        let request_url = self.path(CHAT_PATH)?;
        let client = reqwest::Client::builder().build()?;
        let request = self.authorized(client.post(request_url)).json(payload).send();

        let response = tokio::select! {
            biased;

            _ = controller.aborted() => {
                debug!("[Request] aborted while connecting");
                let event = machine.on_close();
                deliver(sender, &mut machine, event).await;
                return Ok(());
            }
            response = timeout(Duration::from_millis(self.request_timeout_ms), request) => {
                match response {
                    Ok(response) => response?,
                    Err(_) => {
                        warn!("[OpenAI] no response within {} ms, abort", self.request_timeout_ms);
                        let event = machine.on_close();
                        deliver(sender, &mut machine, event).await;
                        return Ok(());
                    }
                }
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        debug!("[OpenAI] request response status: {status}, content type: {content_type:?}");

        let verdict = classify_open(status, content_type.as_deref());
        if verdict == OpenVerdict::Stream {
            machine.open();
        } else {
            let body = tokio::select! {
                biased;

                _ = controller.aborted() => {
                    debug!("[Request] aborted while reading body");
                    let event = machine.on_close();
                    deliver(sender, &mut machine, event).await;
                    return Ok(());
                }
                body = response.text() => body,
            };

            let text = match verdict {
                OpenVerdict::Failure { unauthorized } => {
                    let body = body.unwrap_or_default();
                    error!("[OpenAI] request failed with status {status}: {body}");
                    failure_text(self.unauthorized_message(unauthorized), &body)
                }
                _ => body?,
            };

            let event = machine.finish_with(text);
            deliver(sender, &mut machine, event).await;
            return Ok(());
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;

                _ = controller.aborted() => {
                    debug!("[Request] aborted while streaming");
                    let event = machine.on_close();
                    deliver(sender, &mut machine, event).await;
                    return Ok(());
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for sse_event in decoder.push(&bytes) {
                        let event = machine.on_data(&sse_event.data);
                        if !deliver(sender, &mut machine, event).await || machine.is_done() {
                            return Ok(());
                        }
                    }
                }
                Some(Err(err)) => {
                    return Err(err.into());
                }
                None => {
                    if let Some(sse_event) = decoder.finish() {
                        let event = machine.on_data(&sse_event.data);
                        if !deliver(sender, &mut machine, event).await {
                            return Ok(());
                        }
                    }

                    let event = machine.on_close();
                    deliver(sender, &mut machine, event).await;
                    return Ok(());
                }
            }
        }
    }

    async fn complete_chat(&self, payload: Value) -> NxchatResult<String> {
        let mut payload = payload;

        let request_url = self.path(CHAT_PATH)?;
        let client = reqwest::Client::builder().build()?;

        let mut rounds = 0;
        loop {
            let request = self
                .authorized(client.post(request_url.clone()))
                .json(&payload)
                .send();
            let response = match timeout(Duration::from_millis(self.request_timeout_ms), request)
                .await
            {
                Ok(response) => response?,
                Err(_) => return Err(NxchatError::Timeout(self.request_timeout_ms)),
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!("[OpenAI] request failed with status {status}: {body}");

                let unauthorized = status == StatusCode::UNAUTHORIZED;
                return Ok(failure_text(self.unauthorized_message(unauthorized), &body));
            }

            let response_json: Value = response.json().await?;
            debug!("[Response] {response_json}");

            let Some(call) = FunctionCall::from_response(&response_json) else {
                return Ok(extract_message(&response_json));
            };

            if rounds >= MAX_TOOL_ROUNDS {
                return Err(NxchatError::ToolRoundsExceeded(MAX_TOOL_ROUNDS));
            }
            rounds += 1;

            info!("Call tool '{}' ({rounds}/{MAX_TOOL_ROUNDS})", call.name);
            let result = self.tools.call(&call.name, &call.arguments)?;

            if let Some(messages) = payload["messages"].as_array_mut() {
                messages.push(json!({
                    "role": "assistant",
                    "content": Value::Null,
                    "function_call": {
                        "name": call.name,
                        "arguments": call.raw_arguments,
                    },
                }));
                messages.push(json!({
                    "role": "function",
                    "name": call.name,
                    "content": result,
                }));
            }
        }
    }
}

impl ChatProvider for OpenAiProvider {
    fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> ChatCompletionStream {
        let prepared = prepare_messages(messages);
        let payload = build_payload(&prepared, &options.config);
        debug!("[Request] openai payload: {payload}");

        let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_DEFAULT);
        let controller = ChatController::new();

        let provider = self.clone();
        let task_controller = controller.clone();
        tokio::spawn(async move {
            let should_stream = payload["stream"].as_bool().unwrap_or(false);

            let result = if should_stream {
                provider
                    .stream_chat(&payload, &task_controller, &sender)
                    .await
            } else {
                tokio::select! {
                    biased;

                    _ = task_controller.aborted() => {
                        debug!("[Request] aborted before an answer");
                        let _ = sender.send(ChatCompletionEvent::Finish(String::new())).await;
                        Ok(())
                    }
                    result = provider.complete_chat(payload.clone()) => {
                        match result {
                            Ok(text) => {
                                let _ = sender.send(ChatCompletionEvent::Finish(text)).await;
                                Ok(())
                            }
                            Err(err) => Err(err),
                        }
                    }
                }
            };

            if let Err(err) = result {
                error!("[Request] failed to make a chat request: {err}");
                let _ = sender.send(ChatCompletionEvent::Error(err)).await;
            }
        });

        ChatCompletionStream::new(receiver, controller)
    }

    async fn usage(&self) -> NxchatResult<LlmUsage> {
        let (start_date, end_date) = month_to_tomorrow(&Local::now().date_naive());

        let mut used_url = self.path(USAGE_PATH)?;
        used_url
            .query_pairs_mut()
            .append_pair("start_date", &format_date(&start_date))
            .append_pair("end_date", &format_date(&end_date));
        let subs_url = self.path(SUBS_PATH)?;

        let client = reqwest::Client::builder().build()?;
        let (used, subs) = futures::try_join!(
            self.authorized(client.get(used_url)).send(),
            self.authorized(client.get(subs_url)).send(),
        )?;

        if used.status() == StatusCode::UNAUTHORIZED {
            return Err(NxchatError::Unauthorized(
                self.lang.unauthorized().to_string(),
            ));
        }

        if !used.status().is_success() || !subs.status().is_success() {
            return Err(NxchatError::HttpStatusError(
                "Failed to query usage from openai".to_string(),
            ));
        }

        let used_json: Value = used.json().await?;
        let subs_json: Value = subs.json().await?;

        parse_usage(&used_json, &subs_json)
    }

    async fn models(&self) -> NxchatResult<Vec<LlmModel>> {
        if self.disable_list_models {
            return Ok(default_models());
        }

        let client = reqwest::Client::builder().build()?;
        let response = self
            .authorized(client.get(self.path(LIST_MODEL_PATH)?))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NxchatError::HttpStatusError(format!(
                "{} {}",
                response.status(),
                response.text().await.ok().unwrap_or_default()
            )));
        }

        let response_json: Value = response.json().await?;
        let models = filter_models(&response_json, &self.model_prefix);
        debug!("[Models] {models:?}");

        Ok(models)
    }
}

#[derive(strum::Display)]
enum OpenAiRole {
    #[strum(serialize = "user")]
    User,

    #[strum(serialize = "assistant")]
    Assistant,

    #[strum(serialize = "system")]
    System,

    #[strum(serialize = "function")]
    Function,
}

impl From<Role> for OpenAiRole {
    fn from(val: Role) -> Self {
        match val {
            Role::User => OpenAiRole::User,
            Role::Bot => OpenAiRole::Assistant,
            Role::System => OpenAiRole::System,
            Role::Function => OpenAiRole::Function,
        }
    }
}

impl Serialize for OpenAiRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl FunctionCall {
    fn from_response(response_json: &Value) -> Option<Self> {
        let function_call = &response_json["choices"][0]["message"]["function_call"];
        let name = function_call["name"].as_str()?.to_string();

        let raw_arguments = function_call["arguments"]
            .as_str()
            .unwrap_or("{}")
            .to_string();
        let arguments = serde_json::from_str(&raw_arguments)
            .unwrap_or_else(|_| Value::String(raw_arguments.clone()));

        Some(Self {
            name,
            raw_arguments,
            arguments,
        })
    }
}

pub fn build_payload(prepared: &PreparedMessages, config: &ModelConfig) -> Value {
    let messages = prepared
        .messages
        .iter()
        .map(chat_message_to_json_value)
        .collect::<Vec<_>>();

    let mut payload = json!({
        "messages": messages,
        "model": config.model,
        "temperature": config.temperature,
        "presence_penalty": config.presence_penalty,
        "frequency_penalty": config.frequency_penalty,
        "top_p": config.top_p,
    });

    let functions = prepared.active_functions();
    if functions.is_empty() {
        payload["stream"] = json!(config.stream);
    } else {
        payload["functions"] = json!(functions);
        payload["function_call"] = json!("auto");
        payload["stream"] = json!(false);
    }

    payload
}

pub fn extract_message(response_json: &Value) -> String {
    response_json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

pub fn parse_usage(used_json: &Value, subs_json: &Value) -> NxchatResult<LlmUsage> {
    if let Some(error_type) = used_json["error"]["type"].as_str() {
        if !error_type.is_empty() {
            return Err(NxchatError::HttpStatusError(
                used_json["error"]["message"]
                    .as_str()
                    .unwrap_or(error_type)
                    .to_string(),
            ));
        }
    }

    Ok(LlmUsage {
        // Reported in cents
        used: used_json["total_usage"].as_f64().map(|v| v.round() / 100.0),
        total: subs_json["hard_limit_usd"]
            .as_f64()
            .map(|v| (v * 100.0).round() / 100.0),
    })
}

pub fn default_models() -> Vec<LlmModel> {
    DEFAULT_MODELS
        .iter()
        .map(|name| LlmModel {
            name: name.to_string(),
            available: true,
        })
        .collect()
}

pub fn filter_models(response_json: &Value, model_prefix: &str) -> Vec<LlmModel> {
    match response_json["data"].as_array() {
        Some(data) => data
            .iter()
            .filter_map(|m| m["id"].as_str())
            .filter(|id| id.starts_with(model_prefix))
            .map(|id| LlmModel {
                name: id.to_string(),
                available: true,
            })
            .collect(),
        None => vec![],
    }
}

/// Send an event if there is one, returns false once nobody is listening
async fn deliver(
    sender: &Sender<ChatCompletionEvent>,
    machine: &mut ChatStreamMachine,
    event: Option<ChatCompletionEvent>,
) -> bool {
    let Some(event) = event else {
        return true;
    };

    let is_finish = matches!(event, ChatCompletionEvent::Finish(_));
    let sent = sender.send(event).await.is_ok();
    if is_finish {
        machine.complete();
    }

    sent
}

fn chat_message_to_json_value(chat_message: &ChatMessage) -> Value {
    json!({
        "role": OpenAiRole::from(chat_message.role),
        "content": chat_message.content
    })
}

#[cfg(test)]
mod tests {
    use crate::llm::function::FUNCTION_CALLING_STOP;

    use super::*;

    static FUNCTION_DECLARATION: &str = r#"{
    "name": "get_current_datetime",
    "description": "Current local time",
    "parameters": { "type": "object", "properties": {} }
}"#;

    #[test]
    fn test_payload_without_functions() {
        let messages = vec![
            ChatMessage::new(Role::System, "Be brief"),
            ChatMessage::new(Role::User, "Hi"),
        ];
        let payload = build_payload(&prepare_messages(&messages), &ModelConfig::default());

        assert!(payload.get("functions").is_none());
        assert!(payload.get("function_call").is_none());
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["model"], json!("gpt-3.5-turbo"));
        assert_eq!(payload["messages"][0]["role"], json!("system"));
        assert_eq!(payload["messages"][1]["content"], json!("Hi"));
    }

    #[test]
    fn test_payload_with_functions() {
        let messages = vec![
            ChatMessage::new(Role::Function, FUNCTION_DECLARATION),
            ChatMessage::new(Role::Bot, "Hello"),
            ChatMessage::new(Role::User, "What time is it?"),
        ];
        let payload = build_payload(&prepare_messages(&messages), &ModelConfig::default());

        assert_eq!(payload["stream"], json!(false));
        assert_eq!(payload["function_call"], json!("auto"));
        assert_eq!(payload["functions"][0]["name"], json!("get_current_datetime"));
        assert_eq!(payload["messages"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(payload["messages"][0]["role"], json!("assistant"));
    }

    #[test]
    fn test_payload_with_stop_sentinel() {
        let messages = vec![
            ChatMessage::new(Role::Function, FUNCTION_DECLARATION),
            ChatMessage::new(Role::User, &format!("Tell a joke {FUNCTION_CALLING_STOP}")),
        ];
        let config = ModelConfig {
            stream: true,
            ..Default::default()
        };
        let payload = build_payload(&prepare_messages(&messages), &config);

        assert!(payload.get("functions").is_none());
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["messages"][0]["content"], json!("Tell a joke"));
    }

    #[test]
    fn test_provider_path() {
        let provider = OpenAiProvider::new("", "sk-test");
        assert_eq!(
            provider.path(CHAT_PATH).unwrap().as_str(),
            "https://api.openai.com/v1/chat/completions"
        );

        let provider = OpenAiProvider::new("my-proxy.example.com/", "");
        assert_eq!(
            provider.path(LIST_MODEL_PATH).unwrap().as_str(),
            "https://my-proxy.example.com/v1/models"
        );
    }

    #[test]
    fn test_extract_message() {
        let response_json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello!" } }]
        });
        assert_eq!(extract_message(&response_json), "Hello!");
        assert_eq!(extract_message(&json!({})), "");
    }

    #[test]
    fn test_function_call_from_response() {
        let response_json = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "function_call": {
                        "name": "get_current_datetime",
                        "arguments": "{\"format\": \"%Y\"}"
                    }
                }
            }]
        });

        let call = FunctionCall::from_response(&response_json).unwrap();
        assert_eq!(call.name, "get_current_datetime");
        assert_eq!(call.arguments["format"], json!("%Y"));

        assert!(
            FunctionCall::from_response(&json!({
                "choices": [{ "message": { "content": "plain" } }]
            }))
            .is_none()
        );
    }

    #[test]
    fn test_parse_usage() {
        let usage = parse_usage(
            &json!({ "total_usage": 1234.56 }),
            &json!({ "hard_limit_usd": 120.456 }),
        )
        .unwrap();
        assert_eq!(usage.used, Some(12.35));
        assert_eq!(usage.total, Some(120.46));

        let usage = parse_usage(&json!({}), &json!({})).unwrap();
        assert_eq!(usage, LlmUsage::default());

        match parse_usage(
            &json!({ "error": { "type": "invalid_request_error", "message": "Nope" } }),
            &json!({}),
        ) {
            Err(NxchatError::HttpStatusError(message)) => assert_eq!(message, "Nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_filter_models() {
        let response_json = json!({
            "object": "list",
            "data": [
                { "id": "gpt-4", "object": "model", "root": "gpt-4" },
                { "id": "whisper-1", "object": "model", "root": "whisper-1" },
                { "id": "gpt-3.5-turbo", "object": "model", "root": "gpt-3.5-turbo" }
            ]
        });

        let names: Vec<String> = filter_models(&response_json, "gpt-")
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["gpt-4", "gpt-3.5-turbo"]);

        assert!(filter_models(&json!({}), "gpt-").is_empty());
        assert_eq!(default_models().len(), 11);
    }
}
