use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{NxchatError, NxchatResult},
    llm::{ChatMessage, Role},
    utils::markdown::extract_code_block,
};

/// Put this in the last message to keep the request streaming even when functions are declared
pub static FUNCTION_CALLING_STOP: &str = "FUNCTION_CALLING:STOP";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GptFunction {
    pub name: String,
    pub description: String,
    pub parameters: GptFunctionParameters,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GptFunctionParameters {
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Messages to forward plus the functions declared by function-role messages
#[derive(Debug, Default)]
pub struct PreparedMessages {
    pub messages: Vec<ChatMessage>,
    pub functions: Vec<GptFunction>,
    pub stop_function_calling: bool,
}

impl GptFunction {
    pub fn parse(text: &str) -> NxchatResult<Self> {
        let function: GptFunction = serde_json::from_str(&extract_code_block(text))?;

        if function.name.trim().is_empty() {
            return Err(NxchatError::Required(
                "FUNCTION_NAME_REQUIRED",
                "Function name is empty".to_string(),
            ));
        }

        if function.parameters.r#type != "object" {
            return Err(NxchatError::Invalid(
                "FUNCTION_PARAMETERS_INVALID",
                format!(
                    "Parameters of function '{}' must be an object schema",
                    function.name
                ),
            ));
        }

        for required in &function.parameters.required {
            if !function.parameters.properties.contains_key(required) {
                return Err(NxchatError::Invalid(
                    "FUNCTION_PARAMETERS_INVALID",
                    format!(
                        "Required parameter '{required}' of function '{}' is not declared",
                        function.name
                    ),
                ));
            }
        }

        Ok(function)
    }
}

/// Split function declarations out of the conversation
///
/// Every function-role message is removed. Declarations that do not parse are
/// logged and dropped. The stop sentinel is stripped from the last message.
pub fn prepare_messages(messages: &[ChatMessage]) -> PreparedMessages {
    let mut prepared = PreparedMessages::default();

    for message in messages {
        if message.role == Role::Function {
            match GptFunction::parse(&message.content) {
                Ok(function) => {
                    debug!("Function declared: {}", function.name);
                    prepared.functions.push(function);
                }
                Err(err) => {
                    warn!("Drop invalid function declaration: {err}");
                }
            }
        } else {
            prepared.messages.push(message.clone());
        }
    }

    if let Some(last) = prepared.messages.last_mut() {
        if last.content.contains(FUNCTION_CALLING_STOP) {
            prepared.stop_function_calling = true;
            last.content = last
                .content
                .replace(FUNCTION_CALLING_STOP, "")
                .trim()
                .to_string();
        }
    }

    prepared
}

impl PreparedMessages {
    /// Functions that should be sent with the request
    pub fn active_functions(&self) -> &[GptFunction] {
        if self.stop_function_calling {
            &[]
        } else {
            &self.functions
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static WEATHER_FUNCTION: &str = r#"
```json
{
    "name": "get_weather",
    "description": "Get the current weather of a city",
    "parameters": {
        "type": "object",
        "properties": {
            "city": { "type": "string" }
        },
        "required": ["city"]
    }
}
```
"#;

    #[test]
    fn test_parse_function() {
        match GptFunction::parse(WEATHER_FUNCTION) {
            Ok(function) => {
                assert_eq!(function.name, "get_weather");
                assert_eq!(function.parameters.required, vec!["city"]);
                assert!(function.parameters.properties.contains_key("city"));
            }
            Err(err) => {
                println!("{err:?}");
                assert!(false);
            }
        }
    }

    #[test]
    fn test_parse_function_rejects_loose_json() {
        // Bare keys and trailing commas are not repaired
        assert!(
            GptFunction::parse(
                r#"{name: "f", description: "d", parameters: {type: "object",},}"#
            )
            .is_err()
        );

        assert!(GptFunction::parse(r#"{"name": "f", "description": "d"}"#).is_err());

        assert!(
            GptFunction::parse(
                r#"{"name": "f", "description": "d", "parameters": {"type": "string"}}"#
            )
            .is_err()
        );

        assert!(
            GptFunction::parse(
                r#"{"name": "f", "description": "d", "parameters": {"type": "object", "required": ["x"]}}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_parse_function_with_extra_keys() {
        let function = GptFunction::parse(
            r#"{
                "name": "get_weather",
                "description": "Get the current weather of a city",
                "strict": true,
                "parameters": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } },
                    "required": ["city"],
                    "additionalProperties": false
                }
            }"#,
        )
        .unwrap();

        assert_eq!(function.name, "get_weather");
        assert_eq!(
            function.parameters.extra.get("additionalProperties"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn test_prepare_messages() {
        let messages = vec![
            ChatMessage::new(Role::System, "You are helpful"),
            ChatMessage::new(Role::Function, WEATHER_FUNCTION),
            ChatMessage::new(Role::Function, "not json at all"),
            ChatMessage::new(Role::User, "Weather in Paris?"),
        ];

        let prepared = prepare_messages(&messages);
        assert_eq!(prepared.messages.len(), 2);
        assert!(prepared.messages.iter().all(|m| m.role != Role::Function));
        assert_eq!(prepared.functions.len(), 1);
        assert_eq!(prepared.active_functions().len(), 1);
        assert!(!prepared.stop_function_calling);
    }

    #[test]
    fn test_prepare_messages_with_stop_sentinel() {
        let messages = vec![
            ChatMessage::new(Role::Function, WEATHER_FUNCTION),
            ChatMessage::new(Role::User, "Just chat FUNCTION_CALLING:STOP"),
        ];

        let prepared = prepare_messages(&messages);
        assert!(prepared.stop_function_calling);
        assert!(prepared.active_functions().is_empty());
        assert_eq!(prepared.functions.len(), 1);
        assert_eq!(prepared.messages[0].content, "Just chat");
    }
}
