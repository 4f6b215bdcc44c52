use std::{collections::HashMap, fmt, fmt::Write, sync::Arc};

use chrono::Local;
use serde_json::Value;

use crate::error::{NxchatError, NxchatResult};

/// Upper bound of tool executions within one chat request
pub static MAX_TOOL_ROUNDS: usize = 5;

pub trait ToolHandler: Send + Sync {
    fn call(&self, arguments: &Value) -> NxchatResult<String>;
}

impl<F> ToolHandler for F
where
    F: Fn(&Value) -> NxchatResult<String> + Send + Sync,
{
    fn call(&self, arguments: &Value) -> NxchatResult<String> {
        self(arguments)
    }
}

/// Local handlers keyed by function name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("get_current_datetime", current_datetime);
        registry
    }

    pub fn register<H: ToolHandler + 'static>(&mut self, name: &str, handler: H) {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn call(&self, name: &str, arguments: &Value) -> NxchatResult<String> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| NxchatError::UnsupportedTool(name.to_string()))?;

        handler.call(arguments)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

fn current_datetime(arguments: &Value) -> NxchatResult<String> {
    let now = Local::now();

    match arguments["format"].as_str() {
        Some(format) if !format.is_empty() => {
            let mut formatted = String::new();
            write!(formatted, "{}", now.format(format)).map_err(|_| {
                NxchatError::Invalid(
                    "DATETIME_FORMAT_INVALID",
                    format!("Invalid datetime format '{format}'"),
                )
            })?;
            Ok(formatted)
        }
        _ => Ok(now.to_rfc3339()),
    }
}
