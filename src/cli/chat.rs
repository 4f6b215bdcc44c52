use std::{
    io::{Write, stdout},
    path::PathBuf,
};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use nxchat::{
    VecOptions,
    api::{self, *},
    error::{NxchatError, NxchatResult},
    utils::markdown::fenced_blocks,
};
use serde_json::Value;
use tabled::settings::{Color, object::Columns};
use tokio::{
    io::{AsyncBufReadExt, BufReader, stdin},
    sync::watch,
    time::Duration,
};

use crate::cli;

#[derive(clap::Args)]
pub struct ChatCommand {
    #[arg(
        short = 'L',
        long = "llm-option",
        help = "Additional option passed to LLM, e.g. -L temperature:0.6 -L model:gpt-4 -L stream:false"
    )]
    llm_options: Vec<String>,

    #[arg(short = 's', long = "system", help = "System prompt of the conversation")]
    system: Option<String>,

    #[arg(
        short = 'f',
        long = "function",
        help = "File containing a function declaration in JSON, e.g. -f weather.json"
    )]
    functions: Vec<PathBuf>,

    #[arg(help = "Prompt to send, starts an interactive chat when omitted")]
    prompt: Option<String>,
}

/// Routes Ctrl-C to the answer in flight, or quits when idle
struct Interrupts {
    active: watch::Sender<Option<ChatController>>,
}

/// How a fenced JSON block of an answer is shown
#[derive(Debug, PartialEq)]
enum JsonBlock {
    Function(GptFunction),
    FunctionCall {
        name: String,
        arguments: Vec<(String, String)>,
    },
    Data,
    Invalid,
}

/// Prints one answer to the terminal as it arrives
struct TerminalPrinter {
    spinner: Option<ProgressBar>,
    printed: bool,
    answer: Option<String>,
}

impl ChatCommand {
    pub async fn exec(&self) {
        if !cli::is_signed_in() {
            return;
        }

        let cfg = match api::llm_load_config() {
            Ok(cfg) => cfg,
            Err(err) => {
                println!("{}", err.to_string().red());
                return;
            }
        };

        let options = self.chat_options(ChatOptions::new(cfg.model_config));

        let mut session = match self.new_session() {
            Ok(session) => session,
            Err(err) => {
                println!("{}", err.to_string().red());
                return;
            }
        };

        let interrupts = Interrupts::listen();

        if let Some(prompt) = &self.prompt {
            ask(&mut session, prompt, &options, &interrupts).await;
            return;
        }

        println!(
            "[I] Type `{}` to start over, `{}` or Ctrl-D to quit, Ctrl-C stops an answer",
            "/clear".green(),
            "/exit".green()
        );

        let mut lines = BufReader::new(stdin()).lines();
        loop {
            print!("{} ", ">".cyan().bold());
            let _ = stdout().flush();

            let Ok(Some(line)) = lines.next_line().await else {
                break;
            };

            match line.trim() {
                "" => continue,
                "/exit" => break,
                "/clear" => match self.new_session() {
                    Ok(new_session) => session = new_session,
                    Err(err) => println!("{}", err.to_string().red()),
                },
                prompt => ask(&mut session, prompt, &options, &interrupts).await,
            }
        }
    }

    fn chat_options(&self, mut options: ChatOptions) -> ChatOptions {
        let llm_options = VecOptions(&self.llm_options);

        if let Some(model) = llm_options.get("model") {
            options = options.with_model(&model);
        }

        if let Some(temperature_str) = llm_options.get("temperature") {
            if let Ok(temperature) = temperature_str.parse() {
                options = options.with_temperature(temperature);
            }
        }

        if let Some(top_p_str) = llm_options.get("top_p") {
            if let Ok(top_p) = top_p_str.parse() {
                options = options.with_top_p(top_p);
            }
        }

        if let Some(stream_str) = llm_options.get("stream") {
            if let Ok(stream) = stream_str.parse() {
                options = options.with_stream(stream);
            }
        }

        options
    }

    fn new_session(&self) -> NxchatResult<ChatSession> {
        let mut session = ChatSession::new();

        if let Some(system) = &self.system {
            session.push(Role::System, system);
        }

        for path in &self.functions {
            let declaration = std::fs::read_to_string(path)?;
            session.push(Role::Function, &declaration);
        }

        Ok(session)
    }
}

async fn ask(
    session: &mut ChatSession,
    prompt: &str,
    options: &ChatOptions,
    interrupts: &Interrupts,
) {
    session.push(Role::User, prompt);

    let stream = match api::llm_chat(session.messages(), options).await {
        Ok(stream) => stream,
        Err(err) => {
            println!("{}", err.to_string().red());
            return;
        }
    };

    interrupts.track(stream.controller());
    let mut printer = TerminalPrinter::new();
    stream.drive(&mut printer).await;
    interrupts.idle();

    if let Some(answer) = printer.answer {
        session.push(Role::Bot, &answer);
    }
}

impl Interrupts {
    fn listen() -> Self {
        let (active, mut receiver) = watch::channel::<Option<ChatController>>(None);

        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                let controller = receiver.borrow_and_update().clone();
                match controller {
                    Some(controller) => controller.abort(),
                    None => {
                        println!();
                        std::process::exit(130);
                    }
                }
            }
        });

        Self { active }
    }

    fn track(&self, controller: ChatController) {
        self.active.send_replace(Some(controller));
    }

    fn idle(&self) {
        self.active.send_replace(None);
    }
}

fn classify_json_block(body: &str) -> JsonBlock {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return JsonBlock::Invalid;
    };

    if let Ok(function) = GptFunction::parse(body) {
        return JsonBlock::Function(function);
    }

    let call = &value["choices"][0]["message"]["function_call"];
    if let (Some(name), Some(arguments)) = (call["name"].as_str(), call["arguments"].as_str()) {
        let arguments = match serde_json::from_str::<Value>(arguments) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        _ => "Unknown value type".to_string(),
                    };
                    (key, value)
                })
                .collect(),
            _ => vec![],
        };

        return JsonBlock::FunctionCall {
            name: name.to_string(),
            arguments,
        };
    }

    JsonBlock::Data
}

fn print_json_block(block: JsonBlock) {
    match block {
        JsonBlock::Function(function) => {
            println!("{} {}", "Function:".yellow().bold(), function.name);
            println!("{} {}", "Description:".yellow(), function.description);

            let table_data: Vec<Vec<String>> = function
                .parameters
                .properties
                .iter()
                .map(|(name, schema)| {
                    let required = if function.parameters.required.contains(name) {
                        "required"
                    } else {
                        "optional"
                    };
                    vec![
                        name.to_string(),
                        schema["type"].as_str().unwrap_or("?").to_string(),
                        required.to_string(),
                    ]
                })
                .collect();
            if !table_data.is_empty() {
                let mut table = tabled::builder::Builder::from_iter(&table_data).build();
                table.modify(Columns::first(), Color::FG_YELLOW);
                println!("{table}");
            }
        }
        JsonBlock::FunctionCall { name, arguments } => {
            println!("{} {}", "Function Call:".blue().bold(), name);

            let table_data: Vec<Vec<String>> = arguments
                .into_iter()
                .map(|(key, value)| vec![key, value])
                .collect();
            if !table_data.is_empty() {
                let mut table = tabled::builder::Builder::from_iter(&table_data).build();
                table.modify(Columns::first(), Color::FG_CYAN);
                println!("{table}");
            }
        }
        JsonBlock::Data => {}
        JsonBlock::Invalid => {
            println!("{}", "[W] Answer contains invalid JSON".yellow());
        }
    }
}

impl TerminalPrinter {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}]") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(100));

        Self {
            spinner: Some(spinner),
            printed: false,
            answer: None,
        }
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl ChatCallbacks for TerminalPrinter {
    fn on_update(&mut self, _text: &str, delta: &str) {
        self.stop_spinner();
        self.printed = true;

        print!("{delta}");
        let _ = stdout().flush();
    }

    fn on_finish(&mut self, text: String) {
        self.stop_spinner();

        if !self.printed {
            print!("{text}");
        }
        println!();

        for block in fenced_blocks(&text) {
            match block.lang.as_str() {
                "mermaid" => {
                    println!("{}", "[I] Answer contains a mermaid diagram".bright_black());
                }
                "json" => print_json_block(classify_json_block(&block.body)),
                _ => {}
            }
        }

        self.answer = Some(text);
    }

    fn on_error(&mut self, err: NxchatError) {
        self.stop_spinner();
        if self.printed {
            println!();
        }

        println!("{}", err.to_string().red());
    }
}
