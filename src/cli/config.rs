use colored::Colorize;
use nxchat::{VecOptions, api};

#[derive(clap::Args)]
pub struct ConfigCommand {
    #[arg(
        short = 'O',
        long = "option",
        help = "LLM provider's option, e.g. -O base_url:https://api.openai.com -O api_key:sk-xxx -O model:gpt-3.5-turbo -O lang:cn"
    )]
    options: Vec<String>,

    #[arg(
        short = 'p',
        long = "protocol",
        help = "LLM provider's protocol, the default value is openai"
    )]
    protocol: Option<String>,
}

impl ConfigCommand {
    pub async fn exec(&self) {
        let protocol = self
            .protocol
            .as_deref()
            .unwrap_or(api::LLM_SUPPORTED_PROTOCOLS[0]);
        if !api::LLM_SUPPORTED_PROTOCOLS.contains(&protocol) {
            println!(
                "Invalid protocol '{}', available values: {}",
                protocol,
                api::LLM_SUPPORTED_PROTOCOLS.join("/")
            );
            return;
        }

        let options_map = VecOptions(&self.options).into_map();

        if let Err(err) = api::llm_config(protocol, &options_map).await {
            println!("{}", err.to_string().red());
        } else {
            println!("LLM provider has been configured");
        }
    }
}
