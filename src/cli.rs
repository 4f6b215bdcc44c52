use clap::Subcommand;
use colored::Colorize;
use nxchat::api::{self, Screen};

mod auth;
mod chat;
mod config;
mod info;
mod models;
mod usage;

#[derive(Subcommand)]
pub enum Commands {
    #[command(subcommand, about = "Sign in with Azure AD")]
    Auth(auth::AuthCommand),

    #[command(about = "Chat with the configured model")]
    Chat(Box<chat::ChatCommand>),

    #[command(about = "Configure LLM provider")]
    Config(Box<config::ConfigCommand>),

    #[command(about = "Display version and sign-in state")]
    Info(Box<info::InfoCommand>),

    #[command(about = "List available models")]
    Models(Box<models::ModelsCommand>),

    #[command(about = "Query usage of the current month")]
    #[clap(visible_aliases = &["quota"])]
    Usage(Box<usage::UsageCommand>),
}

/// Commands talking to the model are only available on the chat screen
fn is_signed_in() -> bool {
    match api::auth_screen() {
        Ok(Screen::Chat) => true,
        Ok(Screen::Auth) => {
            println!(
                "Sign-in required, run `{}` first",
                "nxchat auth login".green()
            );
            false
        }
        Err(err) => {
            println!("{}", err.to_string().red());
            false
        }
    }
}
