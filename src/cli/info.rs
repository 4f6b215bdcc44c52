use colored::Colorize;
use nxchat::api::{self, Screen};

#[derive(clap::Args)]
pub struct InfoCommand;

impl InfoCommand {
    pub async fn exec(&self) {
        println!("Version: {}", env!("CARGO_PKG_VERSION").cyan().bold());

        let settings = api::auth_settings();
        if settings.data_api_key.is_some() {
            println!("Data API key: {}", "configured".green());
        }

        if !settings.is_enabled() {
            println!("Sign-in: {}", "disabled".bright_black());
            return;
        }

        match api::auth_screen() {
            Ok(Screen::Chat) => println!("Sign-in: {}", "signed in".green()),
            Ok(Screen::Auth) => println!("Sign-in: {}", "required".yellow()),
            Err(err) => println!("Sign-in: {}", err.to_string().red()),
        }
    }
}
