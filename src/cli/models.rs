use colored::Colorize;
use nxchat::api;
use tabled::settings::{Color, object::Columns};

use crate::cli;

#[derive(clap::Args)]
pub struct ModelsCommand;

impl ModelsCommand {
    pub async fn exec(&self) {
        if !cli::is_signed_in() {
            return;
        }

        match api::llm_models().await {
            Ok(models) => {
                if models.is_empty() {
                    println!("No model available");
                    return;
                }

                let mut table_data: Vec<Vec<String>> = vec![];
                for model in models {
                    let available = if model.available { "✓" } else { "-" };
                    table_data.push(vec![model.name, available.to_string()]);
                }

                let mut table = tabled::builder::Builder::from_iter(&table_data).build();
                table.modify(Columns::first(), Color::FG_GREEN);
                println!("{table}");
            }
            Err(err) => {
                println!("{}", err.to_string().red());
            }
        }
    }
}
