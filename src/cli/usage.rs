use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use nxchat::api;
use tabled::settings::{Color, object::Columns};
use tokio::time::Duration;

use crate::cli;

#[derive(clap::Args)]
pub struct UsageCommand;

impl UsageCommand {
    pub async fn exec(&self) {
        if !cli::is_signed_in() {
            return;
        }

        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{msg} {spinner:.cyan} [{elapsed}]") {
            spinner.set_style(style);
        }
        spinner.set_message("Querying usage");
        spinner.enable_steady_tick(Duration::from_millis(100));

        match api::llm_usage().await {
            Ok(usage) => {
                spinner.finish_and_clear();

                let format_usd = |v: Option<f64>| match v {
                    Some(v) => format!("${v:.2}"),
                    None => "?".to_string(),
                };

                let table_data = vec![
                    vec!["Used".to_string(), format_usd(usage.used)],
                    vec!["Total".to_string(), format_usd(usage.total)],
                ];

                let mut table = tabled::builder::Builder::from_iter(&table_data).build();
                table.modify(Columns::first(), Color::FG_CYAN);
                println!("{table}");
            }
            Err(err) => {
                spinner.finish_with_message(err.to_string().red().to_string());
            }
        }
    }
}
