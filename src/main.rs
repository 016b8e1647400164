use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use env_logger::Env;
use log::info;

use scheduler::api_server::start_api_server;
use scheduler::cli::{Cli, Commands, ConfigActions};
use scheduler::config::{get_config_path, Config};
use scheduler::env_manager::{load_env_file, Secrets};
use scheduler::reminders::{build_mailer, send_event_reminders};
use scheduler::storage::Database;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use chrono::Local;
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    load_env_file();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = Config::load(cli.config.as_deref())?;
            info!("Starting scheduler API server");
            start_api_server(config, Secrets::from_env()).await
        }
        Commands::SendReminders => {
            let config = Config::load(cli.config.as_deref())?;
            let secrets = Secrets::from_env();
            let db = Database::open(&config.database.path)?;
            let mailer = build_mailer(&config.mail, secrets.mail_password.as_ref())?;
            let report = send_event_reminders(
                &db,
                mailer.as_ref(),
                &config.reminders,
                &config.mail.default_sender,
                Utc::now(),
            )
            .await?;
            println!("{}", report);
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigActions::Show => {
                let config = Config::load(cli.config.as_deref())?;
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigActions::Init { force } => {
                let path = match cli.config {
                    Some(path) => path,
                    None => get_config_path()?,
                };
                if path.exists() && !force {
                    println!("Config already exists at {} (use --force to overwrite)", path.display());
                    return Ok(());
                }
                Config::default().save(&path)?;
                println!("Wrote default config to {}", path.display());
                Ok(())
            }
        },
    }
}
