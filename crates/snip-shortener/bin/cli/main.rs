mod cli;

use crate::cli::{Command, LogFormat, CLI};
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use snip_core::ShortCode;
use snip_shortener::{BatchItem, ShortenerService};
use snip_storage::open_store;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CLI::parse();
    init_tracing(cli.log_format);

    let settings = cli.settings()?;
    info!(
        backend = %settings.storage.backend(),
        base_url = %settings.base_url,
        delete_workers = settings.deletion.workers,
        "starting snip"
    );

    let store = open_store(&settings.storage)
        .await
        .context("opening entry store")?;
    let service = ShortenerService::new(store, settings.deletion, settings.base_url);

    let outcome = run(&service, cli.command).await;
    if let Err(err) = service.shutdown().await {
        error!(error = %err, "shutdown failed");
    }
    outcome
}

/// Logs go to stderr so stdout carries only command output.
fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer as _};

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

async fn run(service: &ShortenerService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Shorten { url, user, code } => {
            let shortened = match code {
                Some(code) => {
                    let code = ShortCode::new(code)?;
                    service.create_with_code(&url, &user, code).await?
                }
                None => service.create(&url, &user).await?,
            };
            print_json(&shortened)
        }
        Command::Batch { file, user } => {
            let raw = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading batch file {}", file.display()))?;
            let items: Vec<BatchItem> = serde_json::from_slice(&raw)
                .with_context(|| format!("parsing batch file {}", file.display()))?;
            print_json(&service.create_batch(&user, items).await?)
        }
        Command::Resolve { code } => {
            let code = ShortCode::new(code)?;
            let original_url = service.resolve(&code).await?;
            print_json(&json!({ "original_url": original_url }))
        }
        Command::List { user } => print_json(&service.list_by_user(&user).await?),
        Command::Delete { user, codes } => {
            let codes = codes
                .into_iter()
                .map(ShortCode::new)
                .collect::<Result<Vec<_>, _>>()?;
            let accepted = codes.len();
            service.delete_by_user(&user, codes)?;
            print_json(&json!({ "accepted": accepted }))
        }
        Command::Stats => print_json(&service.stats().await?),
        Command::Ping => {
            service.ping().await?;
            print_json(&json!({ "status": "ok" }))
        }
        Command::Compact => print_json(&service.compact().await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
