mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mcp_proxy_core::config::{load_providers_with, load_settings_with, OsConfigProvider};
use mcp_proxy_core::container::ProviderContainer;
use mcp_proxy_core::repository::ProviderRepository;
use mcp_proxy_core::session_driver::SessionDriver;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command, ProviderCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,mcp_proxy=debug")),
        )
        .init();

    match cli.command {
        Command::Serve { listen } => serve(listen).await,
        Command::Provider(ProviderCommand::Add { uvx, remote, command }) => add_provider(uvx, remote, command),
        Command::Provider(ProviderCommand::Remove { descriptor }) => remove_provider(&descriptor),
        Command::Provider(ProviderCommand::List) => list_providers(),
    }
}

async fn serve(listen: Option<String>) -> anyhow::Result<()> {
    let cp: Arc<dyn mcp_proxy_core::config::ConfigProvider> = Arc::new(OsConfigProvider);
    let mut settings = load_settings_with(cp.as_ref());
    if let Some(listen) = listen {
        settings.listen_addr = listen;
    }
    let listen_addr = settings.listen_addr.parse().context("parsing --listen address")?;

    let repository = Arc::new(ProviderRepository::new(cp));
    let container = ProviderContainer::new(repository, settings);
    container.start().await.context("starting provider container")?;

    let shutdown = CancellationToken::new();
    let driver_shutdown = shutdown.clone();
    let driver = SessionDriver::new(container.clone());

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        driver_shutdown.cancel();
    });

    driver.serve(listen_addr, shutdown).await?;
    container.stop().await;
    Ok(())
}

fn add_provider(uvx: Option<String>, remote: Option<String>, command: Option<String>) -> anyhow::Result<()> {
    let cp = OsConfigProvider;
    let repo = ProviderRepository::new(Arc::new(cp));
    let descriptor = match (uvx, remote) {
        (Some(location), None) => mcp_proxy_core::model::ProviderDescriptor::Uvx {
            location,
            executable_command: command.unwrap_or_default(),
        },
        (None, Some(location)) => mcp_proxy_core::model::ProviderDescriptor::RemoteMcp { location },
        _ => anyhow::bail!("pass exactly one of --uvx or --remote"),
    };
    repo.create(descriptor)
}

fn remove_provider(descriptor: &str) -> anyhow::Result<()> {
    let cp = OsConfigProvider;
    let repo = ProviderRepository::new(Arc::new(cp));
    let target = repo
        .list()?
        .into_iter()
        .find(|d| d.to_string() == descriptor)
        .ok_or_else(|| anyhow::anyhow!("no provider matches '{descriptor}'"))?;
    repo.delete(&target)
}

fn list_providers() -> anyhow::Result<()> {
    let cp = OsConfigProvider;
    let doc = load_providers_with(&cp)?;
    for descriptor in doc.providers {
        println!("{descriptor}");
    }
    Ok(())
}
