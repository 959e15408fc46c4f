use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mcp-proxy", about = "Aggregating proxy for MCP providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the facing proxy, reconciling against the persisted provider list.
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
    /// Manage the persisted provider list.
    #[command(subcommand)]
    Provider(ProviderCommand),
}

#[derive(Subcommand)]
pub enum ProviderCommand {
    /// Register a `uvx`-launched local provider.
    Add {
        #[arg(long, conflicts_with = "remote")]
        uvx: Option<String>,
        #[arg(long, conflicts_with = "uvx")]
        remote: Option<String>,
        #[arg(long)]
        command: Option<String>,
    },
    /// Remove a provider by its descriptor string (as printed by `list`).
    Remove { descriptor: String },
    /// List the currently persisted providers.
    List,
}
