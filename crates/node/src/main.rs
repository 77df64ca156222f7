//! KeyMesh Node
//!
//! Peer-to-peer secure messaging daemon.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use node::config::Config;
use node::server::Node;
use node::transport::tcp::TcpTransport;
use protocol::NodeIdentity;

/// KeyMesh Node - peer-to-peer secure messaging daemon.
#[derive(Parser, Debug)]
#[command(name = "keymesh-node")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the node.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the node and serve until interrupted
    Start {
        /// Override the node identifier from the config file
        #[arg(long)]
        name: Option<String>,
    },

    /// Write the default configuration to the given path
    Init {
        /// Destination path (defaults to the standard config location)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Send one encrypted chat message and exit
    Send {
        /// Recipient identifier
        peer: String,

        /// Message text
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    config.apply_env_overrides();
    config.validate()?;

    match cli.command {
        Commands::Start { name } => {
            if let Some(name) = name {
                config.node.name = name;
                config.validate()?;
            }

            let node = start_node(&config).await?;
            tracing::info!(
                name = %node.name(),
                listen = %node.local_endpoint(),
                root = %config.root_endpoint(),
                is_root = node.is_root(),
                "node running"
            );

            wait_for_shutdown_signal().await;
            tracing::info!("Received shutdown signal");
        }
        Commands::Init { path } => {
            let path = path.unwrap_or_else(node::config::default_config_path);
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
        }
        Commands::Send { peer, text } => {
            let node = start_node(&config).await?;
            node.send_chat(&peer, text.as_bytes()).await?;
            println!("Sent {} bytes to {}", text.len(), peer);
        }
    }

    Ok(())
}

/// Binds the listener, creates the node, and starts its loops.
async fn start_node(config: &Config) -> anyhow::Result<Arc<Node>> {
    let transport = TcpTransport::bind(&config.listen.host, config.listen.port).await?;
    let node = Node::new(
        config.node.name.clone(),
        NodeIdentity::generate(),
        config.root_endpoint(),
        config.handshake.key_size,
        Arc::new(transport),
    );
    node.start().await;
    Ok(node)
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());
    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }
        _ => {
            // Signal registration failing leaves ctrl-c as the fallback.
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["keymesh-node", "start"]).unwrap();
        match cli.command {
            Commands::Start { name } => assert!(name.is_none()),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_start_with_name_override() {
        let cli = Cli::try_parse_from(["keymesh-node", "start", "--name", "alice"]).unwrap();
        match cli.command {
            Commands::Start { name } => assert_eq!(name.as_deref(), Some("alice")),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_send_command() {
        let cli = Cli::try_parse_from(["keymesh-node", "send", "bob", "Hello!"]).unwrap();
        match cli.command {
            Commands::Send { peer, text } => {
                assert_eq!(peer, "bob");
                assert_eq!(text, "Hello!");
            }
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_send_requires_peer_and_text() {
        assert!(Cli::try_parse_from(["keymesh-node", "send", "bob"]).is_err());
    }

    #[test]
    fn test_init_command() {
        let cli =
            Cli::try_parse_from(["keymesh-node", "init", "--path", "/tmp/keymesh.toml"]).unwrap();
        match cli.command {
            Commands::Init { path } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/keymesh.toml")));
            }
            _ => panic!("Expected Init command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["keymesh-node", "-v", "-c", "/etc/keymesh.toml", "start"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/keymesh.toml")));
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["keymesh-node"]).is_err());
    }
}
