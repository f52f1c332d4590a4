//! Splitsync CLI - Split settings synchronization.

mod commands;
mod ui;

use clap::{Parser, Subcommand};
use splitsync_core::protocol::constants::{DEFAULT_CONTROL_PORT, DEFAULT_PORT};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "splitsync")]
#[command(about = "Split settings synchronization", long_about = None)]
struct Cli {
    /// Node name to announce
    #[arg(short, long, default_value_t = default_node_name())]
    name: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn default_node_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "splitsync-node".to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Run the central node (default)
    Run {
        /// Port peripherals attach to
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Localhost port for the control surface
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Attach to a central node as a peripheral
    Join {
        /// Address of the central, e.g. 192.168.1.20:17520
        central: String,
        /// Localhost port for this node's control surface
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Read the settings of a running node
    Get {
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Write the settings of a running node
    Set {
        /// Idle timeout in milliseconds (0 disables)
        idle_ms: u32,
        /// Sleep timeout in milliseconds (0 disables)
        sleep_ms: u32,
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Poll every node and print a consistency verdict
    GetAll {
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Trigger an asynchronous refresh and print the notifications
    Refresh {
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control_port: u16,
    },
    /// Show node info
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("splitsync_core=info".parse()?)
                .add_directive("splitsync_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        port: DEFAULT_PORT,
        control_port: DEFAULT_CONTROL_PORT,
    }) {
        Commands::Run { port, control_port } => {
            commands::run_central(cli.name, port, control_port).await?
        }
        Commands::Join {
            central,
            control_port,
        } => commands::run_peripheral(cli.name, central, control_port).await?,
        Commands::Get { control_port } => commands::get(control_port).await?,
        Commands::Set {
            idle_ms,
            sleep_ms,
            control_port,
        } => commands::set(control_port, idle_ms, sleep_ms).await?,
        Commands::GetAll { control_port } => commands::get_all(control_port).await?,
        Commands::Refresh { control_port } => commands::refresh(control_port).await?,
        Commands::Info => commands::show_info(cli.name),
    }

    Ok(())
}
