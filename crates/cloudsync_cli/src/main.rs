//! CloudSync CLI
//!
//! Command-line tools for replicating graph data between instances.
//!
//! # Commands
//!
//! - `serve` - Run the replication service
//! - `push` - Push a node or relationship to a remote instance
//! - `pages` - List the pages of a remote instance
//! - `import` - Load nodes and relationships from a JSON file
//! - `inspect` - Display local store statistics

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CloudSync command-line replication tools.
#[derive(Parser)]
#[command(name = "cloudsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding graph.cbor and files/
    #[arg(global = true, short, long, default_value = ".")]
    data: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the replication service until interrupted
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:54555")]
        bind: SocketAddr,

        /// Accepted user as NAME:PASSWORD (repeatable)
        #[arg(short, long = "user", required = true)]
        users: Vec<String>,

        /// Largest session key size offered, in bits
        #[arg(long, default_value_t = cloudsync_protocol::MAX_KEY_BITS)]
        max_key_bits: u32,
    },

    /// Push a node or relationship to a remote instance
    Push {
        /// Remote address (host:port)
        #[arg(long)]
        host: String,

        /// User name
        #[arg(short, long)]
        user: String,

        /// Password
        #[arg(short, long)]
        password: String,

        /// Id of the node (or relationship) to push
        #[arg(short, long)]
        root: String,

        /// Treat the root as a relationship id
        #[arg(long)]
        relationship: bool,

        /// Also push everything reachable from the root
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Maximum unacknowledged messages
        #[arg(long, default_value_t = cloudsync_protocol::MAX_IN_FLIGHT)]
        max_in_flight: usize,
    },

    /// List the pages of a remote instance
    Pages {
        /// Remote address (host:port)
        #[arg(long)]
        host: String,

        /// User name
        #[arg(short, long)]
        user: String,

        /// Password
        #[arg(short, long)]
        password: String,
    },

    /// Load nodes and relationships from a JSON file
    Import {
        /// JSON file with "nodes" and "relationships" arrays
        file: PathBuf,
    },

    /// Display local store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            users,
            max_key_bits,
        } => {
            commands::serve::run(&cli.data, bind, &users, max_key_bits).await?;
        }
        Commands::Push {
            host,
            user,
            password,
            root,
            relationship,
            recursive,
            max_in_flight,
        } => {
            let options = commands::push::PushOptions {
                root,
                relationship,
                recursive,
                max_in_flight,
            };
            commands::push::run(&cli.data, &host, &user, &password, options).await?;
        }
        Commands::Pages {
            host,
            user,
            password,
        } => {
            commands::pages::run(&host, &user, &password).await?;
        }
        Commands::Import { file } => {
            commands::import::run(&cli.data, &file)?;
        }
        Commands::Inspect { format } => {
            commands::inspect::run(&cli.data, &format)?;
        }
        Commands::Version => {
            println!("CloudSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Protocol version {}", cloudsync_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
