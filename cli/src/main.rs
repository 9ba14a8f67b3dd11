//! ChainSub CLI — follow an Ethereum node's block heads and contract logs.
//!
//! # Commands
//! ```text
//! chainsub query          [--block <N>]
//! chainsub count          --contract <addr>
//! chainsub tx             --raw <hex>
//! chainsub deploy         --raw <hex>
//! chainsub increment      --raw <hex>
//! chainsub subscribe      [--block <N>]
//! chainsub subscribe-logs [--contract <addr>]
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd_query;
mod cmd_subscribe;
mod logging;

use logging::LogConfig;

#[derive(Parser)]
#[command(
    name = "chainsub",
    about = "Resilient block and log subscriptions for Ethereum nodes",
    long_about = "
ChainSub CLI: query blocks, submit signed transactions, and follow new heads
or contract logs over WebSocket with automatic reconnect and gap backfill.

ENVIRONMENT VARIABLES:
  INFURA_URL      HTTP JSON-RPC endpoint (query, count, tx, deploy, increment)
  INFURA_WS_URL   WebSocket endpoint, ws:// or wss:// (subscribe, subscribe-logs)
  RUST_LOG        Overrides --log-level when set
",
    version
)]
struct Cli {
    /// HTTP JSON-RPC endpoint
    #[arg(long, env = "INFURA_URL", global = true, hide_env_values = true)]
    rpc_url: Option<String>,

    /// WebSocket JSON-RPC endpoint
    #[arg(long, env = "INFURA_WS_URL", global = true, hide_env_values = true)]
    ws_url: Option<String>,

    /// Log level: trace | debug | info | warn | error
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a block summary (latest when --block is omitted)
    Query {
        #[arg(long)]
        block: Option<u64>,
    },

    /// Read the counter contract's getCount()
    Count {
        #[arg(long)]
        contract: String,
    },

    /// Submit a signed value transfer and print its hash
    Tx {
        /// Signed transaction bytes, hex
        #[arg(long)]
        raw: String,
    },

    /// Submit a signed contract deployment and print its hash
    Deploy {
        /// Signed transaction bytes, hex
        #[arg(long)]
        raw: String,
    },

    /// Submit a signed increment() call and print its hash
    Increment {
        /// Signed transaction bytes, hex
        #[arg(long)]
        raw: String,
    },

    /// Follow new block heads, backfilling from --block if given
    Subscribe {
        /// First height to deliver; without it, follow from the current head
        #[arg(long)]
        block: Option<u64>,
    },

    /// Follow contract logs
    #[command(name = "subscribe-logs")]
    SubscribeLogs {
        /// Only logs emitted by this address; all logs when omitted
        #[arg(long)]
        contract: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
    });

    match cli.command {
        Commands::Query { block } => {
            cmd_query::query(cmd_query::rpc_url(cli.rpc_url)?, block).await
        }
        Commands::Count { contract } => {
            cmd_query::count(cmd_query::rpc_url(cli.rpc_url)?, &contract).await
        }
        Commands::Tx { raw } => {
            cmd_query::submit(cmd_query::rpc_url(cli.rpc_url)?, "tx", &raw, true).await
        }
        Commands::Deploy { raw } => {
            cmd_query::submit(cmd_query::rpc_url(cli.rpc_url)?, "deploy", &raw, false).await
        }
        Commands::Increment { raw } => {
            cmd_query::submit(cmd_query::rpc_url(cli.rpc_url)?, "increment", &raw, false).await
        }
        Commands::Subscribe { block } => {
            cmd_subscribe::heads(cmd_subscribe::ws_url(cli.ws_url)?, block).await
        }
        Commands::SubscribeLogs { contract } => {
            cmd_subscribe::logs(cmd_subscribe::ws_url(cli.ws_url)?, contract.as_deref()).await
        }
    }
}
