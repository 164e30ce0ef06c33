//! # nodebed
//!
//! Command-line front end for nodebed testbeds.
//!
//! ## Commands
//!
//! - `init`: Write node specs and bootstrap the nodes
//! - `start` / `stop` / `restart`: Daemon lifecycle over a node range
//! - `connect`: Connect every node in one range to every node in another, or
//!   follow a connection graph
//! - `run`: Run a command on a node range, optionally timed
//! - `attr`: List, describe, read or write node attributes
//! - `logs` / `events`: Stream a node's logs or event feed
//! - `shell`: Interactive shell in a node's environment
//! - `drivers`: List registered drivers
//!
//! ## Example
//!
//! ```bash
//! nodebed init --count 4 --deployment local --type daemon --extra binary,ipfs
//! nodebed start
//! nodebed connect '[0-3]' '[0-3]'
//! nodebed run --time '[0-1]' -- ipfs id
//! nodebed stop
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use app::App;
use commands::{attr, connect, drivers, init, lifecycle, logs, run, shell};

/// Orchestrate fleets of test-network nodes.
#[derive(Parser, Debug)]
#[command(name = "nodebed")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root directory holding testbeds and results (default: $HOME/testbed)
    #[arg(long, global = true, env = "NODEBED_ROOT")]
    root: Option<PathBuf>,

    /// Testbed to operate on
    #[arg(long, short = 't', global = true, default_value = "default")]
    testbed: String,

    /// Plugin manifest directory (default: <root>/plugins)
    #[arg(long, global = true, env = "NODEBED_PLUGINS")]
    plugins: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create node specs for a new testbed and bootstrap them
    Init {
        /// Number of nodes
        #[arg(long, short)]
        count: usize,

        /// Node type
        #[arg(long = "type", default_value = "daemon")]
        node_type: String,

        /// Node deployment
        #[arg(long, default_value = "local")]
        deployment: String,

        /// Driver extra as `key,value` (a bare `key` sets a flag)
        #[arg(long = "extra", value_name = "KEY,VALUE")]
        extras: Vec<String>,

        /// Replace an existing testbed
        #[arg(long, short)]
        force: bool,

        /// Only write specs, do not run the nodes' init command
        #[arg(long)]
        no_bootstrap: bool,

        /// Extra arguments for the init command
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Start daemons
    Start {
        /// Node range, e.g. `3` or `[0-2,5]` (default: all)
        range: Option<String>,

        /// Extra daemon arguments
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Stop daemons
    Stop {
        /// Node range (default: all)
        range: Option<String>,

        /// Send a single SIGTERM and return
        #[arg(long)]
        no_wait: bool,
    },

    /// Restart daemons
    Restart {
        /// Node range (default: all)
        range: Option<String>,

        /// Extra daemon arguments
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Connect nodes: every node of FROM dials every node of TO
    Connect {
        /// `[from] [to]` ranges (default: all to all)
        #[arg(num_args = 0..=2)]
        ranges: Vec<String>,

        /// Connection graph file with `origin:target,...` lines
        #[arg(long, value_name = "FILE", conflicts_with_all = ["ranges", "star"])]
        topology: Option<PathBuf>,

        /// Star topology: node 0 dials every other node
        #[arg(long, conflicts_with = "ranges")]
        star: bool,

        /// Per-pair timeout, e.g. `30s` or `500ms`
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Run a command on nodes
    Run {
        /// Node range (default: all)
        range: Option<String>,

        /// Print timing statistics and record the run
        #[arg(long)]
        time: bool,

        /// Metric to read before and after the command
        #[arg(long, value_name = "METRIC")]
        collect: Vec<String>,

        /// Command to run
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Inspect or change node attributes
    Attr {
        #[command(subcommand)]
        action: AttrCommand,
    },

    /// Print a node's daemon log
    Logs {
        /// Node index
        node: usize,

        /// Show stderr instead of stdout
        #[arg(long)]
        stderr: bool,
    },

    /// Stream a node's events until interrupted
    Events {
        /// Node index
        node: usize,
    },

    /// Open a shell in a node's environment
    Shell {
        /// Node index
        node: usize,
    },

    /// List registered drivers
    Drivers {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AttrCommand {
    /// List a node's attributes
    List {
        /// Node index
        node: usize,
    },
    /// Describe one attribute
    Describe {
        /// Node index
        node: usize,
        /// Attribute name
        attr: String,
    },
    /// Read an attribute
    Get {
        /// Node index
        node: usize,
        /// Attribute name
        attr: String,
    },
    /// Write an attribute
    Set {
        /// Node index
        node: usize,
        /// Attribute name
        attr: String,
        /// New value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let app = App::open(cli.root, &cli.testbed, cli.plugins)?;

    match cli.command {
        Commands::Init {
            count,
            node_type,
            deployment,
            extras,
            force,
            no_bootstrap,
            args,
        } => {
            let opts = init::InitOptions {
                count,
                node_type,
                deployment,
                extras,
                force,
                bootstrap: !no_bootstrap,
                args,
            };
            init::run(&app, opts).await?;
        }
        Commands::Start { range, args } => {
            lifecycle::start(&app, range.as_deref(), args).await?;
        }
        Commands::Stop { range, no_wait } => {
            lifecycle::stop(&app, range.as_deref(), !no_wait).await?;
        }
        Commands::Restart { range, args } => {
            lifecycle::restart(&app, range.as_deref(), args).await?;
        }
        Commands::Connect {
            ranges,
            topology,
            star,
            timeout,
        } => {
            let graph = match topology {
                Some(path) => Some(connect::Graph::File(path)),
                None if star => Some(connect::Graph::Star),
                None => None,
            };
            match graph {
                Some(graph) => connect::topology(&app, &graph, timeout).await?,
                None => connect::run(&app, &ranges, timeout).await?,
            }
        }
        Commands::Run {
            range,
            time,
            collect,
            cmd,
        } => {
            run::run(&app, range.as_deref(), time, &collect, cmd).await?;
        }
        Commands::Attr { action } => match action {
            AttrCommand::List { node } => attr::list(&app, node)?,
            AttrCommand::Describe { node, attr: name } => attr::describe(&app, node, &name)?,
            AttrCommand::Get { node, attr: name } => attr::get(&app, node, &name).await?,
            AttrCommand::Set {
                node,
                attr: name,
                value,
            } => attr::set(&app, node, &name, &value).await?,
        },
        Commands::Logs { node, stderr } => {
            logs::logs(&app, node, stderr).await?;
        }
        Commands::Events { node } => {
            logs::events(&app, node).await?;
        }
        Commands::Shell { node } => {
            shell::run(&app, node).await?;
        }
        Commands::Drivers { json } => {
            drivers::run(&app, json)?;
        }
    }

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse `30s`, `500ms`, `2m` or a bare number of seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (number, scale_ms) = if let Some(n) = raw.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60_000)
    } else {
        (raw, 1000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration `{}`", raw))?;
    value
        .checked_mul(scale_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration `{}` is too large", raw))
}
