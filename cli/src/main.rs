//! xdperf
//!
//! High performance XDP based network traffic generator.
//!
//! # Usage
//!
//! ```bash
//! xdperf -d eth0 -p simpleudp -c udp.yaml -n 4 --count 4000000
//! XDPERF_DEVICE=eth0 xdperf --json -v
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};

mod config;
mod logging;
mod runner;

use config::{Config, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "xdperf")]
#[command(version)]
#[command(about = "high performance XDP based network traffic generator tool", long_about = None)]
struct Cli {
    /// Plugin file name (without .wasm)
    #[arg(long, short = 'p', env = "XDPERF_PLUGIN", default_value = "simple")]
    plugin: String,

    /// Plugin directory
    #[arg(
        long,
        short = 'P',
        env = "XDPERF_PLUGIN_PATH",
        default_value = "/usr/local/lib/xdperf/plugins/"
    )]
    plugin_path: PathBuf,

    /// Plugin configuration file (JSON or YAML)
    #[arg(long, short = 'c', env = "XDPERF_PLUGIN_CONFIG")]
    plugin_config: Option<PathBuf>,

    /// Compiled XDP object
    #[arg(long, env = "XDPERF_BPF_OBJECT", default_value = "/usr/local/lib/xdperf/xdp_prog.o")]
    bpf_object: PathBuf,

    /// Transmit device
    #[arg(long, short = 'd', env = "XDPERF_DEVICE", default_value = "")]
    device: String,

    /// Number of TX workers, one per core starting at core 0
    #[arg(long, short = 'n', env = "XDPERF_PARALLELISM", default_value_t = 1)]
    parallelism: usize,

    /// Total packets across all workers
    #[arg(long, env = "XDPERF_COUNT", default_value_t = 1)]
    count: u64,

    /// Log as JSON
    #[arg(long, env = "XDPERF_LOG_JSON")]
    json: bool,

    /// Disable colored log output
    #[arg(long, env = "XDPERF_NO_COLOR")]
    no_color: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(long, short = 'q', env = "XDPERF_QUIET")]
    quiet: bool,

    /// Include source locations in logs
    #[arg(long, env = "XDPERF_ADD_CALLER")]
    add_caller: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            log: LogConfig {
                json: self.json,
                no_color: self.no_color,
                verbose: self.verbose,
                quiet: self.quiet,
                add_caller: self.add_caller,
            },
            plugin_name: self.plugin,
            plugin_path: self.plugin_path,
            plugin_config: self.plugin_config,
            bpf_object: self.bpf_object,
            device: self.device,
            parallelism: self.parallelism,
            count: self.count,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Cli::parse().into_config();

    if let Err(e) = logging::init(&config.log) {
        eprintln!("Error: failed to init logger: {e}");
        return ExitCode::FAILURE;
    }
    tracing::info!("xdperf v{}", env!("CARGO_PKG_VERSION"));

    match runner::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "xdperf client start failed");
            ExitCode::FAILURE
        }
    }
}
