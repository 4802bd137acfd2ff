use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

use linemux::config::IoConfig;
use linemux::logging::{LogConfig, init_logging};
use linemux::relay::{Relay, RelayEvent};
use linemux::signal::ShutdownSignal;
use linemux::{DieOnFatal, OrDie, SocketChannel, Timeout, die};

/// Exit status when a socket transfer times out or the peer hangs up
const RECOVERABLE_EXIT_CODE: i32 = 2;

/// CLI arguments for linemux
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log file path (overrides LINEMUX_LOG_FILE env var)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn commands and relay their output line by line
    Run(RunArgs),
    /// Connect to a TCP peer, send and receive exact byte counts
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Bound for each selector wait, e.g. 500ms or 1.5 (overrides LINEMUX_WAIT_TIMEOUT)
    #[arg(long, value_name = "TIMEOUT")]
    wait_timeout: Option<Timeout>,

    /// Text written to every child's stdin before it is closed
    #[arg(long, value_name = "TEXT")]
    input: Option<String>,

    /// Emit one JSON object per event
    #[arg(long)]
    json: bool,

    /// Additional command line to spawn (split with shell quoting rules)
    #[arg(long = "cmd", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Command to spawn
    #[arg(last = true, value_name = "CMD")]
    argv: Vec<String>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Dotted-quad IPv4 address
    address: String,

    port: u16,

    /// Text to send
    #[arg(long, value_name = "TEXT")]
    send: Option<String>,

    /// Number of bytes to receive
    #[arg(long, value_name = "N", default_value_t = 0)]
    recv_len: usize,

    /// Bound for each readiness wait (overrides LINEMUX_SOCKET_TIMEOUT)
    #[arg(long, value_name = "TIMEOUT")]
    timeout: Option<Timeout>,

    /// Largest slice per send/recv call (overrides LINEMUX_CHUNK_SIZE)
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,
}

fn run(args: RunArgs, config: IoConfig) -> i32 {
    if args.argv.is_empty() && args.commands.is_empty() {
        eprintln!("linemux: nothing to run; pass a command after -- or use --cmd");
        return 2;
    }

    let shutdown = ShutdownSignal::install().or_die();
    let mut relay: Relay = Relay::new(config);

    if !args.argv.is_empty() {
        relay.spawn(&args.argv).or_die();
    }
    for line in &args.commands {
        relay.spawn_command_line(line).or_die();
    }
    info!("Relaying {} children", relay.len());

    if let Some(input) = &args.input {
        relay.broadcast(input.as_bytes()).or_die();
    }
    relay.close_inputs();

    let stdout = std::io::stdout();
    let statuses = relay
        .run(&shutdown, |event: RelayEvent| {
            let mut out = stdout.lock();
            if args.json {
                serde_json::to_writer(&mut out, &event)?;
                writeln!(out)
            } else {
                writeln!(out, "{event}")
            }
        })
        .or_die();

    if statuses.iter().all(|s| s.is_some_and(|s| s.success())) {
        0
    } else {
        1
    }
}

fn probe(args: ProbeArgs, config: IoConfig) -> i32 {
    let channel = SocketChannel::connect(&args.address, args.port).or_die();
    info!("Connected to {}", channel.peer());

    let transfer = || -> Result<Vec<u8>, linemux::TransferError> {
        if let Some(text) = &args.send {
            channel.send(text.as_bytes(), config.socket_timeout, config.chunk_size)?;
        }
        let mut buf = vec![0u8; args.recv_len];
        channel.recv(&mut buf, config.socket_timeout, config.chunk_size)?;
        Ok(buf)
    };

    match transfer().die_on_fatal() {
        Ok(buf) => {
            let mut out = std::io::stdout().lock();
            if let Err(e) = out.write_all(&buf).and_then(|()| out.flush()) {
                die(&e);
            }
            0
        }
        Err(e) => {
            warn!("Transfer failed: {}", e);
            eprintln!("linemux: {e}");
            RECOVERABLE_EXIT_CODE
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging with configuration from env vars and CLI args
    let log_config = LogConfig::from_env().with_overrides(cli.log_level, cli.log_file);
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = IoConfig::from_env().unwrap_or_else(|e| die(&e));

    let code = match cli.command {
        Command::Run(args) => {
            let config = config
                .with_overrides(args.wait_timeout, None, None)
                .unwrap_or_else(|e| die(&e));
            run(args, config)
        }
        Command::Probe(args) => {
            let config = config
                .with_overrides(None, args.timeout, args.chunk_size)
                .unwrap_or_else(|e| die(&e));
            probe(args, config)
        }
    };
    std::process::exit(code);
}
