use conduit::{DEFAULT_PORT, ProxyBuilder, Reactor};

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

/// HTTP CONNECT tunnel proxy.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Threads resolving destination names; 0 resolves on the event loop.
    #[arg(long, default_value_t = 4)]
    resolver_threads: usize,

    /// Answer bad requests with 400 and unreachable destinations with 502.
    #[arg(long)]
    error_responses: bool,

    #[arg(long, short = 'q')]
    quiet: bool,

    #[arg(long, short = 'v')]
    verbose: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let config = ProxyBuilder::new()
        .listen_addr(SocketAddr::new(args.host, args.port))
        .resolver_threads(args.resolver_threads)
        .error_responses(args.error_responses)
        .build();

    let result = config
        .and_then(Reactor::new)
        .and_then(|mut reactor| reactor.run());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "proxy stopped");
            ExitCode::FAILURE
        }
    }
}
