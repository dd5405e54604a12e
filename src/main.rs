use anyhow::{Context, Result};
use hypertunnel::app::{Args, Command};
use hypertunnel::core::signal::exchange::{SignalSink, SignalSource};
use hypertunnel::core::tunnel::{self, TunnelConfig};
use hypertunnel::core::{crypto, tunnel::receiver::ReceiverConfig};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = match option_env!("HT_COMMIT") {
    Some(c) => c,
    None => "none",
};
const BUILD_DATE: &str = match option_env!("HT_BUILD_DATE") {
    Some(d) => d,
    None => "unknown",
};

#[tokio::main]
async fn main() {
    let args = Args::load();

    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = tokio::select! {
        res = run(args) => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted.");
            std::process::exit(130);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Some(Command::Encrypt { key, buffer, file }) => {
            let out = crypto::encrypt_file(&file, &key, buffer)?;
            println!("Encrypted to {}", out.display());
            Ok(())
        }
        Some(Command::Decrypt { key, buffer, file }) => {
            let out = crypto::decrypt_file(&file, &key, buffer)?;
            println!("Decrypted to {}", out.display());
            Ok(())
        }
        Some(Command::Version { long }) => {
            if long {
                println!("version\t{VERSION}");
                println!("commit\t{COMMIT}");
                println!("date\t{BUILD_DATE}");
            } else {
                println!("{VERSION}");
            }
            Ok(())
        }
        None => transfer(args).await,
    }
}

/// Root invocation: sender when `-f` is given, receiver otherwise.
async fn transfer(args: Args) -> Result<()> {
    let cfg = TunnelConfig {
        signal_out: SignalSink::parse(args.signal_out.as_deref()),
        signal_in: SignalSource::parse(args.signal_in.as_deref()),
        signal_timeout: Duration::from_secs(args.signal_timeout),
        copy_signal: !args.no_copy,
    };

    match args.file {
        Some(path) => {
            let path = path
                .canonicalize()
                .with_context(|| format!("file does not exist: {}", path.display()))?;
            tunnel::run_sender(&path, cfg).await
        }
        None => {
            let recv_cfg = ReceiverConfig {
                auto_accept: args.auto_accept,
            };
            tunnel::run_receiver(cfg, recv_cfg).await
        }
    }
}
