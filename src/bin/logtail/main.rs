// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logtail::bounded_channel::{BoundedReceiver, bounded};
use logtail::init::tail_receiver::TailReceiverArgs;
use logtail::init::wait;
use logtail::receivers::tail::{ChannelSink, SinkMessage, TailManager};

const SINK_QUEUE_SIZE: usize = 1_000;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail files and print records as JSON lines
    Start(Box<TailReceiverArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "logtail")]
#[command(bin_name = "logtail")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "LOGTAIL_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::Start(args)) => {
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_tail(args) {
                error!(error = e, "Failed to run tail.");
                return ExitCode::from(1);
            }
        }
        None => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            error!("Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_tail(args: Box<TailReceiverArgs>) -> Result<(), BoxError> {
    let config = args.build_config();
    let (sink_tx, sink_rx) = bounded(SINK_QUEUE_SIZE);
    let manager = Arc::new(TailManager::new(config, Arc::new(ChannelSink::new(sink_tx)))?);

    let mut task_set: JoinSet<Result<(), BoxError>> = JoinSet::new();
    task_set.spawn(print_records(sink_rx));

    let cancel_token = CancellationToken::new();
    {
        let manager = manager.clone();
        let token = cancel_token.clone();
        task_set.spawn(async move { manager.run(token).await.map_err(|e| e.into()) });
    }

    let mut sig_usr1 = sig(SignalKind::user_defined1())?;
    let shutdown = signal_wait();
    tokio::pin!(shutdown);
    loop {
        select! {
            res = &mut shutdown => {
                res?;
                info!("Shutdown signal received.");
                cancel_token.cancel();
                break;
            },
            _ = sig_usr1.recv() => {
                info!("Signal SIGUSR1 received, rescanning file patterns");
                match manager.rescan().await {
                    Ok(added) => info!(added, "Finished rescan request"),
                    Err(e) => warn!(error = %e, "Rescan request failed"),
                }
            },
            e = wait::wait_for_any_task(&mut task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of tail task."),
                    Err(e) => return Err(e),
                }
                break;
            },
        }
    }

    // The printer exits once every sink sender is gone
    drop(manager);
    wait::wait_for_tasks_with_timeout(&mut task_set, SHUTDOWN_TIMEOUT).await?;

    Ok(())
}

/// Print records to stdout as JSON lines and log per-file errors
async fn print_records(mut rx: BoundedReceiver<SinkMessage>) -> Result<(), BoxError> {
    while let Some(message) = rx.next().await {
        match message {
            SinkMessage::Record(record) => {
                let line = serde_json::to_string(&record)?;
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{}", line)?;
            }
            SinkMessage::Error(e) => warn!(error = %e, "Tail error"),
        }
    }
    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    // Records go to stdout, logs to stderr
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("notify=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

async fn signal_wait() -> Result<(), BoxError> {
    let mut sig_term = sig(SignalKind::terminate())?;
    let mut sig_int = sig(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}

fn sig(kind: SignalKind) -> Result<tokio::signal::unix::Signal, BoxError> {
    Ok(signal(kind)?)
}
