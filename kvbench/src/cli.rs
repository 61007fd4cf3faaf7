//! Command line interface of the benchmark binary.

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::engine::{self, Engine};
use crate::{observability, sink};

/// Load generator and latency benchmark for key-value stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Version(VersionCommand),
}

/// run the benchmark for the configured duration
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// only read existing items instead of mixing reads, writes and updates
    #[argh(switch, short = 'r')]
    read_only: bool,
}

/// print the kvbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let run = match args.command {
        Command::Version(VersionCommand {}) => {
            println!("kvbench {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Run(run) => run,
    };

    let mut config = Config::load(args.config.as_deref())?;
    if run.read_only {
        config.benchmark.read_only = true;
    }
    config.validate()?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kvbench-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(benchmark(config))
}

async fn benchmark(config: Config) -> Result<()> {
    let store = engine::connect_store(&config.store).await;
    let sink = engine::connect_sink(&config.sink)?;
    let index = config.sink.index().to_owned();
    sink::provision(sink.as_ref(), &index).await;

    let duration = config.benchmark.duration;
    let stop = async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => tracing::info!("benchmark duration elapsed"),
            _ = elegant_departure::tokio::depart()
                .on_termination()
                .on_sigint()
                .on_signal(SignalKind::hangup()) => tracing::info!("received shutdown signal"),
        }
    };

    let report = Engine::new(config.benchmark, store, sink, index)
        .run_until(stop)
        .await?;
    report.print();

    Ok(())
}
