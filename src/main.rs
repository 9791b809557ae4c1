// ABOUTME: Entry point for the sinitaivas binary.
// ABOUTME: Parses the mode, loads config, initializes tracing, and runs the stream consumer until done or interrupted.

mod logging;

use anyhow::Context;
use clap::Parser;
use sinitaivas_core::RecordDecoder;
use sinitaivas_store::StorageLayout;
use sinitaivas_stream::{
    CarBlockDecoder, Consumer, Mode, StreamerConfig, WebSocketSource, start_position,
};

/// Stream repository commits from a relay into hour-partitioned NDJSON files.
#[derive(Parser, Debug)]
#[command(name = "sinitaivas")]
#[command(version)]
struct Args {
    /// `fresh` starts at the live tip; `resume` continues from the last checkpoint
    #[arg(short, long, default_value_t = Mode::Fresh)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = StreamerConfig::from_env().context("invalid configuration")?;
    logging::init(&config.log_file)?;

    let layout = StorageLayout::new(config.home.clone()).context("failed to prepare data directory")?;
    let checkpoints = layout.checkpoint_store();
    let log = layout
        .partition_log(config.write_policy)
        .context("failed to open partition log")?;

    tracing::info!(
        mode = %args.mode,
        home = %layout.home().display(),
        partitions = %log.root().display(),
        checkpoints = %checkpoints.path().display(),
        log_file = %config.log_file.display(),
        relay = %config.relay_url,
        consumer = %config.consumer,
        write_policy = ?log.policy(),
        "sinitaivas starting up"
    );

    let start = start_position(args.mode, &checkpoints, &layout.stream_dir(), &config.consumer);

    let source = WebSocketSource::new(config.relay_url.clone()).with_idle_timeout(config.idle_timeout);
    let mut consumer = Consumer::new(
        source,
        RecordDecoder::new(CarBlockDecoder::new()),
        log,
        checkpoints,
        config.consumer.clone(),
    )
    .starting_at(start);

    tokio::select! {
        result = consumer.run_with_retry(&config.retry) => {
            result.context("stream consumer stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(position = ?consumer.position(), "interrupted, shutting down");
        }
    }

    tracing::info!(
        position = ?consumer.position(),
        state = ?consumer.state(),
        stats = ?consumer.stats(),
        "sinitaivas stopped"
    );
    Ok(())
}
