//
// Sender: fills bursts of buffers with a fixed payload and submits them to every TX queue of the
// port until CTRL-C (or --iterations). Buffers the queue turns down go straight back to the pool.
//
// By default the port has no RX queue and one TX queue on the null driver.
//
use std::process;

use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pktburst::config::{Opt, PipelineConfig};
use pktburst::engine::{BurstEngine, StopToken};
use pktburst::lifecycle::{
    engine_stats, Collaborators, Pipeline, RunOptions, EXIT_CONFIG, EXIT_ENV_INIT, EXIT_OK,
};
use pktburst::payload::StaticPayload;
use pktburst::stats::print_stats;
use pktburst::tx::TxEngine;

#[derive(StructOpt, Debug)]
#[structopt(name = "burst-tx")]
struct Args {
    #[structopt(flatten)]
    opt: Opt,
}

fn defaults() -> PipelineConfig {
    PipelineConfig {
        nb_rx_queues: 0,
        nb_tx_queues: 1,
        ..Default::default()
    }
}

fn run() -> i32 {
    let args = Args::from_args();

    let config = match args.opt.load(defaults()) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return EXIT_CONFIG;
        }
    };

    let stop = StopToken::new();
    if let Err(err) = stop.install_ctrlc() {
        error!("cannot install CTRL-C handler: {}", err);
        return EXIT_ENV_INIT;
    }

    let argv: Vec<String> = std::env::args().collect();
    let mut pipeline =
        match Pipeline::provision(&config, Collaborators::from_config(&config), &argv) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                error!(stage = ?err.stage(), "{}", err);
                return err.exit_code();
            }
        };

    let mut txs: Vec<TxEngine<StaticPayload>> = (0..config.nb_tx_queues)
        .map(|queue_id| {
            TxEngine::new(
                queue_id,
                config.burst_size,
                StaticPayload::new(config.payload.as_bytes()),
            )
        })
        .collect();
    let mut engines: Vec<&mut dyn BurstEngine> = txs
        .iter_mut()
        .map(|tx| tx as &mut dyn BurstEngine)
        .collect();

    info!(
        tx_queues = config.nb_tx_queues,
        burst_size = config.burst_size,
        "sending"
    );

    let r = pipeline.run(
        &mut engines,
        &stop,
        &RunOptions::from_config(&config, args.opt.iterations),
    );

    print_stats(&engine_stats(&engines), pipeline.pool());

    match r {
        Ok(iterations) => {
            info!(iterations, "stopped");
            EXIT_OK
        }
        Err(err) => {
            error!("{}", err);
            err.exit_code()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // run() has dropped the pipeline, and released everything it held, by the time it returns.
    process::exit(run());
}
