//
// Receiver: busy-polls every RX queue of the port, logs the length of each packet (RUST_LOG=debug)
// and frees it before the next poll. Runs until CTRL-C (or --iterations).
//
// By default the port has one RX and one TX queue on the null driver, which fabricates frames.
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
use pktburst::payload::LengthLogger;
use pktburst::rx::RxEngine;
use pktburst::stats::print_stats;

#[derive(StructOpt, Debug)]
#[structopt(name = "burst-rx")]
struct Args {
    #[structopt(flatten)]
    opt: Opt,
}

fn defaults() -> PipelineConfig {
    PipelineConfig {
        nb_rx_queues: 1,
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

    let mut rxs: Vec<RxEngine<LengthLogger>> = (0..config.nb_rx_queues)
        .map(|queue_id| RxEngine::new(queue_id, config.burst_size, LengthLogger))
        .collect();
    let mut engines: Vec<&mut dyn BurstEngine> = rxs
        .iter_mut()
        .map(|rx| rx as &mut dyn BurstEngine)
        .collect();

    info!(
        rx_queues = config.nb_rx_queues,
        burst_size = config.burst_size,
        "polling"
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
