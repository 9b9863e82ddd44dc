use std::{process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use quadrature::{
    coordinator::{Coordinator, CoordinatorConfig, IntegrationRequest},
    net::{resolve, DEFAULT_PORT},
    worker::{Worker, WorkerConfig},
    Error, FunctionId,
};
use tracing::error;

/// Distributed midpoint-rule integration.
#[derive(Parser)]
#[command(name = "quadrature", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for workers, split the integral between them and print the sum
    Coordinator {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Seconds to wait for results once work is dispatched
        #[arg(long)]
        max_time: u64,
        /// Workers required before the integral is split
        #[arg(long)]
        nodes: usize,
        /// exp, sin or sqr (or their numeric id)
        #[arg(long, default_value = "exp")]
        function: FunctionId,
        #[arg(long, default_value_t = 1.)]
        left: f64,
        #[arg(long, default_value_t = 2.)]
        right: f64,
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,
    },
    /// Register with a coordinator, compute one slice and report it
    Worker {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, default_value_t = 1)]
        cores: u32,
        /// Seconds this worker is willing to compute
        #[arg(long, default_value_t = 10)]
        max_time: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run(Cli::parse().command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if !e.is_fatal() => {
            error!("rejected: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("aborting: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Coordinator {
            host,
            port,
            max_time,
            nodes,
            function,
            left,
            right,
            tolerance,
        } => {
            let config = CoordinatorConfig::builder()
                .listen_addr(resolve(&host, port).await?)
                .max_time(Duration::from_secs(max_time))
                .num_nodes(nodes)
                .build();
            let request = IntegrationRequest::builder()
                .function(function)
                .left(left)
                .right(right)
                .tolerance(tolerance)
                .build();
            let mut coordinator = Coordinator::bind(config).await?;
            let value = coordinator.integrate(request).await?;
            println!("Result: {value}");
        }
        Command::Worker {
            host,
            port,
            cores,
            max_time,
        } => {
            let config = WorkerConfig::builder()
                .coordinator(resolve(&host, port).await?)
                .cores(cores)
                .max_time(Duration::from_secs(max_time))
                .build();
            Worker::new(config).run().await?;
            println!("Sent answer");
        }
    }
    Ok(())
}
