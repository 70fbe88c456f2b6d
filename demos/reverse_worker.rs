//! Reverse Worker - registers a `reverse` function and serves jobs.
//!
//! This example demonstrates:
//! - Registering a closure as a worker function
//! - Reporting progress with `send_status`
//! - Stopping the work loop on Ctrl-C
//!
//! # Running
//!
//! ```text
//! gearmand -d
//! RUST_LOG=debug cargo run --example reverse_worker -- --server 127.0.0.1:4730
//! ```

use clap::Parser;
use gearman_client::worker::{FunctionResult, JobContext};
use gearman_client::{JobResult, ServerAddress, Worker, WorkerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Serve `reverse` jobs from one or more Gearman job servers")]
struct Args {
    /// Job server as host or host:port; may be repeated.
    #[arg(short, long = "server", default_value = "127.0.0.1:4730")]
    servers: Vec<ServerAddress>,

    /// Identifier announced to the job servers.
    #[arg(long)]
    worker_id: Option<String>,
}

fn reverse(ctx: &JobContext) -> FunctionResult {
    let total = ctx.data().len() as u64;
    ctx.send_status(0, total)?;

    let mut data = ctx.data().to_vec();
    data.reverse();

    ctx.send_status(total, total)?;
    Ok(JobResult::success(data))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = WorkerConfig::default();
    if let Some(id) = args.worker_id {
        config = config.with_worker_id(id);
    }

    let mut worker = Worker::with_config(config);
    worker.register_function("reverse", reverse)?;
    for server in args.servers {
        worker.add_server(server).await?;
    }

    // Stop on Ctrl-C
    let stop = worker.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    worker.work().await?;
    worker.shutdown().await;
    Ok(())
}
