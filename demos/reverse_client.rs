//! Reverse Client - submits text to the `reverse` function.
//!
//! This example demonstrates:
//! - Executing an attached job and reading its result
//! - Submitting a background job and polling its status
//!
//! # Running
//!
//! ```text
//! cargo run --example reverse_worker &
//! cargo run --example reverse_client -- "Hello World"
//! cargo run --example reverse_client -- --background "Hello World"
//! ```

use std::time::Duration;

use clap::Parser;
use gearman_client::{Client, Job, JobPriority, ServerAddress};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Reverse text with a Gearman worker")]
struct Args {
    /// Text to reverse.
    text: String,

    /// Job server as host or host:port.
    #[arg(short, long, default_value = "127.0.0.1:4730")]
    server: ServerAddress,

    /// Submit as a background job and poll its status.
    #[arg(short, long)]
    background: bool,

    /// Job priority.
    #[arg(short, long, value_enum, default_value = "normal")]
    priority: Priority,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Priority {
    Low,
    Normal,
    High,
}

impl From<Priority> for JobPriority {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => JobPriority::Low,
            Priority::Normal => JobPriority::Normal,
            Priority::High => JobPriority::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut client = Client::new();
    client.add_server(args.server)?;

    let job = Job::new("reverse", args.text)
        .with_priority(args.priority.into())
        .background(args.background);

    if args.background {
        let handle = client.submit(&job).await?;
        println!("submitted {handle}");
        loop {
            let status = client.job_status(&handle).await?;
            println!(
                "known={} running={} {}/{}",
                status.known, status.running, status.numerator, status.denominator
            );
            if !status.known {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    } else {
        let result = client.execute(&job).await?;
        if result.succeeded() {
            println!("{}", String::from_utf8_lossy(result.results()));
        } else {
            eprintln!("job failed: {}", String::from_utf8_lossy(result.exceptions()));
        }
    }

    client.shutdown(Some(Duration::from_secs(5))).await;
    Ok(())
}
