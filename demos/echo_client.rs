//! Echo Client - round-trips bytes through a job server.

use clap::Parser;
use gearman_client::{Client, ServerAddress};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Send ECHO_REQ to a Gearman job server")]
struct Args {
    /// Payload to echo.
    #[arg(default_value = "DEADBEEF")]
    payload: String,

    /// Job server as host or host:port.
    #[arg(short, long, default_value = "127.0.0.1:4730")]
    server: ServerAddress,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut client = Client::new();
    client.add_server(args.server)?;

    let echoed = client.echo(args.payload.clone()).await?;
    if echoed.as_ref() == args.payload.as_bytes() {
        println!("{}", String::from_utf8_lossy(&echoed));
    } else {
        eprintln!("server echoed different bytes: {echoed:?}");
    }

    client.shutdown_now();
    Ok(())
}
