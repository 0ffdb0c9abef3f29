//! Echo example: two channel endpoints over real TCP.
//!
//! Run as two separate processes:
//!
//! ```bash
//! # Terminal 1 - Start the server
//! cargo run --example echo -- server
//!
//! # Terminal 2 - Run the client
//! cargo run --example echo -- client
//! ```
//!
//! The server registers an `echo` endpoint that returns its two argument
//! byte strings unchanged. The client dials the server, identifies, and
//! issues a handful of calls.

use std::env;
use std::time::Duration;

use switchboard_transport::{Channel, ChannelConfig, SendOptions, TokioProviders};

const SERVER_ADDR: &str = "127.0.0.1:4040";
const CLIENT_ADDR: &str = "127.0.0.1:4041";

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Echo Server ===\n");

    let channel = Channel::builder(TokioProviders::new())
        .host_port(SERVER_ADDR)
        .process_name("echo-server")
        .build_listening()
        .await?;

    channel.register_fn("echo", |call, response| {
        println!(
            "echo: service={:?} arg2={} bytes arg3={} bytes",
            call.service,
            call.arg2.len(),
            call.arg3.len()
        );
        response.send(call.arg2.clone(), call.arg3.clone());
    });

    println!("Listening on {SERVER_ADDR}; waiting for calls...\n");

    // Serve until interrupted.
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_client() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Echo Client ===\n");

    let channel = Channel::builder(TokioProviders::new())
        .host_port(CLIENT_ADDR)
        .process_name("echo-client")
        .config(ChannelConfig::default().with_req_timeout(Duration::from_secs(2)))
        .build_listening()
        .await?;

    for i in 0..5u32 {
        let payload = format!("hello-{i}");
        let response = channel
            .send(
                SendOptions::to_host(SERVER_ADDR),
                b"echo".to_vec(),
                payload.clone().into_bytes(),
                b"body".to_vec(),
            )
            .await?;
        println!(
            "reply {i}: arg1={:?} arg2={:?}",
            String::from_utf8_lossy(&response.arg1),
            String::from_utf8_lossy(&response.arg2),
        );
        assert_eq!(response.arg1, payload.into_bytes());
    }

    channel.quit().await;
    println!("\nDone.");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mode = env::args().nth(1).unwrap_or_default();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build_local(Default::default())?;

    match mode.as_str() {
        "server" => runtime.block_on(run_server()),
        "client" => runtime.block_on(run_client()),
        _ => {
            eprintln!("usage: echo [server|client]");
            std::process::exit(2);
        }
    }
}
