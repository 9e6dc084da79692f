//! Echo Worker - answers every request with its own body.
//!
//! This example demonstrates:
//! - Building a transactor on stdin/stdout
//! - Registering a typed request handler
//! - Logging to stderr, since stdout carries the protocol
//!
//! # Running
//!
//! ```sh
//! printf '%s\n' '{"op":"request","id":1,"body":{"message":"hello"}}' '{"op":"stop"}' \
//!     | RUST_LOG=debug cargo run --example echo
//! # {"op":"response","id":1,"body":{"echo":"hello"}}
//! ```

use io_transactor::Transactor;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo request.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo response.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let transactor = Transactor::builder()
        .on_request(|input: EchoInput| {
            tracing::info!("echo {:?}", input);
            Ok::<_, std::io::Error>(EchoOutput {
                echo: input.message,
            })
        })
        .start()?;

    // Runs until the peer sends {"op":"stop"} or closes stdin.
    transactor.wait_until_exited()?;
    Ok(())
}
