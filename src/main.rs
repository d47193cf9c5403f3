use std::process::ExitCode;

use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    serial_bridge::run(serial_bridge::cli::Cli::parse()).await
}
