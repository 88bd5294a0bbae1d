//! aerostore CLI entry point
//!
//! Installs logging, then delegates to the CLI module. Failures are
//! reported as a JSON error object on stdout and a line on stderr.

use aerostore::{cli, observability};

#[tokio::main]
async fn main() {
    if let Err(e) = observability::init_tracing() {
        eprintln!("{}", e);
    }

    if let Err(e) = cli::run().await {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
