// src/main.rs

use clap::Parser;

use dagforge::cli::CliArgs;
use dagforge::logging;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(2);
    }

    match dagforge::run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}
