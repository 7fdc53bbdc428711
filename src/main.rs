use clap::Parser;
use switchyard::core::telemetry;
use switchyard::{Cli, run};
use tracing::Level;

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    telemetry::init_tracing(cli.log_json, level);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
