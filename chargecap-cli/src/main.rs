mod command;
mod func;

use clap::Parser;
use command::{CliArgs, Commands};

fn main() {
    setup_logging();
    let cli = CliArgs::parse();
    let result = match cli.command {
        Commands::Status => func::status(),
        Commands::Run => func::run(),
        Commands::SetLimit { limit } => func::set_limit(limit),
        Commands::Enable => func::enable(),
        Commands::Disable => func::disable(),
        Commands::Read { key } => func::read(&key),
        Commands::List => func::list(),
        Commands::Diagnose => func::diagnose(),
        Commands::Restore => func::restore(),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
