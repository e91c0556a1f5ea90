use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "chargecap",
    version = "0.1.0",
    about = "Battery charge-limit control for Apple laptops"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show battery charge, settings, and the current write path
    Status,

    /// Run the charge-control loop in the foreground
    Run,

    /// Set the charge limit percentage
    SetLimit {
        #[arg(help = "Charge limit percentage (50-100, clamped)")]
        limit: u8,
    },

    /// Turn charge limiting on
    Enable,

    /// Turn charge limiting off and restore normal charging
    Disable,

    /// Read a single SMC key and display its value
    Read {
        #[arg(help = "Four-character SMC key name (e.g. CHTE, BCLM)")]
        key: String,
    },

    /// List charge-control-related SMC keys
    List,

    /// Print a diagnostic report suitable for bug reports
    Diagnose,

    /// Disable all charge control and restore normal charging (uninstall hook)
    Restore,
}
