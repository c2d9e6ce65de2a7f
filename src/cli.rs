//! Command-line surface for the `simio-server` binary.
//!
//! The `clap` derive conventions here — `styles()`, doc comments as
//! help text, `help_heading` groupings — are reused verbatim from the
//! teacher crate's own `Args`; only the option set changes.

use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::Parser;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Path to the YAML configuration file describing the transport
    /// and plans this server runs.
    ///
    /// Falls back to `MULTIO_SERVER_CONFIG_PATH` when omitted.
    #[arg(short = 'c', long = "config", help_heading = "Core Options")]
    pub config: Option<std::path::PathBuf>,

    /// Local port to bind on, for the `tcp` transport. Ignored by
    /// `thread` and `mpi`.
    #[arg(short = 'p', long = "port", help_heading = "Core Options")]
    pub port: Option<u16>,

    /// Emit debug-level logs (equivalent to setting `MULTIO_DEBUG`).
    #[arg(short = 'v', long = "verbose", help_heading = "Logging")]
    pub verbose: bool,

    /// Suppress informational output; only warnings and errors are
    /// logged.
    #[arg(short = 'q', long = "quiet", help_heading = "Logging")]
    pub quiet: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long = "log-file", help_heading = "Logging")]
    pub log_file: Option<std::path::PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }
}
