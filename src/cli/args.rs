use clap::{Parser, Subcommand};
use anyhow::Result;
use std::path::PathBuf;
use log::{debug, info};

/// Plugin runtime and realtime alerting
#[derive(Parser, Debug)]
#[command(name = "plugmon")]
#[command(about = "Loads plugins from manifests, mounts their routes and raises alerts from plugin and system metrics")]
#[command(version)]
pub struct Args {
    /// Verbose output (debug level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (error level logging only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug output (trace level logging)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log file path for file output
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log level for file output (independent of console level)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_file_level: Option<String>,

    /// Configuration file path
    #[arg(long, value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Configuration section name
    #[arg(long, value_name = "SECTION", global = true)]
    pub config_name: Option<String>,

    /// Plugin directory (overrides configuration)
    #[arg(short = 'p', long, value_name = "DIR", global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Alert store file (overrides configuration)
    #[arg(long, value_name = "FILE", global = true)]
    pub alert_store: Option<PathBuf>,

    /// Export the effective configuration to a TOML file and exit
    #[arg(long, value_name = "FILE")]
    pub export_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Load enabled plugins and run the monitoring loop until interrupted
    Run {
        /// Tick interval override (e.g. 10s, 1m)
        #[arg(long, value_name = "DURATION")]
        tick_interval: Option<String>,

        /// Run a single monitoring tick and exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect and manage plugins
    #[command(subcommand)]
    Plugins(PluginsCommand),

    /// Feed metric payloads from a JSON file through the alerting pipeline
    Ingest {
        /// File holding a payload object or an array of payloads
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Probe system resources once and report threshold breaches
    Check,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum PluginsCommand {
    /// List discovered plugins with their status
    List,
    /// Validate manifests and show the dependency-first load order
    Check,
    /// Persist the enabled flag for a plugin
    Enable { id: String },
    /// Persist the disabled flag for a plugin
    Disable { id: String },
}

impl Args {
    /// Subcommand to execute; `run` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { tick_interval: None, once: false })
    }
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    debug!("Parsing command line arguments");
    let args = Args::parse();
    debug!("Parsed CLI arguments: {:?}", args);
    args
}

/// Validate CLI argument combinations
pub fn validate_args(args: &Args) -> Result<()> {
    debug!("Validating CLI argument combinations");

    let log_flags_count = [args.verbose, args.quiet, args.debug]
        .iter()
        .filter(|&&flag| flag)
        .count();

    if log_flags_count > 1 {
        return Err(anyhow::anyhow!(
            "Conflicting log level flags: only one of --verbose, --quiet, or --debug may be specified"
        ));
    }

    match args.log_format.to_lowercase().as_str() {
        "text" | "json" => {},
        _ => return Err(anyhow::anyhow!(
            "Invalid log format '{}'. Valid options: text, json", args.log_format
        )),
    }

    if let Some(ref level) = args.log_file_level {
        match level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {},
            _ => return Err(anyhow::anyhow!(
                "Invalid log file level '{}'. Valid levels: error, warn, info, debug, trace", level
            )),
        }
    }

    if args.log_file_level.is_some() && args.log_file.is_none() {
        return Err(anyhow::anyhow!(
            "--log-file-level requires --log-file to be specified"
        ));
    }

    if let Some(Command::Run { tick_interval: Some(interval), .. }) = &args.command {
        let parsed = super::duration_parser::parse_duration(interval)?;
        if parsed.is_zero() {
            return Err(anyhow::anyhow!("--tick-interval must be greater than zero"));
        }
    }

    info!("CLI arguments validated successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("plugmon").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_command_is_run() {
        let args = parse(&[]);
        assert_eq!(args.command(), Command::Run { tick_interval: None, once: false });
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_subcommands() {
        let args = parse(&["run", "--once", "--tick-interval", "10s"]);
        assert_eq!(args.command(), Command::Run { tick_interval: Some("10s".to_string()), once: true });

        let args = parse(&["plugins", "enable", "billing"]);
        assert_eq!(args.command(), Command::Plugins(PluginsCommand::Enable { id: "billing".to_string() }));

        let args = parse(&["ingest", "samples.json", "--plugin-dir", "/srv/plugins"]);
        assert_eq!(args.command(), Command::Ingest { file: PathBuf::from("samples.json") });
        assert_eq!(args.plugin_dir, Some(PathBuf::from("/srv/plugins")));
    }

    #[test]
    fn test_validate_args_conflicting_flags() {
        let args = parse(&["--verbose", "--quiet"]);
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_invalid_format() {
        let args = parse(&["--log-format", "yaml"]);
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_validate_args_file_level_without_file() {
        let args = parse(&["--log-file-level", "debug"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["--log-file-level", "debug", "--log-file", "plugmon.log"]);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_validate_args_tick_interval() {
        assert!(validate_args(&parse(&["run", "--tick-interval", "0s"])).is_err());
        assert!(validate_args(&parse(&["run", "--tick-interval", "soon"])).is_err());
        assert!(validate_args(&parse(&["run", "--tick-interval", "2m"])).is_ok());
    }
}
