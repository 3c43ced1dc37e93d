use anyhow::Result;
use std::process;
use log::error;
use plugmon::{app, cli, logging};

fn main() {
    // Set up panic handler with better error reporting
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("Application panicked: {}", panic_info);
        default_hook(panic_info);
    }));

    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::args::parse_args();

    cli::args::validate_args(&args)?;

    let config_manager = app::load_configuration(&args)?;

    let log_config = app::configure_logging(&args, &config_manager)?;
    logging::init_logger(log_config)?;

    // Handle configuration export command first (before creating runtime)
    if let Some(export_path) = &args.export_config {
        return app::handle_export_config(&config_manager, export_path);
    }

    // Multi-threaded: the monitoring loop, sink deliveries and probes run concurrently
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(app::run_command(&args, &config_manager))
}
