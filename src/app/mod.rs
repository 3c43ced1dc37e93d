//! Application orchestration module

pub mod initialization;
pub mod execution;

pub use initialization::{
    build_services,
    configure_logging,
    handle_export_config,
    load_configuration,
    Services,
};
pub use execution::run_command;
