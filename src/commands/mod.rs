pub mod config;
pub mod simulate;

pub use config::handle_config_command;
pub use simulate::{run_simulation, SimulateOptions};
