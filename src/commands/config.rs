use crate::cli::ConfigAction;
use vfscache::{get_config_path, load_config, Result};

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            let config_path = get_config_path()?;
            println!("Config location: {}", config_path.display());
        }
        None | Some(ConfigAction::Show) => {
            let config_path = get_config_path()?;
            let config = load_config()?;
            println!("Config file: {}", config_path.display());
            if !config_path.exists() {
                println!("  (not found, showing defaults)");
            }
            println!();
            println!("Current configuration:");
            println!("  Cache:");
            println!("    policy: {}", config.cache.get_policy());
            println!("    strategy: {}", config.cache.get_strategy());
            println!("    lru_capacity: {}", config.cache.get_lru_capacity());
            println!("    soft_retain: {}", config.cache.get_soft_retain());
            println!("    reaper_poll_ms: {}", config.cache.get_reaper_poll_ms());
        }
    }
    Ok(())
}
