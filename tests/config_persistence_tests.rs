use tempfile::TempDir;
use vfscache::{
    load_config_from, save_config_to, CacheConfig, CachePolicy, CacheStrategy, Config,
};

#[test]
fn test_missing_file_yields_defaults() {
    let temp = TempDir::new().unwrap();
    let config = load_config_from(&temp.path().join("config.toml")).unwrap();
    assert_eq!(config.cache.get_policy(), CachePolicy::Soft);
    assert_eq!(config.cache.get_lru_capacity(), 100);
    assert_eq!(config.cache.get_reaper_poll_ms(), 1000);
}

#[test]
fn test_save_then_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("config.toml");
    let config = Config {
        cache: CacheConfig {
            policy: CachePolicy::Lru,
            strategy: CacheStrategy::OnCall,
            lru_capacity: Some(250),
            soft_retain: None,
            reaper_poll_ms: Some(200),
        },
    };

    save_config_to(&config, &path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("policy = \"lru\""));
    assert!(written.contains("strategy = \"on_call\""));
    assert!(!written.contains("soft_retain"));

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.cache.get_policy(), CachePolicy::Lru);
    assert_eq!(loaded.cache.get_strategy(), CacheStrategy::OnCall);
    assert_eq!(loaded.cache.get_lru_capacity(), 250);
    assert_eq!(loaded.cache.get_soft_retain(), 64);
}

#[test]
fn test_partial_file_fills_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[cache]\npolicy = \"weak\"\n").unwrap();

    let config = load_config_from(&path).unwrap();
    assert_eq!(config.cache.get_policy(), CachePolicy::Weak);
    assert_eq!(config.cache.get_strategy(), CacheStrategy::OnResolve);
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");

    std::fs::write(&path, "[cache]\nlru_capacity = 0\n").unwrap();
    assert!(load_config_from(&path).is_err());

    std::fs::write(&path, "[cache]\npolicy = \"fifo\"\n").unwrap();
    assert!(load_config_from(&path).is_err());

    let zero_poll = Config {
        cache: CacheConfig {
            reaper_poll_ms: Some(0),
            ..Default::default()
        },
    };
    assert!(save_config_to(&zero_poll, &path).is_err());
}
