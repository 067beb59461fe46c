#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(config) = toml::from_str::<docbuild::config::Config>(data) {
        // Parsed configs must hash deterministically and validate
        // without panicking.
        let _ = config.validate();
        assert_eq!(config.config_hash(), config.config_hash());
    }
});
