use remedi_core::config::{AppConfig, LoadOptions};

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            let mut lines = vec!["Effective configuration (secrets redacted):".to_owned()];
            for (key, value) in config.redacted_summary() {
                lines.push(format!("  {key} = {value}"));
            }
            lines.push(String::new());
            lines.push(
                "Sources: built-in defaults < remedi.toml < REMEDI_* environment overrides."
                    .to_owned(),
            );
            lines.join("\n")
        }
        Err(error) => format!("configuration could not be loaded: {error}"),
    }
}
