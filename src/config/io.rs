use super::models::AppConfig;
use super::tables::ConfigTables;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> AppConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return AppConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            AppConfig::default()
        }
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig, toml::de::Error> {
    let tables: ConfigTables = toml::from_str(contents)?;
    Ok(AppConfig::from(tables).clamped())
}

pub fn serialize_config(config: &AppConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&ConfigTables::from(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_config("").unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_tabled_layout() {
        let cfg = parse_config(
            r#"
[model]
name = "llama3.2"
base_url = "http://gpu-box:11434/"
temperature = 0.3

[commands]
explain_context_words = 8
max_page_chars = 0

[book]
lines_per_page = 25

[logging]
log_level = "trace"
"#,
        )
        .unwrap();
        assert_eq!(cfg.model_name, "llama3.2");
        assert_eq!(cfg.base_url, "http://gpu-box:11434");
        assert_eq!(cfg.temperature, 0.3);
        assert_eq!(cfg.explain_context_words, 8);
        assert_eq!(cfg.quote_context_words, AppConfig::default().quote_context_words);
        assert_eq!(cfg.max_page_chars, 0);
        assert_eq!(cfg.lines_per_page, 25);
        assert_eq!(cfg.log_level, LogLevel::Trace);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = parse_config(
            r#"
[model]
temperature = 9.5
request_timeout_secs = 0

[commands]
quote_context_words = 5000

[book]
lines_per_page = 2
"#,
        )
        .unwrap();
        assert_eq!(cfg.temperature, 2.0);
        assert_eq!(cfg.request_timeout_secs, 1);
        assert_eq!(cfg.quote_context_words, 200);
        assert_eq!(cfg.lines_per_page, 10);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(parse_config("[logging]\nlog_level = \"loud\"\n").is_err());
        assert!(parse_config("[model\n").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Path::new("does/not/exist/config.toml"));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn serialized_config_reads_back() {
        let mut cfg = AppConfig::default();
        cfg.model_name = "phi4".to_string();
        cfg.lines_per_page = 60;
        let text = serialize_config(&cfg).unwrap();
        assert!(text.contains("[model]"));
        assert!(text.contains("[book]"));
        assert_eq!(parse_config(&text).unwrap(), cfg);
    }
}
