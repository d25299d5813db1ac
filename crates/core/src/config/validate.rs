use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
///
/// Rejects settings that would only fail later at runtime: an unbindable port,
/// variants without an encode profile, and intervals that would spin.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.pipeline.variants.is_empty() {
        return Err(invalid("pipeline.variants cannot be empty"));
    }

    let mut seen = HashSet::new();
    for variant in &config.pipeline.variants {
        if !seen.insert(variant.as_str()) {
            return Err(invalid(format!(
                "pipeline.variants lists '{}' more than once",
                variant
            )));
        }
        if !config.encoder.profiles.contains_key(variant) {
            return Err(invalid(format!(
                "no encoder profile for variant '{}'",
                variant
            )));
        }
    }

    for (name, profile) in &config.encoder.profiles {
        if !profile.args.iter().any(|a| a.contains("{output}")) {
            return Err(invalid(format!(
                "encoder profile '{}' has no {{output}} placeholder",
                name
            )));
        }
    }

    if config.encoder.poll_interval_ms == 0 {
        return Err(invalid("encoder.poll_interval_ms cannot be 0"));
    }

    if config.torrent.poll_interval_ms == 0 {
        return Err(invalid("torrent.poll_interval_ms cannot be 0"));
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts cannot be 0"));
    }

    if config.poller.enabled {
        if config.poller.feeds.is_empty() {
            return Err(invalid("poller is enabled but poller.feeds is empty"));
        }
        if config.poller.interval_secs == 0 {
            return Err(invalid("poller.interval_secs cannot be 0"));
        }
        if config.poller.max_entries == 0 {
            return Err(invalid("poller.max_entries cannot be 0"));
        }
    }

    if let Some(pattern) = &config.poller.title_pattern {
        let re = regex_lite::Regex::new(pattern)
            .map_err(|e| invalid(format!("poller.title_pattern is not a valid regex: {}", e)))?;
        let names: Vec<&str> = re.capture_names().flatten().collect();
        if !names.contains(&"series") || !names.contains(&"episode") {
            return Err(invalid(
                "poller.title_pattern must have `series` and `episode` groups",
            ));
        }
    }

    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncodeProfile, ServerConfig};
    use std::net::IpAddr;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.poller.feeds = vec!["https://example.org/rss".to_string()];
        config
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_disabled_poller_needs_no_feeds() {
        let mut config = Config::default();
        config.poller.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = valid_config();
        config.server = ServerConfig {
            host: "0.0.0.0".parse::<IpAddr>().unwrap(),
            port: 0,
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_variant_without_profile_fails() {
        let mut config = valid_config();
        config.pipeline.variants.push("4k".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("4k"));
    }

    #[test]
    fn test_validate_duplicate_variant_fails() {
        let mut config = valid_config();
        config.pipeline.variants = vec!["720".to_string(), "720".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_variants_fails() {
        let mut config = valid_config();
        config.pipeline.variants.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_profile_without_output_fails() {
        let mut config = valid_config();
        config.encoder.profiles.insert(
            "broken".to_string(),
            EncodeProfile {
                program: None,
                args: vec!["-i".to_string(), "{input}".to_string()],
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_enabled_poller_without_feeds_fails() {
        let config = Config::default();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_retry_attempts_fails() {
        let mut config = valid_config();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_title_pattern() {
        let mut config = valid_config();
        config.poller.title_pattern = Some(r"^(?P<series>.+) - (?P<episode>\d+)".to_string());
        assert!(validate_config(&config).is_ok());

        config.poller.title_pattern = Some(r"^(?P<series>.+)$".to_string());
        assert!(validate_config(&config).is_err());

        config.poller.title_pattern = Some("(unclosed".to_string());
        assert!(validate_config(&config).is_err());
    }
}
