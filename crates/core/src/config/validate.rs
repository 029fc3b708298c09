use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Queue capacity and release interval are positive
/// - Entry timeout is at least one release interval
/// - Tab load timeout is positive
/// - Page acknowledgement timeout outlasts the submit dwell
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.queue.capacity == 0 {
        return Err(ConfigError::ValidationError(
            "queue.capacity must be at least 1".to_string(),
        ));
    }

    if config.queue.release_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "queue.release_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.queue.entry_timeout() < config.queue.release_interval() {
        return Err(ConfigError::ValidationError(format!(
            "queue entry timeout ({:?}) is shorter than the release interval ({:?})",
            config.queue.entry_timeout(),
            config.queue.release_interval()
        )));
    }

    if config.tabs.load_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "tabs.load_timeout_ms cannot be 0".to_string(),
        ));
    }

    if config.page.ack_timeout_ms <= config.page.submit_dwell_ms {
        return Err(ConfigError::ValidationError(format!(
            "page.ack_timeout_ms ({}) must exceed page.submit_dwell_ms ({})",
            config.page.ack_timeout_ms, config.page.submit_dwell_ms
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_capacity_fails() {
        let mut config = Config::default();
        config.queue.capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_entry_timeout_shorter_than_interval_fails() {
        let mut config = Config::default();
        config.queue.entry_timeout_ms = Some(500);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("entry timeout"));
    }

    #[test]
    fn test_validate_ack_timeout_must_exceed_dwell() {
        let mut config = Config::default();
        config.page.submit_dwell_ms = 5000;
        config.page.ack_timeout_ms = 5000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("ack_timeout_ms"));
    }
}
