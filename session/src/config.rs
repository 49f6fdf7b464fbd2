use std::time::Duration;

const DEFAULT_HUB_URL: &str = "ws://localhost:3000/ws";
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HEARTBEAT_MS: u64 = 15_000;
pub const DEFAULT_DRIFT_THRESHOLD_SECS: f64 = 2.0;

/// Client-side tunables, read once at startup.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub hub_url: String,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub drift_threshold_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hub_url: std::env::var("WATCHPARTY_HUB_URL").unwrap_or(defaults.hub_url),
            handshake_timeout: env_millis("WATCHPARTY_HANDSHAKE_TIMEOUT_MS").unwrap_or(defaults.handshake_timeout),
            heartbeat_interval: env_millis("WATCHPARTY_HEARTBEAT_MS").unwrap_or(defaults.heartbeat_interval),
            drift_threshold_secs: defaults.drift_threshold_secs,
        }
    }

    /// Connection URL carrying the requested identity.
    pub fn connect_url(&self, participant_id: &str, display_name: &str) -> String {
        let sep = if self.hub_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}participantId={}&displayName={}",
            self.hub_url,
            sep,
            urlencoding::encode(participant_id),
            urlencoding::encode(display_name)
        )
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            log::warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.drift_threshold_secs, 2.0);
    }

    #[test]
    fn test_connect_url_encodes_name() {
        let config = SessionConfig::default();
        assert_eq!(
            config.connect_url("user-1", "Ann B"),
            "ws://localhost:3000/ws?participantId=user-1&displayName=Ann%20B"
        );
    }

    #[test]
    fn test_connect_url_escapes_reserved_and_unicode() {
        let config = SessionConfig {
            hub_url: "wss://hub.example/ws?v=2".to_string(),
            ..SessionConfig::default()
        };
        assert_eq!(
            config.connect_url("user-1", "Zoë & co=#1"),
            "wss://hub.example/ws?v=2&participantId=user-1&displayName=Zo%C3%AB%20%26%20co%3D%231"
        );
    }
}
