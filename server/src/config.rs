use std::net::SocketAddr;

use log::warn;

use crate::registry::MAX_MEMBERS_PER_ROOM;

const DEFAULT_ZOMBIE_TIMEOUT_MS: u64 = 60_000; // 60 seconds without message = zombie
const DEFAULT_ZOMBIE_CHECK_INTERVAL_SECS: u64 = 30;

/// Hub settings, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind_addr: SocketAddr,
    pub allowed_origins: Vec<String>,
    pub max_members_per_room: usize,
    pub zombie_timeout_ms: u64,
    pub zombie_check_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            allowed_origins: vec!["http://localhost:8080".to_string()],
            max_members_per_room: MAX_MEMBERS_PER_ROOM,
            zombie_timeout_ms: DEFAULT_ZOMBIE_TIMEOUT_MS,
            zombie_check_interval_secs: DEFAULT_ZOMBIE_CHECK_INTERVAL_SECS,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("Ignoring invalid BIND_ADDR {:?}: {}", raw, e);
                defaults.bind_addr
            }),
            Err(_) => defaults.bind_addr,
        };

        Self {
            bind_addr,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|raw| parse_origins(&raw))
                .unwrap_or(defaults.allowed_origins),
            max_members_per_room: env_number("MAX_MEMBERS_PER_ROOM", defaults.max_members_per_room),
            zombie_timeout_ms: env_number("ZOMBIE_TIMEOUT_MS", defaults.zombie_timeout_ms),
            zombie_check_interval_secs: env_number(
                "ZOMBIE_CHECK_INTERVAL_SECS",
                defaults.zombie_check_interval_secs,
            ),
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.iter().any(|o| o == "*") {
            // Security warning: wildcard allows all origins
            warn!("SECURITY: Wildcard origin (*) configured - ALL origins allowed. This disables CORS protection!");
            return true;
        }
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_number<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
