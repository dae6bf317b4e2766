use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration shared by every service process. Loaded from
/// environment variables; unparseable values fall back to defaults.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub initial_edge_weight: f64,
    pub reinforcement_amount: f64,
    pub decay_rate: f64,
    pub decay_interval: Duration,
    pub prune_threshold: f64,

    pub quorum_threshold: f64,
    pub proposal_timeout: Duration,
    pub waggle_intensity_min: f64,

    pub bus_path: PathBuf,
    pub store_path: PathBuf,
    pub stream_prefix: String,
    pub http_port: u16,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            initial_edge_weight: 0.5,
            reinforcement_amount: 0.1,
            decay_rate: 0.05,
            decay_interval: Duration::from_secs(5),
            prune_threshold: 0.1,

            quorum_threshold: 0.6,
            proposal_timeout: Duration::from_secs(30),
            waggle_intensity_min: 0.3,

            bus_path: PathBuf::from("data/bus.db"),
            store_path: PathBuf::from("data/store.db"),
            stream_prefix: "agentmesh".to_string(),
            http_port: 8080,
        }
    }
}

impl MeshConfig {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            initial_edge_weight: env_f64("INITIAL_EDGE_WEIGHT", defaults.initial_edge_weight),
            reinforcement_amount: env_f64("REINFORCEMENT_AMOUNT", defaults.reinforcement_amount),
            decay_rate: env_f64("DECAY_RATE", defaults.decay_rate),
            decay_interval: env_duration("DECAY_INTERVAL", defaults.decay_interval),
            prune_threshold: env_f64("PRUNE_THRESHOLD", defaults.prune_threshold),

            quorum_threshold: env_f64("QUORUM_THRESHOLD", defaults.quorum_threshold),
            proposal_timeout: env_duration("PROPOSAL_TIMEOUT", defaults.proposal_timeout),
            waggle_intensity_min: env_f64("WAGGLE_INTENSITY_MIN", defaults.waggle_intensity_min),

            bus_path: env_path("BUS_PATH", defaults.bus_path),
            store_path: env_path("STORE_PATH", defaults.store_path),
            stream_prefix: env_string("STREAM_PREFIX", defaults.stream_prefix),
            http_port: env_u16("HTTP_PORT", defaults.http_port),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => default,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Parses `"500ms"`, `"5s"`, `"2m"`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.trim().parse::<f64>().ok().and_then(|s| {
            if s >= 0.0 {
                Some(Duration::from_secs_f64(s))
            } else {
                None
            }
        });
    }
    if let Some(mins) = value.strip_suffix('m') {
        return mins
            .trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60));
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}
