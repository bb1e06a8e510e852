use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_ANSWER_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub poll_interval: Duration,
    /// From `OFFER_SENT` until an answer arrives.
    pub answer_timeout: Duration,
    /// From the answer (or, for responders, the offer) until the transport
    /// reports connectivity.
    pub connect_timeout: Duration,
    /// Treat a received answer as connected without waiting for the
    /// transport's callback.
    pub assume_connected_on_answer: bool,
    /// Candidates held per attempt before a remote description exists.
    pub max_pending_candidates: usize,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            answer_timeout: Duration::from_millis(DEFAULT_ANSWER_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            assume_connected_on_answer: false,
            max_pending_candidates: DEFAULT_MAX_PENDING_CANDIDATES,
        }
    }
}

impl NegotiatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: millis_env("CONNECT_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            answer_timeout: millis_env("CONNECT_ANSWER_TIMEOUT_MS")
                .unwrap_or(defaults.answer_timeout),
            connect_timeout: millis_env("CONNECT_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout),
            ..defaults
        }
    }
}

fn millis_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
