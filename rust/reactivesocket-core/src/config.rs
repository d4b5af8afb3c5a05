//! Connection configuration.

const DEFAULT_MAX_STREAMS: usize = 1024;
const DEFAULT_INITIAL_REQUEST_N: u32 = 0;

/// Tunables for a [`ConnectionAutomaton`](crate::ConnectionAutomaton).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum concurrently open streams (0 = unlimited).
    pub max_streams: usize,
    /// Demand requested from the peer on behalf of each newly registered
    /// channel's subscriber (0 = leave all requests to the application).
    pub initial_request_n: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            initial_request_n: DEFAULT_INITIAL_REQUEST_N,
        }
    }
}

impl ConnectionConfig {
    /// Defaults, overridden by `REACTIVESOCKET_MAX_STREAMS` and
    /// `REACTIVESOCKET_INITIAL_REQUEST_N` when set to a positive number.
    pub fn from_env() -> Self {
        Self {
            max_streams: env_or("REACTIVESOCKET_MAX_STREAMS", DEFAULT_MAX_STREAMS),
            initial_request_n: env_or(
                "REACTIVESOCKET_INITIAL_REQUEST_N",
                DEFAULT_INITIAL_REQUEST_N,
            ),
        }
    }

    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    pub fn with_initial_request_n(mut self, n: u32) -> Self {
        self.initial_request_n = n;
        self
    }

    /// True if `open` streams leave room for one more.
    pub(crate) fn admits(&self, open: usize) -> bool {
        self.max_streams == 0 || open < self.max_streams
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}
