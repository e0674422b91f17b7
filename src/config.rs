//! Run configuration for the fetcher.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Header carrying the fragment's sequence index.
pub const DEFAULT_FRAGMENT_HEADER: &str = "X-Ece252-Fragment";

/// Fragments per image served by the course mirrors.
pub const DEFAULT_FRAGMENTS: usize = 50;

pub const DEFAULT_MIRRORS: [&str; 3] = [
    "http://ece252-1.uwaterloo.ca:2520/image",
    "http://ece252-2.uwaterloo.ca:2520/image",
    "http://ece252-3.uwaterloo.ca:2520/image",
];

pub const DEFAULT_OUTPUT: &str = "all.png";

/// Retry behaviour for a single fragment request
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 5)
    pub max_retries: u32,

    /// Delay before the first retry (default: 200ms)
    pub initial_delay: Duration,

    /// Ceiling for the backoff delay (default: 10 seconds)
    pub max_delay: Duration,

    /// Multiplier applied after each retry (default: 2.0)
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Mirror base URLs; worker `w` starts at `mirrors[w % len]`
    pub mirrors: Vec<String>,

    /// Logical image id sent as `img=<n>`
    pub image: u32,

    /// Number of worker tasks
    pub threads: usize,

    /// Known fragment count N
    pub fragments: usize,

    /// Directory receiving `<seq>.png`
    pub work_dir: PathBuf,

    /// Final reassembled image
    pub output: PathBuf,

    pub fragment_header: String,

    /// Per-request timeout, connect excluded
    pub request_timeout: Duration,

    pub connect_timeout: Duration,

    /// Cap on GETs across all workers; `None` means `fragments * 20`
    pub max_requests: Option<usize>,

    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            image: 1,
            threads: 1,
            fragments: DEFAULT_FRAGMENTS,
            work_dir: PathBuf::from("."),
            output: PathBuf::from(DEFAULT_OUTPUT),
            fragment_header: DEFAULT_FRAGMENT_HEADER.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_requests: None,
            retry: RetryConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn request_budget(&self) -> usize {
        self.max_requests
            .unwrap_or_else(|| self.fragments.saturating_mul(20))
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("thread count must be at least 1".into()));
        }
        if self.fragments == 0 {
            return Err(Error::Config("fragment count must be at least 1".into()));
        }
        if self.mirrors.is_empty() {
            return Err(Error::Config("at least one mirror is required".into()));
        }
        if self.fragment_header.trim().is_empty() || self.fragment_header.contains(':') {
            return Err(Error::Config(format!(
                "invalid fragment header name {:?}",
                self.fragment_header
            )));
        }
        if self.request_budget() < self.fragments {
            return Err(Error::Config(format!(
                "request budget {} cannot cover {} fragments",
                self.request_budget(),
                self.fragments
            )));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(Error::Config("backoff multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}
