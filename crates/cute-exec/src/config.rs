//! Scheduler configuration.
//!
//! Defaults come from the environment and are overridden by explicit
//! settings (the CLI flags):
//! - `CUTE_JOBS`: maximum concurrent units, default 1
//! - `CUTE_TIMEOUT_MS`: watchdog for tests without an explicit timeout, default 3000
//! - `CUTE_FILTER`: substring selecting leaves by full path
//!
//! Parsing is loose: an unparsable value falls back to the default.

use std::time::Duration;

/// Watchdog applied where no node on the lineage sets a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Console bytes kept per unit.
pub const DEFAULT_CONSOLE_LIMIT: usize = 64 * 1024;

pub const ENV_JOBS: &str = "CUTE_JOBS";
pub const ENV_TIMEOUT_MS: &str = "CUTE_TIMEOUT_MS";
pub const ENV_FILTER: &str = "CUTE_FILTER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Units in flight at once; 1 is strictly sequential.
    pub jobs: usize,
    pub default_timeout: Duration,
    /// Leaves whose path does not contain this are skipped.
    pub filter: Option<String>,
    pub console_limit: usize,
    /// Abandon the run once a unit is killed by an external signal.
    pub stop_on_terminated: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            default_timeout: DEFAULT_TIMEOUT,
            filter: None,
            console_limit: DEFAULT_CONSOLE_LIMIT,
            stop_on_terminated: false,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(jobs) = lookup(ENV_JOBS).as_deref().and_then(parse_jobs_loose) {
            config.jobs = jobs;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS).as_deref().and_then(parse_millis_loose) {
            config.default_timeout = timeout;
        }
        config.filter = lookup(ENV_FILTER).filter(|f| !f.trim().is_empty());
        config
    }

    /// `jobs` clamped to at least one.
    #[must_use]
    pub fn effective_jobs(&self) -> usize {
        self.jobs.max(1)
    }

    /// Whether a leaf with this path is selected by the filter.
    #[must_use]
    pub fn selects(&self, path: &str) -> bool {
        self.filter.as_deref().is_none_or(|f| path.contains(f))
    }
}

/// Positive job count; `auto`/`max` means one per available CPU.
#[must_use]
pub fn parse_jobs_loose(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "auto" | "max" | "all" => {
            Some(std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get))
        }
        _ => raw.parse::<usize>().ok().filter(|&n| n > 0),
    }
}

/// Milliseconds, optionally suffixed `ms` or `s`.
#[must_use]
pub fn parse_millis_loose(raw: &str) -> Option<Duration> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs);
    }
    raw.parse().ok().map(Duration::from_millis)
}
