//! Configuration of the chill pipeline, optionally read from `YKCHILL_*` environment variables.

use crate::reg::Edition;
use std::{env, error::Error};

/// The default for [Config::min_chill_dist].
pub const DEFAULT_MIN_CHILL_DIST: u32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// The edition units are expected to be in. Units of any other edition are rejected.
    pub edition: Edition,
    /// A register whose next use is closer than this many instructions is not worth chilling.
    /// Registers whose value is never used again are always chilled.
    pub min_chill_dist: u32,
    /// How many worker threads [crate::Publisher::publish_all] may use.
    pub jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            edition: Edition::LATEST,
            min_chill_dist: DEFAULT_MIN_CHILL_DIST,
            jobs: default_jobs(),
        }
    }
}

fn default_jobs() -> usize {
    std::cmp::max(1, num_cpus::get())
}

impl Config {
    /// Create a configuration from the defaults, overridden by any of the environment variables
    /// `YKCHILL_EDITION`, `YKCHILL_MIN_CHILL_DIST`, and `YKCHILL_JOBS` that are set.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::from_vars(|k| env::var(k).ok())
    }

    /// As [Self::from_env] but looking variables up with `var`.
    fn from_vars<F>(var: F) -> Result<Self, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(x) = var("YKCHILL_EDITION") {
            let x = x
                .parse::<u32>()
                .map_err(|e| format!("Invalid YKCHILL_EDITION '{x}': {e}"))?;
            cfg.edition = Edition::new(x)?;
        }
        if let Some(x) = var("YKCHILL_MIN_CHILL_DIST") {
            cfg.min_chill_dist = match x.parse::<u32>() {
                Ok(0) => return Err("YKCHILL_MIN_CHILL_DIST must be at least 1".into()),
                Ok(d) => d,
                Err(e) => return Err(format!("Invalid YKCHILL_MIN_CHILL_DIST '{x}': {e}").into()),
            };
        }
        if let Some(x) = var("YKCHILL_JOBS") {
            cfg.jobs = match x.parse::<usize>() {
                Ok(0) => return Err("YKCHILL_JOBS must be at least 1".into()),
                Ok(j) => j,
                Err(e) => return Err(format!("Invalid YKCHILL_JOBS '{x}': {e}").into()),
            };
        }
        Ok(cfg)
    }
}
