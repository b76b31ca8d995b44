//! Run-time tuning knobs.
//!
//! Every component takes the configuration by reference; there is no
//! process-global mutable state. The defaults match the values the index is
//! normally run with.

use std::fmt;
use std::str::FromStr;

/// Strategy used to pick the subrange a full glob sheds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Aim for halves of roughly equal size.
    Best,
    /// Take the first strict split found.
    First,
    /// Reserved. Selecting it is rejected at parse time; reaching a split
    /// with it is a fatal error.
    Median,
}

impl fmt::Display for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Fit::Best => "best",
            Fit::First => "first",
            Fit::Median => "median",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFitError(String);

impl fmt::Display for ParseFitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid fit \"{}\" (expected best or first)", self.0)
    }
}

impl std::error::Error for ParseFitError {}

impl FromStr for Fit {
    type Err = ParseFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "best" => Ok(Fit::Best),
            "first" => Ok(Fit::First),
            other => Err(ParseFitError(other.to_string())),
        }
    }
}

/// Immutable configuration shared by the tries, the services, and the
/// pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fit used when a glob splits locally.
    pub local_fit: Fit,
    /// Fit used when a glob ejects towards another service.
    pub global_fit: Fit,
    /// Capacity of every glob.
    pub glob_capacity: usize,
    /// Prefix length at which a split subrange is widened to the full set of
    /// keys sharing its `factor`-bit prefix.
    pub factor: u32,
    /// Prefix length from which full globs eject into the bubble queue
    /// instead of splitting locally. `u32::MAX` disables bubbling.
    pub bubble: u32,
    pub verbose: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_fit: Fit::Best,
            global_fit: Fit::Best,
            glob_capacity: 256,
            factor: 64,
            bubble: u32::MAX,
            verbose: false,
            debug: false,
        }
    }
}
