//! Typed error kinds named in the error-handling design.
//!
//! These are the internal, strongly-typed errors that individual components raise.
//! Anything that escapes a single platform's resolve gets wrapped by `eyre` at the call
//! site (see `context!` in [`crate::output`]) so a deep failure still prints the full
//! causal chain -- which requirement pulled it in, which platform, which distribution.

use crate::prelude::*;
use thiserror::Error;

/// Failure fetching a URL: network error, non-2xx response, or a missing local file.
#[derive(Error, Debug)]
#[error("failed to fetch {url}: {reason}")]
pub struct FetchError {
    pub url: Url,
    pub reason: String,
}

/// Failure turning a Distribution's bytes into a canonical Project.
///
/// `InvalidRequirement`, `InvalidVersion`, and filesystem permission errors that occur
/// while extracting or reading a distribution are all surfaced as a `ParseError` variant
/// at the parser boundary -- they're all just different reasons a Project couldn't be
/// built, and the Project Provider treats them identically (negative-cache and move on).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{distribution}: invalid requirement {text:?}: {source}")]
    InvalidRequirement {
        distribution: String,
        text: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{distribution}: invalid version {text:?}: {source}")]
    InvalidVersion {
        distribution: String,
        text: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{distribution}: permission denied: {reason}")]
    PermissionDenied { distribution: String, reason: String },
    #[error("{distribution}: {reason}")]
    Malformed { distribution: String, reason: String },
    #[error("{distribution}: unsupported archive extension")]
    UnsupportedArchive { distribution: String },
}

/// Raised by the SAT driver when no version assignment exists for a platform, or a hard
/// constraint conflicts with the rest of the requirement graph.
#[derive(Error, Debug)]
#[error(
    "no version of {identifier} satisfies the combined requirements:\n{}",
    self.requirement_chains.iter().map(|c| format!("  - {c}")).collect::<Vec<_>>().join("\n")
)]
pub struct UnsatisfiableError {
    pub identifier: String,
    pub requirement_chains: Vec<String>,
}

/// A resolved cache entry couldn't be parsed back off disk; the caller should invalidate
/// the entry and retry once, per the propagation policy.
#[derive(Error, Debug)]
#[error("corrupt cache entry for {key}: {reason}")]
pub struct CacheCorruptionError {
    pub key: String,
    pub reason: String,
}

/// Failure loading a manifest's `[tool.nixpy]` table. A missing required key surfaces as
/// `MissingRequired` rather than silently defaulting -- only keys the design explicitly
/// names a default for are allowed to fall back.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{path}: missing required key `{key}` in [tool.nixpy], and no default could be discovered")]
    MissingRequired { path: String, key: &'static str },
    #[error("{path}: invalid value for `{key}`: {reason}")]
    InvalidValue {
        path: String,
        key: &'static str,
        reason: String,
    },
}
