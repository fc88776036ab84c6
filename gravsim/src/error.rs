//! Error types for the integration core
//!
//! Store operations report validation failures through `bool` returns, so
//! everything here is either a configuration problem, a fatal numerical
//! condition, or an I/O failure at the edges (snapshots, scenario files).

use thiserror::Error;

/// Result alias used across the crate
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid configuration (box geometry, integrator parameters, ...)
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The adaptive integrator could not produce a converged step
    #[error("{integrator} did not converge at t = {t:.6e} (dt = {dt:.3e}): {reason}")]
    NonConvergence {
        integrator: &'static str,
        t: f64,
        dt: f64,
        reason: String,
    },

    /// Orbital elements are undefined for the given pair of particles
    #[error("orbit undefined: {0}")]
    Orbit(String),

    /// Snapshot could not be written or read
    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("snapshot encoding: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for errors that stop an integration (as opposed to bad input)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NonConvergence { .. })
    }
}
