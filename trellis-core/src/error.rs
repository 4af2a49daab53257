//! Error Types
//!
//! Misuse of the reactivity API (reactive() on a primitive, writing a
//! readonly ref, ...) never produces an `Error`: it is reported through
//! the warning channel in [`crate::config`] and the call degrades to a
//! passthrough. `Error` is reserved for the two fatal tiers:
//!
//! - programming errors in calling code (an unknown flush mode string)
//! - using the API on a thread whose host runtime was never installed

use thiserror::Error;

/// Fatal errors surfaced by the reactivity API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No host runtime is installed on the current thread.
    #[error("the host runtime is not installed on this thread; call `trellis_core::install()` before using any reactivity API")]
    NotInstalled,

    /// A flush mode string did not name one of the supported modes.
    #[error("flush must be one of [\"post\", \"pre\", \"sync\"], but got {0:?}")]
    InvalidFlush(String),
}

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        assert!(Error::NotInstalled.to_string().contains("install()"));
        assert_eq!(
            Error::InvalidFlush("later".into()).to_string(),
            "flush must be one of [\"post\", \"pre\", \"sync\"], but got \"later\""
        );
    }
}
