// SPDX-License-Identifier: GPL-3.0-or-later

pub use mixscribe_domain::AdvisoryError;

pub type Result<T> = std::result::Result<T, AdvisoryError>;

pub(crate) fn transport(err: reqwest::Error, timeout: std::time::Duration) -> AdvisoryError {
    if err.is_timeout() {
        AdvisoryError::Timeout(timeout)
    } else {
        AdvisoryError::Transport(err.to_string())
    }
}

pub(crate) fn invalid_response(err: serde_json::Error) -> AdvisoryError {
    AdvisoryError::InvalidResponse(err.to_string())
}
