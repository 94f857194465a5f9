// SPDX-License-Identifier: GPL-3.0-or-later

pub use mixscribe_domain::RecognizerError;

pub type Result<T> = std::result::Result<T, RecognizerError>;

pub(crate) fn transport(err: reqwest::Error) -> RecognizerError {
    RecognizerError::Transport(err.to_string())
}

pub(crate) fn invalid_response(err: serde_json::Error) -> RecognizerError {
    RecognizerError::InvalidResponse(err.to_string())
}
