// SPDX-License-Identifier: GPL-3.0-or-later

//! Clients for the fingerprint-recognition services queried per segment.
//!
//! Each client implements [`mixscribe_domain::Recognizer`]:
//! - [`AcrCloudClient`]: signed requests across regional hosts
//! - [`ShazamClient`]: RapidAPI gateway, fixed match confidence
//! - [`AuddClient`]: token-authenticated upload, score-based confidence

pub mod acrcloud;
pub mod audd;
pub mod error;
pub mod rate_limiter;
pub mod shazam;
mod upload;

pub use acrcloud::{AcrCloudClient, AcrCloudClientBuilder, ACRCLOUD_ID};
pub use audd::{AuddClient, AuddClientBuilder, AUDD_ID};
pub use error::{RecognizerError, Result};
pub use rate_limiter::RateLimiter;
pub use shazam::{ShazamClient, ShazamClientBuilder, SHAZAM_ID};

pub(crate) const USER_AGENT: &str = concat!("mixscribe/", env!("CARGO_PKG_VERSION"));
