// SPDX-License-Identifier: GPL-3.0-or-later

//! Deterministic remix/edit collapsing that needs no external service.

use mixscribe_domain::{
    normalize_component, Advisor, ArbitrationContext, Candidate, Track,
};
use strsim::jaro_winkler;
use tracing::debug;

use crate::error::Result;

pub const VARIANT_ADVISOR_NAME: &str = "variant";

pub const DEFAULT_ARTIST_SIMILARITY: f64 = 0.92;

/// Words that mark a title as a version of some base song.
const DESCRIPTORS: [&str; 14] = [
    "mix", "remix", "edit", "version", "dub", "rework", "bootleg", "vip", "extended", "radio",
    "original", "club", "remaster", "remastered",
];

#[derive(Debug, Clone)]
pub struct VariantAdvisor {
    artist_similarity: f64,
}

impl Default for VariantAdvisor {
    fn default() -> Self {
        Self::new(DEFAULT_ARTIST_SIMILARITY)
    }
}

impl VariantAdvisor {
    pub fn new(artist_similarity: f64) -> Self {
        Self { artist_similarity }
    }

    fn same_song(&self, a: &Track, b: &Track) -> bool {
        let artist_a = normalize_component(&a.artist);
        let artist_b = normalize_component(&b.artist);
        jaro_winkler(&artist_a, &artist_b) >= self.artist_similarity
            && base_title(&a.title) == base_title(&b.title)
    }
}

#[async_trait::async_trait]
impl Advisor for VariantAdvisor {
    fn name(&self) -> &str {
        VARIANT_ADVISOR_NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn rank(
        &self,
        candidates: &[Candidate],
        _context: &ArbitrationContext,
    ) -> Result<Vec<Candidate>> {
        let mut ranked = candidates.to_vec();
        // Stable sort keeps priority order among equal confidences.
        ranked.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        Ok(ranked)
    }

    async fn merge_variants(&self, tracks: &[Track]) -> Result<Vec<Track>> {
        let mut kept: Vec<Track> = Vec::with_capacity(tracks.len());
        for track in tracks {
            if let Some(existing) = kept.iter().find(|k| self.same_song(k, track)) {
                debug!(
                    target: "advisory",
                    kept = %existing.title,
                    dropped = %track.title,
                    "collapsed variant"
                );
                continue;
            }
            kept.push(track.clone());
        }
        Ok(kept)
    }
}

/// Normalized title with version descriptors removed.
///
/// `"Glue (Extended Mix)"`, `"Glue [Radio Edit]"` and `"Glue - Bicep Remix"`
/// all reduce to `"glue"`; bracketed text without a descriptor is kept.
pub fn base_title(title: &str) -> String {
    let normalized = normalize_component(title);
    let mut result = String::with_capacity(normalized.len());
    let mut rest = normalized.as_str();

    while let Some(open) = rest.find(['(', '[']) {
        let close_char = if rest[open..].starts_with('(') { ')' } else { ']' };
        let Some(close) = rest[open..].find(close_char).map(|i| open + i) else {
            break;
        };
        let inner = &rest[open + 1..close];
        if has_descriptor(inner) {
            result.push_str(&rest[..open]);
        } else {
            result.push_str(&rest[..=close]);
        }
        rest = &rest[close + 1..];
    }
    result.push_str(rest);

    let trimmed = match result.split_once(" - ") {
        Some((head, tail)) if has_descriptor(tail) => head.to_string(),
        _ => result,
    };

    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_descriptor(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| DESCRIPTORS.contains(&word))
}
