// Playlist resolver: fetches a media playlist and extracts its segment references.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use url::Url;

use crate::cache::ResourceKind;
use crate::client::HttpFetch;
use crate::error::PrefetchError;

/// Path suffixes treated as media segments.
const SEGMENT_EXTENSIONS: [&str; 3] = [".ts", ".m4s", ".aac"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub uri: Url,
    /// Position in playback order, starting at zero.
    pub sequence_index: usize,
}

/// A parsed playlist. Built once per request and never mutated.
#[derive(Debug, Clone)]
pub struct PlaylistDocument {
    pub source_uri: Url,
    pub segments: Vec<SegmentRef>,
}

impl PlaylistDocument {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `count` segments in playback order.
    pub fn prefix(&self, count: usize) -> &[SegmentRef] {
        &self.segments[..count.min(self.segments.len())]
    }
}

fn is_media_segment(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    SEGMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Extracts segment references from a playlist body.
///
/// Blank lines and `#` lines are skipped. Every other line is resolved against
/// `playlist_url` (absolute URIs are kept as-is) and kept if its path has a media
/// segment extension. Line order is preserved.
pub fn parse_segment_refs(body: &str, playlist_url: &Url) -> Result<Vec<SegmentRef>, PrefetchError> {
    let mut segments = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let resolved = match Url::options().base_url(Some(playlist_url)).parse(line) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithCannotBeABaseBase) => {
                return Err(PrefetchError::parse(format!(
                    "cannot resolve `{line}` against {playlist_url}"
                )));
            }
            Err(e) => {
                warn!(line, error = %e, "Skipping unresolvable playlist entry");
                continue;
            }
        };

        if !is_media_segment(&resolved) {
            continue;
        }

        segments.push(SegmentRef {
            uri: resolved,
            sequence_index: segments.len(),
        });
    }

    Ok(segments)
}

pub struct PlaylistResolver {
    fetcher: Arc<dyn HttpFetch>,
}

impl PlaylistResolver {
    pub fn new(fetcher: Arc<dyn HttpFetch>) -> Self {
        Self { fetcher }
    }

    /// Fetches and parses the playlist at `playlist_uri`. Never retries.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, playlist_uri: &str) -> Result<PlaylistDocument, PrefetchError> {
        let source_uri =
            Url::parse(playlist_uri).map_err(|e| PrefetchError::invalid_url(playlist_uri, e))?;

        let body = self
            .fetcher
            .fetch(&source_uri, ResourceKind::Playlist)
            .await?;

        let text = std::str::from_utf8(&body)
            .map_err(|_| PrefetchError::empty_document(source_uri.as_str()))?;
        if text.trim().is_empty() {
            return Err(PrefetchError::empty_document(source_uri.as_str()));
        }

        let segments = parse_segment_refs(text, &source_uri)?;
        debug!(segments = segments.len(), "Resolved playlist");

        Ok(PlaylistDocument {
            source_uri,
            segments,
        })
    }
}
