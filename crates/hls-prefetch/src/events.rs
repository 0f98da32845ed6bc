use serde::Serialize;

/// Outcome of one prefetch request. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchResult {
    pub playlist_uri: String,
    /// Segments listed in the playlist, not just the ones attempted
    pub total_segments: usize,
    /// Attempted segments whose fetch completed successfully
    pub prefetched_segments: usize,
    pub success: bool,
}

/// One per segment attempt. Delivery order follows completion, not segment order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub playlist_uri: String,
    pub segment_uri: String,
    pub segment_index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// A request that failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchFailure {
    pub uri: String,
    pub code: &'static str,
    pub error_detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrefetchEvent {
    Progress(ProgressEvent),
    Complete(PrefetchResult),
    Error(PrefetchFailure),
}

impl PrefetchEvent {
    pub fn playlist_uri(&self) -> &str {
        match self {
            Self::Progress(event) => &event.playlist_uri,
            Self::Complete(result) => &result.playlist_uri,
            Self::Error(failure) => &failure.uri,
        }
    }
}
