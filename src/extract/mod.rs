pub mod cascade;
pub mod citations;
pub mod entities;
pub mod urls;

use serde::{Deserialize, Serialize};

pub use cascade::{CascadeTrace, SourceExtraction, SourceExtractor};

use crate::models::{BackendResponse, ExtractedEntity, ExtractedSource, RankedCitation};

/// Everything extracted from one backend's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendExtraction {
    pub backend_id: String,
    pub entities: Vec<ExtractedEntity>,
    pub sources: Vec<ExtractedSource>,
    pub ranking: Vec<RankedCitation>,
    pub cascade: CascadeTrace,
    /// Responses to the cascade's follow-up prompts
    pub follow_ups: Vec<BackendResponse>,
}

impl BackendExtraction {
    /// Entity and ranking passes over the answer. No backend is called.
    pub fn from_response(response: &BackendResponse) -> Self {
        let text = &response.response_text;
        Self {
            backend_id: response.backend_id.clone(),
            entities: entities::extract_entities(text, &response.backend_id),
            sources: Vec::new(),
            ranking: citations::extract_ranking(text),
            cascade: CascadeTrace::default(),
            follow_ups: Vec::new(),
        }
    }

    pub fn attach_sources(&mut self, extraction: SourceExtraction) {
        self.sources = extraction.sources;
        self.cascade = extraction.trace;
        self.follow_ups = extraction.follow_ups;
    }
}
