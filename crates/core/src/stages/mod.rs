// crates/core/src/stages/mod.rs
//! Built-in research stages.
//!
//! The engine treats stage contents as opaque; these are the stages a
//! default deployment runs: a research brief, a partnership proposal and a
//! cold outreach email, each backed by an [`LlmProvider`].

pub mod company_research;
pub mod outreach_email;
pub mod proposal;

use std::sync::Arc;

use serde_json::{json, Map, Value};

pub use company_research::CompanyResearchStage;
pub use outreach_email::OutreachEmailStage;
pub use proposal::ProposalStage;

use crate::jobs::pipeline::Stage;
use crate::jobs::sanitize::sanitize;
use crate::jobs::state::{AccumulatedState, StatePatch};
use crate::jobs::types::ResearchParams;
use crate::llm::LlmProvider;

/// The default stage order: research, proposal, email.
pub fn default_stages(provider: Arc<dyn LlmProvider>) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(CompanyResearchStage::new(Arc::clone(&provider))),
        Arc::new(ProposalStage::new(Arc::clone(&provider))),
        Arc::new(OutreachEmailStage::new(provider)),
    ]
}

/// Publish a `processing` sub-step event through the state's publisher, if any.
pub(crate) fn announce(state: &AccumulatedState, stage: &str, message: String) {
    if let Some(publisher) = state.publisher() {
        publisher.progress(message, json!({ "step": stage, "substep": "start" }));
    }
}

/// Completion-event fields carrying the document a stage wrote under `key`.
pub(crate) fn document_result(
    patch: &StatePatch,
    key: &str,
    params: &ResearchParams,
) -> Option<Map<String, Value>> {
    let document = patch.get(key)?;
    let mut fields = Map::new();
    fields.insert(key.to_string(), sanitize(document));
    fields.insert("company".to_string(), json!(params.company));
    Some(fields)
}

/// `value` when it has non-whitespace content.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The research brief written by an earlier stage, from either location.
pub(crate) fn report_text(state: &AccumulatedState) -> Option<String> {
    state
        .locate_artifact()
        .and_then(|v| v.as_text())
        .map(str::to_string)
}
