// crates/core/src/stages/proposal.rs
use std::sync::Arc;

use async_trait::async_trait;

use serde_json::{Map, Value};

use super::{announce, document_result, non_blank, report_text};
use crate::error::StageError;
use crate::jobs::pipeline::Stage;
use crate::jobs::state::{AccumulatedState, StatePatch, ARTIFACT_PARENT_KEY};
use crate::jobs::types::ResearchParams;
use crate::llm::{CompletionRequest, LlmProvider};

/// Value proposition used when the caller gave none.
pub const GENERIC_HELP_DESCRIPTION: &str =
    "We provide innovative solutions to help companies achieve their business goals.";

pub const PROPOSAL_KEY: &str = "proposal";

const SYSTEM_PROMPT: &str = "You are an expert B2B proposal writer. You write concise, \
persuasive, markdown-formatted partnership proposals tailored to each company's goals.";

/// Writes a partnership proposal under `proposal` and `editor.proposal`.
///
/// Needs a research report from an earlier stage. Without one it logs a
/// warning and leaves the state untouched.
pub struct ProposalStage {
    provider: Arc<dyn LlmProvider>,
}

impl ProposalStage {
    pub const NAME: &'static str = "proposal";

    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn prompt(company: &str, research: &str, help_description: &str) -> String {
        format!(
            "Company: {company}\n\
             Research Summary:\n\
             {research}\n\
             \n\
             How We Can Help (Value Proposition):\n\
             {help_description}\n\
             \n\
             ---\n\
             \n\
             Write a markdown business proposal (1-2 pages max) to {company}, structured as:\n\
             \n\
             # Partnership Proposal for {company}\n\
             ## Introduction\n\
             ## Solution Fit\n\
             ## Technical Capabilities\n\
             ## Use Case Examples\n\
             ## Pricing / Next Steps\n\
             \n\
             Ground every section in the research summary and the value proposition. \
             Return only clean markdown with section headers. Do not add commentary or instructions."
        )
    }
}

#[async_trait]
impl Stage for ProposalStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn completed_message(&self, params: &ResearchParams) -> String {
        format!("Partnership proposal generated for {}", params.company)
    }

    fn completed_result(&self, patch: &StatePatch, params: &ResearchParams) -> Option<Map<String, Value>> {
        document_result(patch, PROPOSAL_KEY, params)
    }

    async fn run(&self, state: &AccumulatedState) -> Result<StatePatch, StageError> {
        let params = state.params();
        let Some(research) = report_text(state) else {
            tracing::warn!(company = %params.company, "no research report in state; skipping proposal");
            return Ok(StatePatch::new());
        };
        let help_description = match non_blank(params.help_description.as_deref()) {
            Some(help) => help,
            None => {
                tracing::warn!("no help description provided; using generic value proposition");
                GENERIC_HELP_DESCRIPTION
            }
        };

        announce(
            state,
            Self::NAME,
            format!("Generating partnership proposal for {}", params.company),
        );
        let response = self
            .provider
            .complete(
                CompletionRequest::new(Self::prompt(&params.company, &research, help_description))
                    .with_system(SYSTEM_PROMPT),
            )
            .await?;
        tracing::info!(company = %params.company, chars = response.content.len(), "proposal generated");

        Ok(StatePatch::new()
            .set(PROPOSAL_KEY, response.content.clone())
            .set(
                ARTIFACT_PARENT_KEY,
                state.extended_map(ARTIFACT_PARENT_KEY, PROPOSAL_KEY, response.content),
            ))
    }
}
