// crates/core/src/stages/company_research.rs
use std::sync::Arc;

use async_trait::async_trait;

use super::{announce, non_blank};
use crate::error::StageError;
use crate::jobs::pipeline::Stage;
use crate::jobs::state::{AccumulatedState, StatePatch, ARTIFACT_KEY, ARTIFACT_PARENT_KEY};
use crate::jobs::types::ResearchParams;
use crate::llm::{CompletionRequest, LlmProvider};

const SYSTEM_PROMPT: &str = "You are an expert business analyst. You write accurate, \
well-structured markdown research briefs about companies for B2B sales teams.";

/// Writes the research brief under `report` and `editor.report`.
pub struct CompanyResearchStage {
    provider: Arc<dyn LlmProvider>,
}

impl CompanyResearchStage {
    pub const NAME: &'static str = "company_research";

    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn prompt(params: &ResearchParams) -> String {
        let company = &params.company;
        let unknown = |v: Option<&str>| non_blank(v).unwrap_or("Unknown").to_string();
        format!(
            "Company: {company}\n\
             Website: {url}\n\
             Industry: {industry}\n\
             Headquarters: {hq}\n\
             \n\
             Write a markdown research brief on {company} with these sections:\n\
             \n\
             # {company} Research Report\n\
             ## Company Overview\n\
             ## Industry Position\n\
             ## Products and Services\n\
             ## Recent Developments\n\
             ## Opportunities\n\
             \n\
             Be factual and concise. If something is not known, say so rather than guessing. \
             Return only clean markdown.",
            url = unknown(params.company_url.as_deref()),
            industry = unknown(params.industry.as_deref()),
            hq = unknown(params.hq_location.as_deref()),
        )
    }
}

#[async_trait]
impl Stage for CompanyResearchStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn completed_message(&self, params: &ResearchParams) -> String {
        format!("Research report compiled for {}", params.company)
    }

    async fn run(&self, state: &AccumulatedState) -> Result<StatePatch, StageError> {
        let params = state.params();
        announce(state, Self::NAME, format!("Researching {}", params.company));

        let response = self
            .provider
            .complete(CompletionRequest::new(Self::prompt(params)).with_system(SYSTEM_PROMPT))
            .await?;
        tracing::info!(
            company = %params.company,
            provider = self.provider.name(),
            chars = response.content.len(),
            "research report generated"
        );

        Ok(StatePatch::new()
            .set(ARTIFACT_KEY, response.content.clone())
            .set(
                ARTIFACT_PARENT_KEY,
                state.extended_map(ARTIFACT_PARENT_KEY, ARTIFACT_KEY, response.content),
            ))
    }
}
