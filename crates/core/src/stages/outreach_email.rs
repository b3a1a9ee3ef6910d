// crates/core/src/stages/outreach_email.rs
use std::sync::Arc;

use async_trait::async_trait;

use serde_json::{Map, Value};

use super::{announce, document_result, non_blank, report_text};
use crate::error::StageError;
use crate::jobs::pipeline::Stage;
use crate::jobs::state::{AccumulatedState, StatePatch};
use crate::jobs::types::ResearchParams;
use crate::llm::{CompletionRequest, LlmProvider};

pub const EMAIL_KEY: &str = "email";
pub const EMAIL_PARENT_KEY: &str = "email_generator";
pub const MAX_EMAIL_WORDS: usize = 180;

const SYSTEM_PROMPT: &str = "You are an expert B2B outreach writer.";

/// Writes a cold outreach email body under `email` and `email_generator.email`.
pub struct OutreachEmailStage {
    provider: Arc<dyn LlmProvider>,
}

impl OutreachEmailStage {
    pub const NAME: &'static str = "outreach_email";

    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn prompt(params: &ResearchParams, report: &str) -> String {
        let company = &params.company;
        let industry = non_blank(params.industry.as_deref()).unwrap_or("Unknown Industry");
        let hq = non_blank(params.hq_location.as_deref()).unwrap_or("Unknown");
        let help = non_blank(params.help_description.as_deref())
            .unwrap_or("No specific value proposition provided - use general business value");
        format!(
            "Write a personalized, high-conversion cold email to the team at {company}, \
             a {industry} company headquartered in {hq}.\n\
             \n\
             VALUE PROPOSITION FROM USER:\n\
             {help}\n\
             \n\
             Structure the email as follows:\n\
             1. Open with a genuine compliment or insight based on their recent work from the research\n\
             2. Briefly explain how you can help them\n\
             3. Connect that value to their specific business needs\n\
             4. Close with a casual, respectful call-to-action\n\
             \n\
             Strict requirements:\n\
             - Maximum {MAX_EMAIL_WORDS} words\n\
             - Sound natural and conversational\n\
             - Do NOT include subject line, greeting, or signature\n\
             \n\
             Company research context:\n\
             {report}\n\
             \n\
             Generate the email body only."
        )
    }
}

/// Keep at most `max` whitespace-separated words, preserving the original
/// spacing and line breaks up to the cut.
fn limit_words(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let mut words = 0;
    let mut in_word = false;
    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word && words == max {
                return text[..offset].to_string();
            }
            in_word = false;
        } else if !in_word {
            in_word = true;
            words += 1;
        }
    }
    text.to_string()
}

#[async_trait]
impl Stage for OutreachEmailStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn completed_message(&self, params: &ResearchParams) -> String {
        format!("Outreach email generated for {}", params.company)
    }

    fn completed_result(&self, patch: &StatePatch, params: &ResearchParams) -> Option<Map<String, Value>> {
        document_result(patch, EMAIL_KEY, params)
    }

    async fn run(&self, state: &AccumulatedState) -> Result<StatePatch, StageError> {
        let params = state.params();
        announce(
            state,
            Self::NAME,
            format!("Generating outreach email for {}", params.company),
        );

        let report = report_text(state).unwrap_or_default();
        let response = self
            .provider
            .complete(
                CompletionRequest::new(Self::prompt(params, &report)).with_system(SYSTEM_PROMPT),
            )
            .await?;
        let email = limit_words(&response.content, MAX_EMAIL_WORDS);
        tracing::info!(company = %params.company, words = email.split_whitespace().count(), "outreach email generated");

        Ok(StatePatch::new()
            .set(EMAIL_KEY, email.clone())
            .set(EMAIL_PARENT_KEY, state.extended_map(EMAIL_PARENT_KEY, EMAIL_KEY, email)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::ScriptedProvider;

    #[test]
    fn test_limit_words() {
        assert_eq!(limit_words("a b  c", 5), "a b  c");
        assert_eq!(limit_words("one two three four", 2), "one two");
        assert_eq!(limit_words("one two", 2), "one two");
        assert_eq!(limit_words("", 2), "");
    }

    #[test]
    fn test_limit_words_keeps_paragraph_breaks() {
        let text = "Hi team,\n\nLoved the launch. We help\nwith ops.\n\nChat soon?";
        assert_eq!(limit_words(text, 5), "Hi team,\n\nLoved the launch.");
        assert_eq!(limit_words(text, 50), text);
    }

    #[tokio::test]
    async fn test_long_replies_are_trimmed() {
        let reply = vec!["word"; 250].join(" ");
        let stage = OutreachEmailStage::new(Arc::new(ScriptedProvider::replying(&reply)));
        let patch = stage
            .run(&AccumulatedState::new(ResearchParams::new("Acme")))
            .await
            .unwrap();
        let email = patch.get(EMAIL_KEY).and_then(|v| v.as_text()).unwrap();
        assert_eq!(email.split_whitespace().count(), MAX_EMAIL_WORDS);
        let nested = patch.get(EMAIL_PARENT_KEY).and_then(|v| v.as_map()).unwrap();
        assert_eq!(nested.get(EMAIL_KEY).and_then(|v| v.as_text()), Some(email));
    }

    #[tokio::test]
    async fn test_prompt_uses_defaults_for_missing_inputs() {
        let provider = Arc::new(ScriptedProvider::replying("hi"));
        let stage = OutreachEmailStage::new(provider.clone());
        stage
            .run(&AccumulatedState::new(ResearchParams::new("Acme")))
            .await
            .unwrap();
        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("a Unknown Industry company headquartered in Unknown"));
        assert!(prompt.contains("No specific value proposition provided"));
    }
}
