//! Natural-language test generation. A model turns a prompt plus the
//! discovered context into a JSON test plan, which is validated and then
//! compiled to Playwright code.

pub mod codegen;
pub mod context;
pub mod executor;
pub mod llm;
pub mod plan;
pub mod strategy;

pub use codegen::{plan_to_playwright, validate_test_code};
pub use context::{AiContext, ContextPage};
pub use executor::{CaseOutcome, PlanExecutor};
pub use llm::{LlmClient, OpenAiClient};
pub use plan::{Step, TestPlan, parse_plan};
pub use strategy::FillStrategy;

use crate::error::GenerationError;
use std::time::Duration;
use tracing::{debug, info};

/// Ask `client` for a plan and validate it.
pub async fn request_plan(
    client: &dyn LlmClient,
    prompt: &str,
    context: &AiContext,
    max_tokens: u32,
    timeout: Duration,
) -> Result<Vec<TestPlan>, GenerationError> {
    let system = context::system_prompt(&context.base_url);
    let user = context::user_message(context, prompt);
    info!("Sending {} pages to the model", context.pages.len());

    let raw = tokio::time::timeout(timeout, client.complete(&system, &user, max_tokens))
        .await
        .map_err(|_| GenerationError::Timeout(timeout.as_secs()))??;
    debug!("Raw plan: {}", raw.chars().take(1500).collect::<String>());

    parse_plan(&raw)
}

/// Prompt to validated Playwright source.
pub async fn generate_ai_tests(
    client: &dyn LlmClient,
    prompt: &str,
    context: &AiContext,
    max_tokens: u32,
    timeout: Duration,
) -> Result<String, GenerationError> {
    let plans = request_plan(client, prompt, context, max_tokens, timeout).await?;
    let code = plan_to_playwright(&plans, &context.base_url, &context.auth_headers);
    validate_test_code(&code)?;
    info!("Generated {} AI tests", plans.len());
    Ok(code)
}
