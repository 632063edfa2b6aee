//! # LLM Helpers
//!
//! Provider dispatch for crew tasks. Every task builds its client from a
//! [`crate::models::ModelConfig`]; the match over providers lives here once.

/// Bind `$llm` to the concrete client for `$config.provider` and evaluate `$body`.
///
/// radkit's `LlmFunction`/`LlmWorker` builders need a concrete `BaseLlm`
/// type, so the body is expanded once per provider arm.
#[macro_export]
macro_rules! with_provider_llm {
    ($config:expr, $llm:ident => $body:expr) => {{
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        match config.provider {
            LlmProvider::Anthropic => {
                let $llm = AnthropicLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::OpenAI => {
                let $llm = match &config.base_url {
                    Some(base_url) => OpenAILlm::from_env(&config.model)?.with_base_url(base_url),
                    None => OpenAILlm::from_env(&config.model)?,
                };
                $body
            }
            LlmProvider::Gemini => {
                let $llm = GeminiLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::OpenRouter => {
                let $llm = OpenRouterLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::Grok => {
                let $llm = GrokLlm::from_env(&config.model)?;
                $body
            }
            LlmProvider::DeepSeek => {
                let $llm = DeepSeekLlm::from_env(&config.model)?;
                $body
            }
        }
    }};
}

/// Run a tool-less structured task.
#[macro_export]
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        let result: anyhow::Result<$output_type> = $crate::with_provider_llm!($config, llm => {
            radkit::agent::LlmFunction::<$output_type>::new_with_system_instructions(
                llm,
                $system_prompt,
            )
            .run($input)
            .await
            .map_err(Into::into)
        });
        result
    }};
}

/// Run a structured task whose agent may call tools.
#[macro_export]
macro_rules! run_llm_worker {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr, $($tool:expr),* $(,)?) => {{
        let result: anyhow::Result<$output_type> = $crate::with_provider_llm!($config, llm => {
            radkit::agent::LlmWorker::<$output_type>::builder(llm)
                .with_system_instructions($system_prompt)
                $(.with_tool($tool))*
                .build()
                .run($input)
                .await
                .map_err(Into::into)
        });
        result
    }};
}

pub use run_llm_function;
pub use run_llm_worker;
pub use with_provider_llm;
