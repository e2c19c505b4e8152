//! Prompt assembly and chat-completion client.
//!
//! Builds the RagFin prompt from retrieved notification chunks plus any
//! per-session document chunks, then forwards it to an OpenAI-style chat
//! completions endpoint (Groq by default). Same retry policy as the
//! embedding client: 429/5xx and network errors retry with exponential
//! backoff, other 4xx fail immediately.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = "You are RagFin, an expert AI assistant specializing in Indian \
finance, taxation, and regulatory compliance. You answer questions using the latest \
notifications and circulars from the Reserve Bank of India and the Income Tax Department. \
Ground every answer in the provided context; when the context does not cover the question, \
say so plainly instead of guessing. Cite notification numbers and dates when they appear \
in the context.";

/// Assemble the user prompt: notification context first, then uploaded
/// document context, then the question. The combined context is truncated
/// to `max_context_chars` on a character boundary so oversized retrievals
/// never blow the model's window.
pub fn build_prompt(
    query: &str,
    rag_context: &[String],
    doc_context: &[String],
    max_context_chars: usize,
) -> String {
    let mut context = String::new();

    if !rag_context.is_empty() {
        context.push_str("Recent notifications:\n\n");
        for (i, chunk) in rag_context.iter().enumerate() {
            context.push_str(&format!("[{}] {}\n\n", i + 1, chunk));
        }
    }

    if !doc_context.is_empty() {
        context.push_str("From the user's uploaded document:\n\n");
        for chunk in doc_context {
            context.push_str(chunk);
            context.push_str("\n\n");
        }
    }

    let context = truncate_chars(&context, max_context_chars);

    if context.is_empty() {
        format!("Question: {}", query)
    } else {
        format!("Context:\n{}\nQuestion: {}", context, query)
    }
}

/// Truncate to at most `max` characters, never splitting a code point.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Send the prompt to the configured chat-completions endpoint and return
/// the assistant's reply text.
pub async fn get_llm_response(config: &LlmConfig, prompt: &str) -> Result<String> {
    let api_key = std::env::var(&config.api_key_env)
        .with_context(|| format!("{} environment variable not set", config.api_key_env))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": config.model,
        "temperature": config.temperature,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": prompt},
        ],
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(&config.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_completion(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("LLM API error {}: {}", status, body_text);
            }
            Err(e) => {
                debug!(attempt, error = %e, "LLM request failed");
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM request failed after retries")))
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prompt_includes_context_and_question() {
        let prompt = build_prompt(
            "What changed in the repo rate?",
            &["The repo rate was raised to 6.5%.".to_string()],
            &[],
            15_000,
        );
        assert!(prompt.contains("Recent notifications"));
        assert!(prompt.contains("repo rate was raised"));
        assert!(prompt.ends_with("Question: What changed in the repo rate?"));
    }

    #[test]
    fn prompt_without_context_is_just_the_question() {
        let prompt = build_prompt("Hello", &[], &[], 15_000);
        assert_eq!(prompt, "Question: Hello");
    }

    #[test]
    fn doc_context_comes_after_rag_context() {
        let prompt = build_prompt(
            "q",
            &["notification text".to_string()],
            &["uploaded text".to_string()],
            15_000,
        );
        let rag_pos = prompt.find("notification text").unwrap();
        let doc_pos = prompt.find("uploaded text").unwrap();
        assert!(rag_pos < doc_pos);
    }

    #[test]
    fn context_is_truncated_on_char_boundary() {
        let big = "सूचना ".repeat(10_000);
        let prompt = build_prompt("q", &[big], &[], 100);
        // Char-boundary truncation never produces invalid UTF-8; the
        // context portion must be at most 100 chars.
        let context_len = prompt
            .strip_prefix("Context:\n")
            .unwrap()
            .strip_suffix("\nQuestion: q")
            .unwrap()
            .chars()
            .count();
        assert!(context_len <= 100);
    }

    #[test]
    fn completion_text_is_extracted() {
        let json = json!({
            "choices": [{"message": {"role": "assistant", "content": "The rate is 6.5%."}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "The rate is 6.5%.");
    }

    #[test]
    fn malformed_completion_is_an_error() {
        assert!(parse_completion(&json!({"choices": []})).is_err());
        assert!(parse_completion(&json!({})).is_err());
    }
}
