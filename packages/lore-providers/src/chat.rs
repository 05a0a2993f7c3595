use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

/// Wire formats the chat config can point at. Selection is a pure mapping
/// from the configured provider id; both variants satisfy the same
/// `complete` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatProviderKind {
	OpenAi,
	Gemini,
}

impl ChatProviderKind {
	pub fn from_provider_id(provider_id: &str) -> Self {
		match provider_id.trim().to_lowercase().as_str() {
			"gemini" | "google" => Self::Gemini,
			_ => Self::OpenAi,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
	pub role: String,
	pub content: String,
}

impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: "system".to_string(), content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: "user".to_string(), content: content.into() }
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
	pub temperature: Option<f32>,
	pub top_p: Option<f32>,
	pub max_output_tokens: Option<u32>,
}

pub async fn complete(
	cfg: &lore_config::ChatProviderConfig,
	messages: &[ChatMessage],
	options: &ChatOptions,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;

	match ChatProviderKind::from_provider_id(&cfg.provider_id) {
		ChatProviderKind::OpenAi => {
			let url = format!("{}{}", cfg.api_base, cfg.path);
			let body = build_openai_body(cfg, messages, options);
			let res = client
				.post(url)
				.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
				.json(&body)
				.send()
				.await?;
			let json: Value = res.error_for_status()?.json().await?;

			parse_openai_content(&json)
		},
		ChatProviderKind::Gemini => {
			let url = format!(
				"{}{}/{}:generateContent?key={}",
				cfg.api_base, cfg.path, cfg.model, cfg.api_key
			);
			let body = build_gemini_body(cfg, messages, options);
			let res = client.post(url).json(&body).send().await?;
			let json: Value = res.error_for_status()?.json().await?;

			parse_gemini_content(&json)
		},
	}
}

fn build_openai_body(
	cfg: &lore_config::ChatProviderConfig,
	messages: &[ChatMessage],
	options: &ChatOptions,
) -> Value {
	let rendered: Vec<Value> = messages
		.iter()
		.map(|message| serde_json::json!({ "role": message.role, "content": message.content }))
		.collect();
	let mut body = serde_json::json!({
		"model": cfg.model,
		"messages": rendered,
		"temperature": options.temperature.unwrap_or(cfg.temperature),
	});

	if let Some(top_p) = options.top_p {
		body["top_p"] = serde_json::json!(top_p);
	}
	if let Some(max_output_tokens) = options.max_output_tokens {
		body["max_tokens"] = serde_json::json!(max_output_tokens);
	}

	body
}

fn build_gemini_body(
	cfg: &lore_config::ChatProviderConfig,
	messages: &[ChatMessage],
	options: &ChatOptions,
) -> Value {
	// Gemini carries system text in a dedicated instruction block and only
	// accepts user/model turns in contents.
	let system_text: Vec<&str> = messages
		.iter()
		.filter(|message| message.role == "system")
		.map(|message| message.content.as_str())
		.collect();
	let contents: Vec<Value> = messages
		.iter()
		.filter(|message| message.role != "system")
		.map(|message| {
			let role = if message.role == "assistant" { "model" } else { "user" };

			serde_json::json!({ "role": role, "parts": [{ "text": message.content }] })
		})
		.collect();
	let mut generation_config = serde_json::json!({
		"temperature": options.temperature.unwrap_or(cfg.temperature),
	});

	if let Some(top_p) = options.top_p {
		generation_config["topP"] = serde_json::json!(top_p);
	}
	if let Some(max_output_tokens) = options.max_output_tokens {
		generation_config["maxOutputTokens"] = serde_json::json!(max_output_tokens);
	}

	let mut body = serde_json::json!({
		"contents": contents,
		"generationConfig": generation_config,
	});

	if !system_text.is_empty() {
		body["systemInstruction"] =
			serde_json::json!({ "parts": [{ "text": system_text.join("\n") }] });
	}

	body
}

fn parse_openai_content(json: &Value) -> Result<String> {
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| eyre::eyre!("Chat response is missing message content."))?;

	Ok(content.to_string())
}

fn parse_gemini_content(json: &Value) -> Result<String> {
	let parts = json
		.get("candidates")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|candidate| candidate.get("content"))
		.and_then(|content| content.get("parts"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| eyre::eyre!("Chat response is missing candidate parts."))?;
	let text: String =
		parts.iter().filter_map(|part| part.get("text").and_then(|t| t.as_str())).collect();

	if text.is_empty() {
		return Err(eyre::eyre!("Chat response contains no text parts."));
	}

	Ok(text)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn provider_kind_maps_from_provider_id() {
		assert_eq!(ChatProviderKind::from_provider_id("openai"), ChatProviderKind::OpenAi);
		assert_eq!(ChatProviderKind::from_provider_id("Gemini"), ChatProviderKind::Gemini);
		assert_eq!(ChatProviderKind::from_provider_id("anything-else"), ChatProviderKind::OpenAi);
	}

	#[test]
	fn parses_openai_choice_content() {
		let json = serde_json::json!({
			"choices": [ { "message": { "content": "안녕하세요." } } ]
		});

		assert_eq!(parse_openai_content(&json).expect("parse failed"), "안녕하세요.");
	}

	#[test]
	fn parses_gemini_candidate_parts() {
		let json = serde_json::json!({
			"candidates": [
				{ "content": { "parts": [ { "text": "hello " }, { "text": "world" } ] } }
			]
		});

		assert_eq!(parse_gemini_content(&json).expect("parse failed"), "hello world");
	}

	#[test]
	fn gemini_body_splits_system_instruction() {
		let cfg_json = serde_json::json!({
			"provider_id": "gemini",
			"api_base": "https://generativelanguage.googleapis.com",
			"api_key": "key",
			"path": "/v1beta/models",
			"model": "gemini-2.0-flash",
			"temperature": 0.7,
			"timeout_ms": 1000,
			"default_headers": {}
		});
		let cfg: lore_config::ChatProviderConfig =
			serde_json::from_value(cfg_json).expect("config");
		let messages =
			vec![ChatMessage::system("stay factual"), ChatMessage::user("question text")];
		let body = build_gemini_body(&cfg, &messages, &ChatOptions::default());

		assert!(body.get("systemInstruction").is_some());
		assert_eq!(body["contents"].as_array().map(|contents| contents.len()), Some(1));
	}
}
