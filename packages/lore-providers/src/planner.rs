use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde_json::Value;

/// One planner call. With a schema attached the request asks the provider
/// for constrained JSON output; without one it is a plain completion.
#[derive(Debug, Clone)]
pub struct PlannerRequest<'a> {
	pub prompt: &'a str,
	pub response_schema: Option<&'a Value>,
	pub max_output_tokens: u32,
}

/// What actually came back: parsed JSON when the provider honored the
/// constraint, raw text otherwise. The caller owns the salvage attempts.
#[derive(Debug, Clone)]
pub enum PlannerOutput {
	Structured(Value),
	Text(String),
}

pub async fn complete(
	cfg: &lore_config::LlmProviderConfig,
	req: &PlannerRequest<'_>,
) -> Result<PlannerOutput> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let mut body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": [ { "role": "user", "content": req.prompt } ],
		"max_tokens": req.max_output_tokens,
	});

	if let Some(schema) = req.response_schema {
		body["response_format"] = serde_json::json!({
			"type": "json_schema",
			"json_schema": { "name": "SearchPlan", "strict": true, "schema": schema },
		});
	}

	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| eyre::eyre!("Planner response is missing message content."))?;

	match serde_json::from_str::<Value>(content.trim()) {
		Ok(value) if value.is_object() => Ok(PlannerOutput::Structured(value)),
		_ => Ok(PlannerOutput::Text(content.to_string())),
	}
}

/// Salvages a JSON object from free-form model text: direct parse first,
/// then the first balanced `{...}` block (string- and escape-aware), then a
/// last-ditch slice from the first `{` to the final `}`.
pub fn parse_json_loose(raw: &str) -> Option<Value> {
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return None;
	}
	if let Ok(value) = serde_json::from_str::<Value>(trimmed)
		&& value.is_object()
	{
		return Some(value);
	}

	let start = trimmed.find('{')?;

	if let Some(block) = first_balanced_object(&trimmed[start..])
		&& let Ok(value) = serde_json::from_str::<Value>(block)
		&& value.is_object()
	{
		return Some(value);
	}

	let last = trimmed.rfind('}')?;

	if last <= start {
		return None;
	}

	serde_json::from_str::<Value>(&trimmed[start..=last]).ok().filter(Value::is_object)
}

fn first_balanced_object(raw: &str) -> Option<&str> {
	let mut depth = 0_usize;
	let mut in_string = false;
	let mut escaped = false;

	for (idx, ch) in raw.char_indices() {
		if in_string {
			if escaped {
				escaped = false;
			} else if ch == '\\' {
				escaped = true;
			} else if ch == '"' {
				in_string = false;
			}

			continue;
		}

		match ch {
			'"' => in_string = true,
			'{' => depth += 1,
			'}' => {
				depth = depth.checked_sub(1)?;

				if depth == 0 {
					return Some(&raw[..=idx]);
				}
			},
			_ => {},
		}
	}

	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn direct_json_parses() {
		let value = parse_json_loose(r#"{"mode":"rag"}"#).expect("object");

		assert_eq!(value["mode"], "rag");
	}

	#[test]
	fn extracts_object_from_surrounding_prose() {
		let raw = "Here is the plan:\n```json\n{\"top_k\": 5, \"note\": \"a } in a string\"}\n``` done";
		let value = parse_json_loose(raw).expect("object");

		assert_eq!(value["top_k"], 5);
		assert_eq!(value["note"], "a } in a string");
	}

	#[test]
	fn tracks_escape_state_inside_strings() {
		let raw = r#"noise {"key": "quote \" and brace }"} trailing"#;
		let value = parse_json_loose(raw).expect("object");

		assert_eq!(value["key"], "quote \" and brace }");
	}

	#[test]
	fn refuses_text_without_an_object() {
		assert!(parse_json_loose("no json here").is_none());
		assert!(parse_json_loose("[1, 2, 3]").is_none());
		assert!(parse_json_loose("").is_none());
	}
}
