pub mod chat;
pub mod embedding;
pub mod planner;

use color_eyre::{Result, eyre};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde_json::{Map, Value};

/// Bearer auth plus any extra headers the config carries (gateways often
/// need routing or quota headers).
pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (name, value) in default_headers {
		let raw = value
			.as_str()
			.ok_or_else(|| eyre::eyre!("Default header {name:?} must be a string."))?;

		headers.insert(HeaderName::from_bytes(name.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}
