use std::time::Duration;

use color_eyre::{Result, eyre};
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
	#[serde(default)]
	index: Option<usize>,
	embedding: Vec<f32>,
}

/// Batch-embeds `texts` against an OpenAI-compatible embeddings endpoint.
/// Results come back in input order even when the provider reorders them.
pub async fn embed(
	cfg: &lore_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let response: EmbeddingResponse = res.error_for_status()?.json().await?;

	if response.data.is_empty() {
		return Err(eyre::eyre!("Embedding response carried no vectors."));
	}

	Ok(order_embeddings(response))
}

fn order_embeddings(response: EmbeddingResponse) -> Vec<Vec<f32>> {
	let mut indexed: Vec<(usize, Vec<f32>)> = response
		.data
		.into_iter()
		.enumerate()
		.map(|(position, datum)| (datum.index.unwrap_or(position), datum.embedding))
		.collect();

	indexed.sort_by_key(|(index, _)| *index);

	indexed.into_iter().map(|(_, embedding)| embedding).collect()
}
