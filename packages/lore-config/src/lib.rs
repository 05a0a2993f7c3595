mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	AnswerCache, ChatProviderConfig, Config, EmbeddingProviderConfig, LlmProviderConfig, Plan,
	Postgres, Providers, Search, SearchRewrite, Service, Storage, Worker,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if !matches!(cfg.providers.chat.provider_id.as_str(), "openai" | "gemini") {
		return Err(Error::Validation {
			message: "providers.chat.provider_id must be one of openai or gemini.".to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.search.default_threshold) {
		return Err(Error::Validation {
			message: "search.default_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}
	if !(1..=10).contains(&cfg.search.default_top_k) {
		return Err(Error::Validation {
			message: "search.default_top_k must be in the range 1-10.".to_string(),
		});
	}
	if cfg.search.per_post_cap == 0 {
		return Err(Error::Validation {
			message: "search.per_post_cap must be greater than zero.".to_string(),
		});
	}
	if cfg.search.global_overfetch_factor == 0 {
		return Err(Error::Validation {
			message: "search.global_overfetch_factor must be greater than zero.".to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.search.rewrite.min_confidence) {
		return Err(Error::Validation {
			message: "search.rewrite.min_confidence must be in the range 0.0-1.0.".to_string(),
		});
	}

	for (label, floor) in [
		("declarative_floor_balanced", cfg.search.rewrite.declarative_floor_balanced),
		("declarative_floor_semantic", cfg.search.rewrite.declarative_floor_semantic),
	] {
		if !floor.is_finite() || !(0.0..=1.2).contains(&floor) {
			return Err(Error::Validation {
				message: format!("search.rewrite.{label} must be in the range 0.0-1.2."),
			});
		}
	}

	if !(0.0..=1.0).contains(&cfg.answer_cache.similarity_threshold) {
		return Err(Error::Validation {
			message: "answer_cache.similarity_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.answer_cache.candidate_limit == 0 {
		return Err(Error::Validation {
			message: "answer_cache.candidate_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.answer_cache.min_length_ratio <= 0.0
		|| cfg.answer_cache.min_length_ratio >= cfg.answer_cache.max_length_ratio
	{
		return Err(Error::Validation {
			message: "answer_cache.min_length_ratio must be positive and less than answer_cache.max_length_ratio."
				.to_string(),
		});
	}
	if cfg.plan.max_output_tokens == 0 || cfg.plan.fallback_max_output_tokens == 0 {
		return Err(Error::Validation {
			message: "plan token budgets must be greater than zero.".to_string(),
		});
	}
	if !(-720..=840).contains(&cfg.plan.timezone_offset_minutes) {
		return Err(Error::Validation {
			message: "plan.timezone_offset_minutes must be in the range -720 to 840.".to_string(),
		});
	}
	if cfg.worker.poll_interval_ms == 0 {
		return Err(Error::Validation {
			message: "worker.poll_interval_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.claim_lease_seconds <= 0 {
		return Err(Error::Validation {
			message: "worker.claim_lease_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.max_retries <= 0 {
		return Err(Error::Validation {
			message: "worker.max_retries must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.backoff_ms < 0 {
		return Err(Error::Validation {
			message: "worker.backoff_ms must be zero or greater.".to_string(),
		});
	}
	if cfg.worker.chunk_max_chars == 0 {
		return Err(Error::Validation {
			message: "worker.chunk_max_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.worker.chunk_overlap_chars >= cfg.worker.chunk_max_chars {
		return Err(Error::Validation {
			message: "worker.chunk_overlap_chars must be less than worker.chunk_max_chars."
				.to_string(),
		});
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("planner", &cfg.providers.planner.api_key),
		("chat", &cfg.providers.chat.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for base in [
		&mut cfg.providers.embedding.api_base,
		&mut cfg.providers.planner.api_base,
		&mut cfg.providers.chat.api_base,
	] {
		while base.ends_with('/') {
			base.pop();
		}
	}

	cfg.providers.chat.provider_id = cfg.providers.chat.provider_id.trim().to_lowercase();
}
