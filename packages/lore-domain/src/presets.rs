use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Named fusion bias controlling the vector/lexical weight and the boost
/// thresholds applied after score normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetrievalBias {
	Lexical,
	#[default]
	Balanced,
	Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalPreset {
	pub alpha: f32,
	/// Normalized vector score at or above which the +0.1 boost applies.
	pub sem_boost_threshold: f32,
	/// Normalized text score at or above which the +0.1 boost applies.
	pub lex_boost_threshold: f32,
}

pub const fn preset_for(bias: RetrievalBias) -> RetrievalPreset {
	match bias {
		RetrievalBias::Lexical =>
			RetrievalPreset { alpha: 0.30, sem_boost_threshold: 0.65, lex_boost_threshold: 0.80 },
		RetrievalBias::Balanced =>
			RetrievalPreset { alpha: 0.50, sem_boost_threshold: 0.70, lex_boost_threshold: 0.75 },
		RetrievalBias::Semantic =>
			RetrievalPreset { alpha: 0.75, sem_boost_threshold: 0.80, lex_boost_threshold: 0.65 },
	}
}

impl RetrievalBias {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Lexical => "lexical",
			Self::Balanced => "balanced",
			Self::Semantic => "semantic",
		}
	}

	/// Planner output is untrusted; anything unrecognized resolves to the
	/// balanced preset instead of failing the plan.
	pub fn parse_lenient(raw: &str) -> Self {
		match raw.trim().to_lowercase().as_str() {
			"lexical" => Self::Lexical,
			"semantic" => Self::Semantic,
			_ => Self::Balanced,
		}
	}
}

impl Serialize for RetrievalBias {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for RetrievalBias {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		Ok(Self::parse_lenient(&raw))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_bias_falls_back_to_balanced() {
		assert_eq!(RetrievalBias::parse_lenient("keyword"), RetrievalBias::Balanced);
		assert_eq!(RetrievalBias::parse_lenient(" SEMANTIC "), RetrievalBias::Semantic);
	}

	#[test]
	fn presets_match_bias_table() {
		let lexical = preset_for(RetrievalBias::Lexical);

		assert_eq!(lexical.alpha, 0.30);
		assert_eq!(lexical.lex_boost_threshold, 0.80);

		let semantic = preset_for(RetrievalBias::Semantic);

		assert_eq!(semantic.alpha, 0.75);
		assert_eq!(semantic.sem_boost_threshold, 0.80);
	}
}
