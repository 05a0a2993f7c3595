pub mod plan;
pub mod presets;
pub mod rewrite;
pub mod time_serde;
pub mod timefilter;

pub use plan::{
	HybridSettings, HybridSpec, NormalizedPlan, PlanFilters, PlanMode, SearchPlan, SortOrder,
	Weights, normalize_plan, normalize_weights, sanitize_keywords, sanitize_rewrites,
};
pub use presets::{RetrievalBias, RetrievalPreset, preset_for};
pub use timefilter::{AbsoluteRange, TimeFilter, TimeUnit, to_absolute_range};
