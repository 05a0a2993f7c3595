pub mod conversations;
pub mod db;
pub mod jobs;
pub mod models;
pub mod personas;
pub mod posts;
pub mod schema;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Renders a pgvector literal; bound as text and cast with `::text::vector`
/// so queries never depend on a client-side vector codec.
pub fn vector_literal(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);
	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}
		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}
