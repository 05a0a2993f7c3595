//! Sentence-form heuristics for planner rewrites.
//!
//! These are tunable classifiers, not grammar: the suffix and particle lists
//! cover the common Korean and English question shapes seen in planner
//! output, and callers treat the result as a confidence hint only.

/// Korean sentence endings that mark a question even without `?`.
const QUESTION_SUFFIXES: &[&str] = &["까", "까요", "나요", "가요", "니", "냐", "는지", "은지"];

/// Interrogative words that make a sentence question-shaped wherever they
/// appear.
const QUESTION_WORDS: &[&str] =
	&["무엇", "뭐야", "어떻게", "어디서", "누구", "언제", "왜"];

pub fn is_interrogative(text: &str) -> bool {
	let trimmed = text.trim();

	if trimmed.is_empty() {
		return false;
	}
	if trimmed.contains('?') {
		return true;
	}

	let stripped = trimmed.trim_end_matches(['.', '!', '…']);

	if QUESTION_SUFFIXES.iter().any(|suffix| stripped.ends_with(suffix)) {
		return true;
	}

	QUESTION_WORDS.iter().any(|word| stripped.contains(word))
}

/// Statement-shaped text: no question mark and a plain declarative ending.
/// Declarative rewrites keep their full weight in fusion because paraphrase
/// drift away from the question embedding is expected, not a quality signal.
pub fn is_declarative(text: &str) -> bool {
	let trimmed = text.trim();

	if trimmed.is_empty() || is_interrogative(trimmed) {
		return false;
	}

	let stripped = trimmed.trim_end_matches(['.', '!']);
	let Some(last) = stripped.chars().next_back() else {
		return false;
	};

	trimmed.ends_with('.')
		|| stripped.ends_with('다')
		|| stripped.ends_with('요')
		|| stripped.ends_with("임")
		|| last.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn question_mark_is_interrogative() {
		assert!(is_interrogative("트레잇 객체는 무엇인가?"));
		assert!(is_interrogative("what is a trait object?"));
	}

	#[test]
	fn korean_question_suffix_is_interrogative() {
		assert!(is_interrogative("트레잇 객체가 뭔가요"));
		assert!(is_interrogative("제네릭과 다른 점이 있을까"));
	}

	#[test]
	fn plain_statement_is_declarative() {
		assert!(is_declarative("트레잇 객체는 동적 디스패치 개념이다."));
		assert!(is_declarative("trait objects enable dynamic dispatch"));
		assert!(!is_declarative("트레잇 객체는 무엇인가?"));
	}
}
