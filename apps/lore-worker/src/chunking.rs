use unicode_segmentation::UnicodeSegmentation;

/// Packs sentences into character-budget chunks, carrying an overlap tail
/// into the next chunk so a fact straddling a boundary still embeds whole.
/// Sentences longer than the budget are hard-split.
pub fn split_text(content: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
	let content = content.trim();

	if content.is_empty() {
		return Vec::new();
	}

	let max_chars = max_chars.max(1);
	let overlap_chars = overlap_chars.min(max_chars.saturating_sub(1));
	let mut chunks: Vec<String> = Vec::new();
	let mut current = String::new();
	let mut current_len = 0_usize;

	let mut flush = |current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>| {
		let trimmed = current.trim();

		if !trimmed.is_empty() {
			chunks.push(trimmed.to_string());
		}

		let tail: String =
			current.chars().skip(current_len.saturating_sub(overlap_chars)).collect();

		*current = tail;
		*current_len = current.chars().count();
	};

	for sentence in content.split_sentence_bounds() {
		let sentence_len = sentence.chars().count();

		if current_len > 0 && current_len + sentence_len > max_chars {
			flush(&mut current, &mut current_len, &mut chunks);
		}
		if sentence_len > max_chars {
			// One sentence over budget: emit what we have, then hard-split.
			flush(&mut current, &mut current_len, &mut chunks);

			let pieces: Vec<char> = sentence.chars().collect();

			for piece in pieces.chunks(max_chars) {
				let piece: String = piece.iter().collect();
				let trimmed = piece.trim();

				if !trimmed.is_empty() {
					chunks.push(trimmed.to_string());
				}
			}

			current.clear();
			current_len = 0;

			continue;
		}

		current.push_str(sentence);
		current_len += sentence_len;
	}

	let trimmed = current.trim();

	if !trimmed.is_empty() && chunks.last().map(|last| last != trimmed).unwrap_or(true) {
		chunks.push(trimmed.to_string());
	}

	chunks
}
