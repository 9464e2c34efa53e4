use tokio_util::sync::CancellationToken;

use crate::oracle::{CallSettings, OracleHandle};

/// Headings that usually introduce a collected answer section.
const ANSWER_KEY_MARKERS: &[&str] = &["参考答案", "答案与解析", "Answer Key", "Answers"];

const GAP_MARKER: &str = "\n……\n";

const ANSWER_KEY_SYSTEM_PROMPT: &str = "You extract answer keys from exam documents.\n\
\n\
Task: Find every answer that the document states for a numbered item, whether it is listed \
in a collected answer section or written next to the item.\n\
\n\
Output:\n\
- One line per item: `<item number>: <answer>`.\n\
- Copy answers exactly; do not solve items yourself.\n\
- If the document contains no answers, output exactly NONE.\n";

/// Picks the part of the document most likely to hold the answer key, within
/// `budget` chars.
pub fn answer_key_window(text: &str, budget: usize) -> String {
    let total_chars = text.chars().count();
    if total_chars <= budget {
        return text.to_owned();
    }

    let half_byte = char_to_byte(text, total_chars / 2);
    let marker_start = ANSWER_KEY_MARKERS
        .iter()
        .filter_map(|marker| text.rfind(marker))
        .filter(|idx| *idx >= half_byte)
        .max();
    if let Some(start) = marker_start {
        return text[start..].chars().take(budget).collect();
    }

    let head_chars = budget / 4;
    let tail_chars = budget - head_chars;
    let head = text.chars().take(head_chars).collect::<String>();
    let tail_start = char_to_byte(text, total_chars - tail_chars);
    format!("{head}{GAP_MARKER}{}", &text[tail_start..])
}

/// The first `cap` chars of the key, for embedding next to each chunk.
pub fn capped(key: &str, cap: usize) -> &str {
    &key[..char_to_byte(key, cap)]
}

/// Makes exactly one oracle call. Any failure or cancellation means "no aid
/// available".
pub async fn extract_answer_key(
    oracle: &OracleHandle,
    settings: &CallSettings,
    document_text: &str,
    budget: usize,
    cancel: &CancellationToken,
) -> String {
    if document_text.trim().is_empty() {
        return String::new();
    }

    let window = answer_key_window(document_text, budget);
    let request = settings.request(
        ANSWER_KEY_SYSTEM_PROMPT,
        format!("BEGIN_DOCUMENT\n{window}\nEND_DOCUMENT"),
    );

    let started_at = std::time::Instant::now();
    let reply = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!("answer key extraction cancelled");
            return String::new();
        }
        reply = oracle.call(&request, 0, 0) => reply,
    };
    match reply {
        Ok(raw) => {
            let key = clean_answer_key(&raw);
            tracing::info!(
                window_chars = window.chars().count(),
                key_chars = key.chars().count(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "answer key extracted"
            );
            key
        }
        Err(err) => {
            tracing::warn!(error = %err, "answer key extraction failed; continuing without it");
            String::new()
        }
    }
}

fn clean_answer_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return String::new();
    }
    trimmed.to_owned()
}

fn char_to_byte(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
