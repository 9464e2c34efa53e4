//! Recovery of a JSON array from raw oracle text.
//!
//! The oracle is asked for a bare JSON array but may wrap it in Markdown fences,
//! surround it with prose, or stop mid-object. Recovery runs as a fixed sequence
//! of stages over the text:
//!
//! 1. strip the wrapper (code fences, BOM, surrounding whitespace);
//! 2. bound the payload by its outermost brackets;
//! 3. if the array never closes, cut back to the last complete element and
//!    close it.
//!
//! Truncated tail data is discarded, never guessed at.

use serde_json::Value;

use crate::error::RepairError;

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    /// The JSON text that was finally parsed.
    pub text: String,
    pub items: Vec<Value>,
    /// The array had to be closed by cutting a partial tail.
    pub truncated: bool,
}

impl Repaired {
    /// A truncated response that yielded nothing is a failure worth retrying;
    /// a complete `[]` is a legitimate "no items here".
    pub fn into_items(self) -> Result<Vec<Value>, RepairError> {
        if self.truncated && self.items.is_empty() {
            return Err(RepairError::Truncated);
        }
        Ok(self.items)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    StripWrapper,
    WholeText,
    ObjectBounds,
    ArrayBounds,
    ScannedArray,
    TruncateToLastElement,
}

pub fn repair(raw: &str) -> Result<Repaired, RepairError> {
    let mut stage = Stage::StripWrapper;
    let mut payload = "";
    let mut array_start = None;
    let mut scan = ArrayScan::default();
    let mut last_error = None;

    loop {
        match stage {
            Stage::StripWrapper => {
                payload = strip_wrapper(raw);
                if payload.is_empty() {
                    return Err(RepairError::Empty);
                }
                stage = Stage::WholeText;
            }
            Stage::WholeText => {
                match serde_json::from_str::<Value>(payload) {
                    Ok(Value::Array(items)) => return Ok(complete(payload, items)),
                    Ok(object @ Value::Object(_)) => return Ok(complete(payload, vec![object])),
                    Ok(_) => return Err(RepairError::NotArray),
                    Err(err) => last_error = Some(err.to_string()),
                }
                array_start = payload.find('[');
                let object_start = payload.find('{');
                stage = match (array_start, object_start) {
                    (None, None) => return Err(RepairError::NoArray),
                    (Some(a), Some(o)) if o < a => Stage::ObjectBounds,
                    (None, Some(_)) => Stage::ObjectBounds,
                    _ => Stage::ArrayBounds,
                };
            }
            Stage::ObjectBounds => {
                if let Some(slice) = bounded(payload, '{', '}')
                    && let Ok(object @ Value::Object(_)) = serde_json::from_str::<Value>(slice)
                {
                    return Ok(complete(slice, vec![object]));
                }
                if array_start.is_none() {
                    return Err(RepairError::Malformed(
                        last_error.unwrap_or_else(|| "unterminated object".to_owned()),
                    ));
                }
                stage = Stage::ArrayBounds;
            }
            Stage::ArrayBounds => {
                if let Some(slice) = bounded(payload, '[', ']') {
                    match serde_json::from_str::<Vec<Value>>(slice) {
                        Ok(items) => return Ok(complete(slice, items)),
                        Err(err) => last_error = Some(err.to_string()),
                    }
                }
                stage = Stage::ScannedArray;
            }
            Stage::ScannedArray => {
                let Some(start) = array_start else {
                    return Err(RepairError::NoArray);
                };
                let array = &payload[start..];
                scan = scan_array(array);
                if let Some(close) = scan.closed_at {
                    let slice = &array[..=close];
                    match serde_json::from_str::<Vec<Value>>(slice) {
                        Ok(items) => return Ok(complete(slice, items)),
                        Err(err) => last_error = Some(err.to_string()),
                    }
                }
                stage = Stage::TruncateToLastElement;
            }
            Stage::TruncateToLastElement => {
                let Some(start) = array_start else {
                    return Err(RepairError::NoArray);
                };
                let array = &payload[start..];
                let text = match scan.last_complete {
                    Some(end) => format!("{}]", &array[..=end]),
                    None => "[]".to_owned(),
                };
                return match serde_json::from_str::<Vec<Value>>(&text) {
                    Ok(items) => Ok(Repaired {
                        text,
                        items,
                        truncated: true,
                    }),
                    Err(err) => Err(RepairError::Malformed(format!(
                        "{err} (before repair: {})",
                        last_error.unwrap_or_default()
                    ))),
                };
            }
        }
    }
}

fn complete(text: &str, items: Vec<Value>) -> Repaired {
    Repaired {
        text: text.to_owned(),
        items,
        truncated: false,
    }
}

fn strip_wrapper(raw: &str) -> &str {
    let trimmed = raw.trim().trim_start_matches('\u{feff}').trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let body = trimmed[open + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim()
}

fn bounded(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[derive(Debug, Default, Clone, Copy)]
struct ArrayScan {
    /// Byte offset of the last char of the last complete top-level element.
    last_complete: Option<usize>,
    /// Byte offset of the bracket that closes the array.
    closed_at: Option<usize>,
}

/// Walks `text` (which starts at `[`) tracking string and nesting state.
/// Structural chars are ASCII, so scanning bytes is UTF-8 safe.
fn scan_array(text: &str) -> ArrayScan {
    let mut scan = ArrayScan::default();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, byte) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
                if depth == 1 {
                    scan.last_complete = Some(idx);
                }
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    scan.last_complete = Some(idx);
                }
                if depth == 0 {
                    scan.closed_at = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }

    scan
}
