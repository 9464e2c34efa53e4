use serde_json::{Map, Value};

use crate::formats::{CandidateRecord, QuestionOption, QuestionType};

/// Coerces repaired oracle items into candidates. Items that are not objects or
/// that have no stem are dropped.
pub fn candidates_from_items(items: Vec<Value>) -> Vec<CandidateRecord> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => candidate_from_object(&object),
            _ => None,
        })
        .collect()
}

pub fn candidate_from_object(object: &Map<String, Value>) -> Option<CandidateRecord> {
    let content = strip_item_number(&string_field(object, "content"));
    if content.is_empty() {
        return None;
    }

    let options = object.get("options").map(parse_options).unwrap_or_default();
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .and_then(parse_question_type)
        .unwrap_or(if options.is_empty() {
            QuestionType::Essay
        } else {
            QuestionType::SingleChoice
        });

    let chapter = string_field(object, "chapter");

    Some(CandidateRecord {
        category: string_field(object, "category"),
        kind,
        content,
        options,
        answer: object.get("answer").map(answer_text).unwrap_or_default(),
        analysis: string_field(object, "analysis"),
        chapter: (!chapter.is_empty()).then_some(chapter),
    })
}

pub fn parse_question_type(raw: &str) -> Option<QuestionType> {
    let normalized = raw
        .trim()
        .to_ascii_lowercase()
        .replace(['-', ' ', '/'], "_");
    let kind = match normalized.as_str() {
        "single_choice" | "single" | "choice" | "单选" | "单选题" | "选择题" => {
            QuestionType::SingleChoice
        }
        "multi_choice" | "multiple_choice" | "multi" | "multiple" | "多选" | "多选题" => {
            QuestionType::MultiChoice
        }
        "true_false" | "truefalse" | "judge" | "judgement" | "bool" | "boolean" | "判断"
        | "判断题" => QuestionType::TrueFalse,
        "fill_blank" | "fill_in_blank" | "fill_in_the_blank" | "fill" | "blank" | "填空"
        | "填空题" => QuestionType::FillBlank,
        "essay" | "short_answer" | "subjective" | "简答" | "简答题" | "论述" | "论述题" => {
            QuestionType::Essay
        }
        _ => return None,
    };
    Some(kind)
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(text)) => text.trim().to_owned(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn answer_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_owned(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Array(parts) => parts
            .iter()
            .map(answer_text)
            .filter(|part| !part.is_empty())
            .collect::<String>(),
        Value::Null | Value::Object(_) => String::new(),
    }
}

fn parse_options(value: &Value) -> Vec<QuestionOption> {
    match value {
        Value::Array(entries) => entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| option_from_entry(idx, entry))
            .collect(),
        Value::Object(map) => {
            let mut options = map
                .iter()
                .filter_map(|(label, text)| {
                    let text = text.as_str()?.trim();
                    Some(QuestionOption {
                        label: label.trim().to_owned(),
                        text: text.to_owned(),
                    })
                })
                .collect::<Vec<_>>();
            options.sort_by(|a, b| a.label.cmp(&b.label));
            options
        }
        _ => Vec::new(),
    }
}

fn option_from_entry(idx: usize, entry: &Value) -> Option<QuestionOption> {
    match entry {
        Value::Object(object) => {
            let text = string_field(object, "text");
            let mut label = string_field(object, "label");
            if label.is_empty() {
                label = default_label(idx);
            }
            if text.is_empty() && label.is_empty() {
                return None;
            }
            Some(QuestionOption { label, text })
        }
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            Some(split_labelled_option(raw).unwrap_or_else(|| QuestionOption {
                label: default_label(idx),
                text: raw.to_owned(),
            }))
        }
        _ => None,
    }
}

fn default_label(idx: usize) -> String {
    u8::try_from(idx)
        .ok()
        .filter(|idx| *idx < 26)
        .map(|idx| char::from(b'A' + idx).to_string())
        .unwrap_or_else(|| (idx + 1).to_string())
}

/// `"A. text"`, `"B、text"`, `"C) text"`, `"D．text"` -> label + text.
fn split_labelled_option(raw: &str) -> Option<QuestionOption> {
    let mut chars = raw.char_indices();
    let (_, label) = chars.next()?;
    if !label.is_ascii_uppercase() {
        return None;
    }
    let (sep_idx, sep) = chars.next()?;
    if !matches!(sep, '.' | '、' | ')' | '．' | ':' | '：') {
        return None;
    }
    let text = raw[sep_idx + sep.len_utf8()..].trim();
    Some(QuestionOption {
        label: label.to_string(),
        text: text.to_owned(),
    })
}

/// Removes a leading item number such as `12.`, `12、`, `(12)`, `（12）`, `第12题`.
pub fn strip_item_number(content: &str) -> String {
    let trimmed = content.trim();

    if let Some(rest) = trimmed.strip_prefix('第') {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0
            && let Some(after) = rest[digits..].strip_prefix('题')
        {
            return strip_separator(after).trim().to_owned();
        }
    }

    for (open, close) in [('(', ')'), ('（', '）')] {
        if let Some(rest) = trimmed.strip_prefix(open) {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits > 0
                && let Some(after) = rest[digits..].strip_prefix(close)
            {
                return after.trim().to_owned();
            }
        }
    }

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(sep) = rest.chars().next()
            && matches!(sep, '.' | '、' | '．' | ')' | '）')
        {
            let after = &rest[sep.len_utf8()..];
            // `3.14` is a decimal, not item 3.
            if !(matches!(sep, '.' | '．') && after.starts_with(|c: char| c.is_ascii_digit())) {
                return after.trim().to_owned();
            }
        }
    }

    trimmed.to_owned()
}

fn strip_separator(text: &str) -> &str {
    text.trim_start_matches([':', '：', '.', '、', '．'])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn one(value: Value) -> Option<CandidateRecord> {
        candidates_from_items(vec![value]).into_iter().next()
    }

    #[test]
    fn coerces_a_well_formed_item() {
        let candidate = one(json!({
            "category": "选择题",
            "type": "SINGLE_CHOICE",
            "content": "1. 下列哪项正确？",
            "options": [{"label": "A", "text": "甲"}, {"label": "B", "text": "乙"}],
            "answer": "A",
            "analysis": ""
        }))
        .unwrap();

        assert_eq!(candidate.kind, QuestionType::SingleChoice);
        assert_eq!(candidate.content, "下列哪项正确？");
        assert_eq!(candidate.options.len(), 2);
        assert_eq!(candidate.answer, "A");
        assert_eq!(candidate.category, "选择题");
        assert_eq!(candidate.chapter, None);
    }

    #[test]
    fn drops_stemless_fragments_and_non_objects() {
        let items = vec![
            json!({"content": "", "options": [{"label": "C", "text": "丙"}], "answer": "C"}),
            json!({"content": "   12、  ", "options": ["D. 丁"]}),
            json!("A. 甲"),
            json!(42),
        ];
        assert!(candidates_from_items(items).is_empty());
    }

    #[test]
    fn missing_answer_stays_empty() {
        let candidate = one(json!({"content": "简述市场机制。", "answer": null})).unwrap();
        assert_eq!(candidate.answer, "");
        assert_eq!(candidate.analysis, "");
        assert_eq!(candidate.kind, QuestionType::Essay);
    }

    #[test]
    fn accepts_alternative_option_and_answer_shapes() {
        let candidate = one(json!({
            "type": "multiple choice",
            "content": "(3) 选出所有质数",
            "options": {"B": "3", "A": "2", "C": "4"},
            "answer": ["A", "B"]
        }))
        .unwrap();
        assert_eq!(candidate.kind, QuestionType::MultiChoice);
        assert_eq!(candidate.content, "选出所有质数");
        assert_eq!(
            candidate.options.iter().map(|o| o.label.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
        assert_eq!(candidate.answer, "AB");

        let strings = one(json!({"content": "Pick one", "options": ["A. red", "B、blue", "green"]}))
            .unwrap();
        assert_eq!(strings.kind, QuestionType::SingleChoice);
        let pairs = strings
            .options
            .iter()
            .map(|o| (o.label.as_str(), o.text.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("A", "red"), ("B", "blue"), ("C", "green")]);
    }

    #[test]
    fn unlabelled_string_options_keep_their_text() {
        let candidate = one(json!({
            "content": "Do you agree?",
            "options": ["I think so", "No way", "C：maybe"]
        }))
        .unwrap();
        let pairs = candidate
            .options
            .iter()
            .map(|o| (o.label.as_str(), o.text.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![("A", "I think so"), ("B", "No way"), ("C", "maybe")]
        );
    }

    #[test]
    fn parses_type_aliases() {
        assert_eq!(parse_question_type("TRUE_FALSE"), Some(QuestionType::TrueFalse));
        assert_eq!(parse_question_type("true/false"), Some(QuestionType::TrueFalse));
        assert_eq!(parse_question_type("fill-blank"), Some(QuestionType::FillBlank));
        assert_eq!(parse_question_type("Short Answer"), Some(QuestionType::Essay));
        assert_eq!(parse_question_type("riddle"), None);
    }

    #[test]
    fn strips_item_number_prefixes() {
        for (input, expected) in [
            ("12. 题干", "题干"),
            ("12、题干", "题干"),
            ("12．题干", "题干"),
            ("12) 题干", "题干"),
            ("(12) 题干", "题干"),
            ("（12）题干", "题干"),
            ("第12题：题干", "题干"),
            ("2024年的GDP是多少", "2024年的GDP是多少"),
            ("3.14是圆周率的近似值吗？", "3.14是圆周率的近似值吗？"),
            ("0.5 + 0.5 = ?", "0.5 + 0.5 = ?"),
            ("2.5倍的4是多少", "2.5倍的4是多少"),
            ("7. 3.5 与 4 哪个大", "3.5 与 4 哪个大"),
            ("题干", "题干"),
        ] {
            assert_eq!(strip_item_number(input), expected, "input={input}");
        }
    }
}
