//! Canonical question categories.
//!
//! Labels coming back from the oracle are free-form ("选择题", "单项选择",
//! "Multiple choice", "二、判断题（每题2分）"). [`normalize`] maps them onto a small
//! closed set with an ordered list of substring rules; the first matching rule
//! wins, so more specific patterns ("多项选择") sit above broader ones ("选择").

pub const SINGLE_CHOICE: &str = "单选题";
pub const MULTI_CHOICE: &str = "多选题";
pub const TRUE_FALSE: &str = "判断题";
pub const FILL_BLANK: &str = "填空题";
pub const TERM_DEFINITION: &str = "名词解释";
pub const SHORT_ANSWER: &str = "简答题";
pub const ESSAY: &str = "论述题";
pub const CALCULATION: &str = "计算题";
pub const CASE_ANALYSIS: &str = "案例分析题";
pub const COMPREHENSIVE: &str = "综合题";

/// Category used when the oracle gives no label at all.
pub const DEFAULT_CATEGORY: &str = COMPREHENSIVE;

/// Appended to labels that match no rule, so they still read as a category.
pub const CATEGORY_SUFFIX: &str = "题";

pub const CANONICAL: &[&str] = &[
    SINGLE_CHOICE,
    MULTI_CHOICE,
    TRUE_FALSE,
    FILL_BLANK,
    TERM_DEFINITION,
    SHORT_ANSWER,
    ESSAY,
    CALCULATION,
    CASE_ANALYSIS,
    COMPREHENSIVE,
];

/// Patterns are matched against the trimmed, ASCII-lowercased label. None of
/// them ends with [`CATEGORY_SUFFIX`], which keeps [`normalize`] idempotent.
const RULES: &[(&str, &str)] = &[
    ("多选", MULTI_CHOICE),
    ("多项选择", MULTI_CHOICE),
    ("不定项", MULTI_CHOICE),
    ("multi-select", MULTI_CHOICE),
    ("multiple answer", MULTI_CHOICE),
    ("multi_choice", MULTI_CHOICE),
    ("单选", SINGLE_CHOICE),
    ("单项选择", SINGLE_CHOICE),
    ("选择", SINGLE_CHOICE),
    ("single choice", SINGLE_CHOICE),
    ("single_choice", SINGLE_CHOICE),
    ("multiple choice", SINGLE_CHOICE),
    ("判断", TRUE_FALSE),
    ("是非", TRUE_FALSE),
    ("对错", TRUE_FALSE),
    ("true/false", TRUE_FALSE),
    ("true or false", TRUE_FALSE),
    ("true_false", TRUE_FALSE),
    ("填空", FILL_BLANK),
    ("fill", FILL_BLANK),
    ("名词解释", TERM_DEFINITION),
    ("概念解释", TERM_DEFINITION),
    ("简答", SHORT_ANSWER),
    ("问答", SHORT_ANSWER),
    ("short answer", SHORT_ANSWER),
    ("论述", ESSAY),
    ("essay", ESSAY),
    ("计算", CALCULATION),
    ("calculation", CALCULATION),
    ("案例", CASE_ANALYSIS),
    ("材料分析", CASE_ANALYSIS),
    ("case", CASE_ANALYSIS),
    ("综合", COMPREHENSIVE),
];

pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_CATEGORY.to_owned();
    }

    let lowered = trimmed.to_ascii_lowercase();
    if let Some((_, canonical)) = RULES
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
    {
        return (*canonical).to_owned();
    }

    if CANONICAL.contains(&trimmed) || trimmed.ends_with(CATEGORY_SUFFIX) {
        return trimmed.to_owned();
    }

    format!("{trimmed}{CATEGORY_SUFFIX}")
}
