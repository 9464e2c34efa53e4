use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

use crate::formats::{QuestionBank, QuestionRecord};

pub const FORMAT_VERSION: &str = "quizify-1";
pub const POINTER_FILE: &str = "last_generated_file.txt";
pub const VALIDATED_SUFFIX: &str = " + AI Validated";

pub fn new_bank(source: &str, subject: &str, data: Vec<QuestionRecord>) -> QuestionBank {
    QuestionBank {
        version: FORMAT_VERSION.to_owned(),
        source: source.to_owned(),
        subject: subject.to_owned(),
        generated_at: Some(chrono::Utc::now().to_rfc3339()),
        total_count: data.len(),
        data,
    }
}

/// `<out_dir>/<stem>_<n>.json` with the smallest unused `n >= 1`.
pub fn next_output_path(out_dir: &Path, stem: &str) -> PathBuf {
    let stem = if stem.trim().is_empty() { "quiz" } else { stem };
    (1usize..)
        .map(|n| out_dir.join(format!("{stem}_{n}.json")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| out_dir.join(format!("{stem}.json")))
}

pub fn summary_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".summary.json");
    PathBuf::from(name)
}

pub async fn write_bank(path: &Path, bank: &QuestionBank) -> anyhow::Result<()> {
    write_json_atomic(path, bank)
        .await
        .with_context(|| format!("write question bank: {}", path.display()))
}

pub async fn read_bank(path: &Path) -> anyhow::Result<QuestionBank> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("read question bank: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse question bank: {}", path.display()))
}

/// Remembers the newest output so `validate` can find it without arguments.
pub async fn record_pointer(out_dir: &Path, output: &Path) -> anyhow::Result<()> {
    let pointer = out_dir.join(POINTER_FILE);
    fs::write(&pointer, format!("{}\n", output.display()))
        .await
        .with_context(|| format!("write pointer file: {}", pointer.display()))
}

pub async fn read_pointer(out_dir: &Path) -> anyhow::Result<PathBuf> {
    let pointer = out_dir.join(POINTER_FILE);
    let raw = fs::read_to_string(&pointer)
        .await
        .with_context(|| format!("read pointer file: {}", pointer.display()))?;
    let target = raw.trim();
    if target.is_empty() {
        anyhow::bail!("pointer file is empty: {}", pointer.display());
    }
    Ok(PathBuf::from(target))
}

pub async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::QuestionType;

    fn record(number: usize) -> QuestionRecord {
        QuestionRecord {
            id: format!("id-{number}"),
            number,
            chapter: "导入题目".to_owned(),
            category: "单选题".to_owned(),
            kind: QuestionType::SingleChoice,
            content: "中文内容".to_owned(),
            options: Vec::new(),
            answer: "A".to_owned(),
            analysis: String::new(),
        }
    }

    #[test]
    fn output_names_never_overwrite_prior_runs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(next_output_path(dir.path(), "quiz"), dir.path().join("quiz_1.json"));

        std::fs::write(dir.path().join("quiz_1.json"), "{}")?;
        std::fs::write(dir.path().join("quiz_3.json"), "{}")?;
        assert_eq!(next_output_path(dir.path(), "quiz"), dir.path().join("quiz_2.json"));
        Ok(())
    }

    #[test]
    fn summary_sits_next_to_the_output() {
        assert_eq!(
            summary_path(Path::new("output/quiz_1.json")),
            PathBuf::from("output/quiz_1.json.summary.json")
        );
    }

    #[tokio::test]
    async fn bank_round_trips_with_wire_field_names() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("quiz_1.json");
        let bank = new_bank("quiz.docx", "通用", vec![record(1), record(2)]);

        write_bank(&path, &bank).await?;
        let raw = std::fs::read_to_string(&path)?;
        assert!(raw.contains("\"type\": \"SINGLE_CHOICE\""));
        assert!(raw.contains("中文内容"));

        let loaded = read_bank(&path).await?;
        assert_eq!(loaded.version, FORMAT_VERSION);
        assert_eq!(loaded.total_count, 2);
        assert_eq!(loaded.data, bank.data);

        let leftovers = std::fs::read_dir(path.parent().unwrap())?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn pointer_file_names_the_latest_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(read_pointer(dir.path()).await.is_err());

        let output = dir.path().join("quiz_1.json");
        record_pointer(dir.path(), &output).await?;
        assert_eq!(read_pointer(dir.path()).await?, output);
        Ok(())
    }
}
