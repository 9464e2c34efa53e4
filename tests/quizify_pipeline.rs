use std::fs;
use std::path::Path;

use predicates::prelude::*;
use quizify::formats::{QuestionBank, QuestionType};

mod openai_stub;

use openai_stub::{ChatStub, ChunkBehavior};

const EXAM: &str = "期末测试\n\
一、单项选择题\n\
1. 中国的首都是？ A. 北京 B. 上海 答案：A\n\
2. 水的化学式是？ A. H2O B. CO2\n\
二、判断题\n\
3. 地球是圆的。\n\
参考答案：2.A 3.对\n";

fn quizify(workdir: &Path, stub: &ChatStub) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("quizify");
    cmd.current_dir(workdir)
        .env_remove("RUST_LOG")
        .env_remove("QUIZIFY_API_KEYS")
        .env_remove("QUIZIFY_MODEL")
        .env("QUIZIFY_API_KEY", "test-key")
        .env("QUIZIFY_BASE_URL", &stub.base_url);
    cmd
}

fn read_bank(path: &Path) -> anyhow::Result<QuestionBank> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

#[test]
fn extract_reconciles_inline_and_key_answers() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    fs::write(temp.path().join("exam.txt"), EXAM)?;
    let stub = ChatStub::spawn(ChunkBehavior::Extract);

    quizify(temp.path(), &stub)
        .args([
            "extract",
            "--input",
            "exam.txt",
            "--out-dir",
            "out",
            "--subject",
            "常识",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("exam_1.json"));

    let out_dir = temp.path().join("out");
    let bank = read_bank(&out_dir.join("exam_1.json"))?;
    assert_eq!(bank.version, "quizify-1");
    assert_eq!(bank.source, "exam.txt");
    assert_eq!(bank.subject, "常识");
    assert_eq!(bank.total_count, 3);

    let by_content = |content: &str| {
        bank.data
            .iter()
            .find(|record| record.content == content)
            .unwrap_or_else(|| panic!("missing record {content}"))
    };

    let capital = by_content("中国的首都是？");
    assert_eq!(capital.answer, "A");
    assert_eq!(capital.category, "单选题");
    assert_eq!(capital.kind, QuestionType::SingleChoice);
    assert_eq!(capital.options.len(), 2);
    assert_eq!(capital.options[0].text, "北京");

    assert_eq!(by_content("水的化学式是？").answer, "A");

    let earth = by_content("地球是圆的。");
    assert_eq!(earth.answer, "对");
    assert_eq!(earth.category, "判断题");
    assert!(earth.options.is_empty());

    let mut numbers = bank.data.iter().map(|record| record.number).collect::<Vec<_>>();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2, 3]);

    let pointer = fs::read_to_string(out_dir.join("last_generated_file.txt"))?;
    assert!(pointer.trim().ends_with("exam_1.json"));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("exam_1.json.summary.json"))?)?;
    assert_eq!(summary["accepted"], 3);
    assert_eq!(summary["chunks_failed"], 0);

    assert!(stub.authorizations().iter().all(|auth| auth == "Bearer test-key"));
    Ok(())
}

#[test]
fn second_run_gets_a_new_file() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    fs::write(temp.path().join("exam.txt"), EXAM)?;
    let stub = ChatStub::spawn(ChunkBehavior::Extract);

    for _ in 0..2 {
        quizify(temp.path(), &stub)
            .args(["extract", "--input", "exam.txt", "--out-dir", "out"])
            .assert()
            .success();
    }

    assert!(temp.path().join("out").join("exam_1.json").is_file());
    assert!(temp.path().join("out").join("exam_2.json").is_file());
    let pointer = fs::read_to_string(temp.path().join("out").join("last_generated_file.txt"))?;
    assert!(pointer.trim().ends_with("exam_2.json"));
    Ok(())
}

#[test]
fn validate_annotates_doubtful_answers_in_place() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    fs::write(temp.path().join("exam.txt"), EXAM)?;
    let stub = ChatStub::spawn(ChunkBehavior::Extract);

    quizify(temp.path(), &stub)
        .args(["extract", "--input", "exam.txt", "--out-dir", "out"])
        .assert()
        .success();

    quizify(temp.path(), &stub)
        .args(["validate", "--out-dir", "out", "--subject", "地理"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exam_1.json"));

    let bank = read_bank(&temp.path().join("out").join("exam_1.json"))?;
    assert_eq!(bank.source, "exam.txt + AI Validated");
    for record in &bank.data {
        if record.content.contains("地球") {
            assert_eq!(record.analysis, "【答案存疑】AI(地理专家)提示：表述不严谨\n\n");
        } else {
            assert_eq!(record.analysis, "");
        }
    }
    Ok(())
}

#[test]
fn extract_with_validate_flag_chains_both_passes() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let input_dir = temp.path().join("inbox");
    fs::create_dir_all(&input_dir)?;
    fs::write(input_dir.join("b_notes.md"), "ignored")?;
    fs::write(input_dir.join("a_exam.txt"), EXAM)?;
    let stub = ChatStub::spawn(ChunkBehavior::Extract);

    quizify(temp.path(), &stub)
        .args(["extract", "--input", "inbox", "--out-dir", "out", "--validate"])
        .assert()
        .success();

    let bank = read_bank(&temp.path().join("out").join("a_exam_1.json"))?;
    assert_eq!(bank.source, "a_exam.txt + AI Validated");
    let disputed = bank
        .data
        .iter()
        .filter(|record| record.analysis.starts_with("【答案存疑】"))
        .count();
    assert_eq!(disputed, 1);

    let summary: serde_json::Value = serde_json::from_str(&fs::read_to_string(
        temp.path().join("out").join("a_exam_1.json.summary.json"),
    )?)?;
    assert_eq!(summary["validation"]["disputed"], 1);
    assert_eq!(summary["validation"]["checked"], 3);
    Ok(())
}
