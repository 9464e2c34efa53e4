use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBehavior {
    /// Items parsed from the chunk, wrapped in a Markdown fence.
    Extract,
    /// A reply cut off in the middle of the first item.
    Truncate,
    /// HTTP 500 for every chunk request.
    ServerError,
}

pub struct ChatStub {
    pub base_url: String,
    chunk_calls: Arc<AtomicUsize>,
    authorizations: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl ChatStub {
    pub fn spawn(behavior: ChunkBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start chat stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let chunk_calls = Arc::new(AtomicUsize::new(0));
        let authorizations = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn({
            let chunk_calls = Arc::clone(&chunk_calls);
            let authorizations = Arc::clone(&authorizations);
            move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let path = request.url().to_string();
                    if request.method() != &tiny_http::Method::Post
                        || path != "/v1/chat/completions"
                    {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }

                    if let Some(header) = request
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv("Authorization"))
                    {
                        authorizations
                            .lock()
                            .unwrap()
                            .push(header.value.as_str().to_owned());
                    }

                    let mut body = String::new();
                    if request.as_reader().read_to_string(&mut body).is_err() {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid request body")
                                .with_status_code(400),
                        );
                        continue;
                    }
                    let parsed: Value = match serde_json::from_str(&body) {
                        Ok(value) => value,
                        Err(_) => {
                            let _ = request.respond(
                                tiny_http::Response::from_string("invalid json")
                                    .with_status_code(400),
                            );
                            continue;
                        }
                    };

                    let Some(prompt) = user_prompt(&parsed) else {
                        let _ = request.respond(
                            tiny_http::Response::from_string("missing user message")
                                .with_status_code(400),
                        );
                        continue;
                    };

                    let reply = if prompt.contains("BEGIN_CHUNK") {
                        chunk_calls.fetch_add(1, Ordering::SeqCst);
                        match behavior {
                            ChunkBehavior::Extract => extract_reply(&prompt),
                            ChunkBehavior::Truncate => {
                                r#"[{"content":"1. 被截断的题目","options":[],"answer":""#.to_owned()
                            }
                            ChunkBehavior::ServerError => {
                                let _ = request.respond(json_response(
                                    500,
                                    &serde_json::json!({"error": {"message": "stub overloaded"}}),
                                ));
                                continue;
                            }
                        }
                    } else if prompt.contains("BEGIN_DOCUMENT") {
                        answer_key_reply(&prompt)
                    } else if prompt.contains("BEGIN_QUESTION") {
                        if prompt.contains("地球") {
                            "DOUBT: 表述不严谨".to_owned()
                        } else {
                            "CORRECT".to_owned()
                        }
                    } else {
                        let _ = request.respond(
                            tiny_http::Response::from_string("unknown prompt mode")
                                .with_status_code(400),
                        );
                        continue;
                    };

                    let response_body = serde_json::json!({
                        "id": "chatcmpl-stub",
                        "object": "chat.completion",
                        "model": parsed.get("model").cloned().unwrap_or_else(|| "stub-model".into()),
                        "choices": [
                            {
                                "index": 0,
                                "message": { "role": "assistant", "content": reply },
                                "finish_reason": "stop"
                            }
                        ]
                    });
                    let _ = request.respond(json_response(200, &response_body));
                }
            }
        });

        Self {
            base_url,
            chunk_calls,
            authorizations,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.authorizations.lock().unwrap().clone()
    }
}

impl Drop for ChatStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_response(status: u16, body: &Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(header)
}

fn user_prompt(request: &Value) -> Option<String> {
    request
        .get("messages")?
        .as_array()?
        .iter()
        .rev()
        .find(|message| message.get("role").and_then(|v| v.as_str()) == Some("user"))?
        .get("content")?
        .as_str()
        .map(str::to_owned)
}

fn extract_between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    let end_rel = rest.find(end)?;
    Some(&rest[..end_rel])
}

/// `参考答案：2.A 3.对` becomes `2: A\n3: 对`.
fn answer_key_reply(prompt: &str) -> String {
    let document = extract_between(prompt, "BEGIN_DOCUMENT\n", "\nEND_DOCUMENT").unwrap_or("");
    let Some(line) = document.lines().find(|line| line.starts_with("参考答案：")) else {
        return "NONE".to_owned();
    };
    line.trim_start_matches("参考答案：")
        .split_whitespace()
        .filter_map(|token| token.split_once('.'))
        .map(|(number, answer)| format!("{number}: {answer}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One item per numbered line. The answer is taken from `答案：X` on the line,
/// else from the answer key, else left empty.
fn extract_reply(prompt: &str) -> String {
    let chunk = extract_between(prompt, "BEGIN_CHUNK\n", "\nEND_CHUNK").unwrap_or("");
    let key = extract_between(prompt, "BEGIN_ANSWER_KEY\n", "\nEND_ANSWER_KEY").unwrap_or("");

    let mut category = "综合";
    let mut items = Vec::new();
    for line in chunk.lines() {
        if line.contains("选择") {
            category = "单项选择";
            continue;
        }
        if line.contains("判断") {
            category = "判断";
            continue;
        }
        let Some((number, _)) = line.split_once(". ") else {
            continue;
        };
        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let (body, inline_answer) = match line.split_once(" 答案：") {
            Some((body, answer)) => (body, Some(answer.trim().to_owned())),
            None => (line, None),
        };
        let (stem, options) = split_options(body);
        let answer = inline_answer
            .or_else(|| {
                key.lines()
                    .filter_map(|entry| entry.split_once(": "))
                    .find(|(n, _)| *n == number)
                    .map(|(_, answer)| answer.to_owned())
            })
            .unwrap_or_default();

        items.push(serde_json::json!({
            "category": category,
            "type": if options.is_empty() { "TRUE_FALSE" } else { "SINGLE_CHOICE" },
            "content": stem,
            "options": options,
            "answer": answer,
            "analysis": "",
        }));
    }

    format!(
        "```json\n{}\n```",
        serde_json::to_string_pretty(&Value::Array(items)).unwrap_or_default()
    )
}

fn split_options(body: &str) -> (String, Vec<Value>) {
    let mut stem = body.to_owned();
    let mut options = Vec::new();
    let labels = ["A", "B", "C", "D"];
    let positions = labels
        .iter()
        .filter_map(|label| body.find(&format!(" {label}. ")).map(|pos| (pos, *label)))
        .collect::<Vec<_>>();
    if let Some((first, _)) = positions.first() {
        stem = body[..*first].to_owned();
    }
    for (idx, (pos, label)) in positions.iter().enumerate() {
        let text_start = pos + label.len() + 3;
        let text_end = positions
            .get(idx + 1)
            .map(|(next, _)| *next)
            .unwrap_or(body.len());
        options.push(serde_json::json!({
            "label": label,
            "text": body[text_start..text_end].trim(),
        }));
    }
    (stem, options)
}
