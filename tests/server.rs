//! HTTP-level tests: the server is started on a free port with scripted
//! retriever and model handles, then exercised with reqwest.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use vakil::config::Config;
use vakil::counsel::Counsel;
use vakil::llm::ChatModel;
use vakil::models::{ChatMessage, RetrievedChunk, Role};
use vakil::response::CompletionPayload;
use vakil::retrieval::Retriever;
use vakil::server::{self, SECRET_HEADER};

const SECTION_27: &str = "Section 27. Agreement in restraint of trade, void. Every agreement by which any one is restrained from exercising a lawful profession, trade or business of any kind, is to that extent void.";

const NDA_TEXT: &str = "MUTUAL NON-DISCLOSURE AGREEMENT. The Employee shall not engage in any competing business anywhere in India for five years after termination.";

struct CorpusRetriever;

#[async_trait]
impl Retriever for CorpusRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedChunk>> {
        Ok(vec![RetrievedChunk {
            chunk_id: "c0".to_string(),
            document_id: "d0".to_string(),
            source: "legal_knowledge_base.txt".to_string(),
            chunk_index: 0,
            text: SECTION_27.to_string(),
            score: 0.91,
        }])
    }
}

struct ScriptedModel {
    reply: CompletionPayload,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionPayload> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

fn scripted(reply: &str) -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel {
        reply: CompletionPayload::Text(reply.to_string()),
        seen: Mutex::new(Vec::new()),
    })
}

fn analysis_reply() -> String {
    let body = json!({
        "summary": "Mutual NDA with a post-employment non-compete.",
        "risks": [{
            "clause": "shall not engage in any competing business anywhere in India for five years",
            "risk_level": "High",
            "reason": "Restraint of trade is void under Section 27 of the Indian Contract Act, 1872.",
            "suggestion": "Limit the restriction to the term of employment."
        }],
        "score": 35
    });
    format!("```json\n{}\n```", body)
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server on a free port. `secret_env` names a per-test variable
/// so tests running in parallel do not share a secret.
async fn start_server(
    tmp: &TempDir,
    model: Arc<ScriptedModel>,
    secret_env: Option<&str>,
) -> String {
    let port = find_free_port();
    let gate = match secret_env {
        Some(var) => format!("require_secret = true\nsecret_env = \"{}\"", var),
        None => "require_secret = false".to_string(),
    };
    let content = format!(
        r#"[db]
path = "{root}/data/vakil.sqlite"

[embedding]
provider = "disabled"

[llm]
provider = "disabled"

[server]
bind = "127.0.0.1:{port}"
upload_dir = "{root}/uploads"
max_upload_bytes = 4096
{gate}
"#,
        root = tmp.path().display(),
        port = port,
        gate = gate,
    );
    let cfg: Config = toml::from_str(&content).unwrap();

    let counsel = Arc::new(Counsel::new(Arc::new(CorpusRetriever), model, 2000));
    tokio::spawn(async move {
        server::run_server_with(&cfg, counsel).await.unwrap();
    });

    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

fn text_upload(name: &str, mime: &str, body: &str) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(body.as_bytes().to_vec())
        .file_name(name.to_string())
        .mime_str(mime)
        .unwrap();
    reqwest::multipart::Form::new().part("file", part)
}

fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

// ─── Health and secret gate ─────────────────────────────────────────

#[tokio::test]
async fn test_health_is_never_gated() {
    let tmp = TempDir::new().unwrap();
    std::env::set_var("VAKIL_TEST_SECRET_HEALTH", "s3cret");
    let base = start_server(&tmp, scripted("unused"), Some("VAKIL_TEST_SECRET_HEALTH")).await;

    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_wrong_or_missing_secret_is_forbidden() {
    let tmp = TempDir::new().unwrap();
    std::env::set_var("VAKIL_TEST_SECRET_GATE", "s3cret");
    let model = scripted("unused");
    let base = start_server(&tmp, model.clone(), Some("VAKIL_TEST_SECRET_GATE")).await;
    let client = reqwest::Client::new();
    let request = json!({"question": "Is this valid?", "document_context": NDA_TEXT});

    let missing = client
        .post(format!("{}/chat", base))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 403);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body, json!({"detail": "Could not validate credentials"}));

    let wrong = client
        .post(format!("{}/analyze", base))
        .header(SECRET_HEADER, "guess")
        .multipart(text_upload("nda.txt", "text/plain", NDA_TEXT))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 403);

    assert!(model.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_correct_secret_is_accepted() {
    let tmp = TempDir::new().unwrap();
    std::env::set_var("VAKIL_TEST_SECRET_OK", "s3cret");
    let base = start_server(&tmp, scripted("Yes."), Some("VAKIL_TEST_SECRET_OK")).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .header(SECRET_HEADER, "s3cret")
        .json(&json!({"question": "Is this valid?", "document_context": NDA_TEXT}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ─── /chat ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_returns_answer_and_orders_messages() {
    let tmp = TempDir::new().unwrap();
    let model = scripted("The non-compete is void under Section 27.");
    let base = start_server(&tmp, model.clone(), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({
            "question": "Can they stop me from joining a competitor?",
            "history": [
                {"role": "user", "content": "What is this document?"},
                {"role": "assistant", "content": "A mutual NDA."}
            ],
            "document_context": NDA_TEXT
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({"answer": "The non-compete is void under Section 27."})
    );

    let seen = model.seen.lock().unwrap();
    let messages = &seen[0];
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::System,
            Role::System,
            Role::Human,
            Role::Assistant,
            Role::Human
        ]
    );
    assert_eq!(messages[2].content, format!("Document Context:\n{}", NDA_TEXT));
    assert_eq!(
        messages[5].content,
        "Can they stop me from joining a competitor?"
    );
}

#[tokio::test]
async fn test_chat_malformed_body_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, scripted("unused"), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({"history": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["detail"].is_string());
}

// ─── /analyze ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_analyze_flags_non_compete_and_attaches_full_text() {
    let tmp = TempDir::new().unwrap();
    let model = scripted(&analysis_reply());
    let base = start_server(&tmp, model.clone(), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/analyze", base))
        .multipart(text_upload("nda.txt", "text/plain", NDA_TEXT))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["risks"][0]["risk_level"], "High");
    assert!(body["risks"][0]["reason"]
        .as_str()
        .unwrap()
        .contains("Section 27"));
    assert_eq!(body["score"], 35);
    assert_eq!(body["full_text"], NDA_TEXT);

    // The analysis prompt carries both the retrieved law and the document.
    let seen = model.seen.lock().unwrap();
    assert_eq!(seen[0].len(), 1);
    assert!(seen[0][0].content.contains(SECTION_27));
    assert!(seen[0][0].content.contains(NDA_TEXT));

    assert!(dir_is_empty(&tmp.path().join("uploads")));
}

#[tokio::test]
async fn test_analyze_unparseable_reply_is_soft_failure() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, scripted("I cannot produce JSON today."), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/analyze", base))
        .multipart(text_upload("nda.txt", "text/plain", NDA_TEXT))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Failed to parse analysis");
    assert_eq!(body["raw_content"], "I cannot produce JSON today.");
    assert!(body.get("full_text").is_none());
}

#[tokio::test]
async fn test_analyze_unsupported_type_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, scripted("unused"), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/analyze", base))
        .multipart(text_upload("photo.png", "image/png", "not really a png"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("unsupported file type"));
}

#[tokio::test]
async fn test_analyze_without_file_field_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp, scripted("unused"), None).await;

    let form = reqwest::multipart::Form::new().text("note", "no file here");
    let resp = reqwest::Client::new()
        .post(format!("{}/analyze", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_analyze_corrupt_pdf_fails_and_leaves_no_file() {
    let tmp = TempDir::new().unwrap();
    let model = scripted("unused");
    let base = start_server(&tmp, model.clone(), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/analyze", base))
        .multipart(text_upload("nda.pdf", "application/pdf", "%PDF-1.4 garbage"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert!(body["detail"].is_string());
    assert!(model.seen.lock().unwrap().is_empty());
    assert!(dir_is_empty(&tmp.path().join("uploads")));
}
