//! Search, reader, and chat clients against local stub services.

mod common;

use axum::{
    http::{StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use common::spawn_stub;
use scout::config::{AnythingLlmSettings, KnowledgeSettings, RetrievalSettings};
use scout::knowledge::{AnythingLlmKnowledgeStore, KnowledgeDocument, KnowledgeError, KnowledgeStore};
use scout::llm::{AnswerOutcome, AnythingLlmClient, GenerationError, Generator, OpenAiCompatClient, PromptBuilder, GENERATION_FAILURE_PHRASE};
use scout::retrieval::{PageReader, RetrievalError, RetrievalMode, Retriever, TavilySearch, WebRetriever};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn retrieval_settings(search: &str, reader: &str) -> RetrievalSettings {
    RetrievalSettings {
        search_api_key: "tvly-test".to_string(),
        search_endpoint: Some(format!("{}/search", search)),
        reader_base: Some(reader.to_string()),
        reader_api_key: None,
        fallback_search_url: Some("https://search.example/?q={query}".to_string()),
        timeout: TIMEOUT,
        min_body_chars: 100,
        source_budget: 3000,
        max_sub_links: 3,
        max_results: 3,
    }
}

#[tokio::test]
async fn tavily_server_error_is_status_error() {
    let base = spawn_stub(Router::new().route(
        "/search",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }),
    ))
    .await;
    let search = TavilySearch::new(
        reqwest::Client::new(),
        Some(format!("{}/search", base)),
        "tvly-test".to_string(),
        3,
        TIMEOUT,
    );
    let err = search.search("食品添加物法規").await.unwrap_err();
    assert!(matches!(err, RetrievalError::Status(500)), "{:?}", err);
}

#[tokio::test]
async fn tavily_results_become_sources() {
    let base = spawn_stub(Router::new().route(
        "/search",
        post(|| async {
            Json(serde_json::json!({
                "query": "q",
                "results": [
                    {"url": "https://a.example", "title": "A", "content": "alpha"},
                    {"url": "https://b.example", "title": "B", "content": "  "}
                ]
            }))
        }),
    ))
    .await;
    let search = TavilySearch::new(reqwest::Client::new(), Some(format!("{}/search", base)), "k".to_string(), 3, TIMEOUT);
    let sources = search.search("q").await.unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].text, "alpha");
    assert_eq!(sources[0].title.as_deref(), Some("A"));
}

#[tokio::test]
async fn reader_short_body_is_rejected() {
    let base = spawn_stub(Router::new().route("/*target", get(|| async { "Title: tiny\n\nshort" }))).await;
    let reader = PageReader::new(reqwest::Client::new(), Some(base), None, TIMEOUT, 100);
    let err = reader.fetch("https://example.com/page").await.unwrap_err();
    assert!(matches!(err, RetrievalError::TooShort(_)), "{:?}", err);
}

#[tokio::test]
async fn reader_non_200_is_rejected() {
    let base = spawn_stub(Router::new().route("/*target", get(|| async { (StatusCode::FORBIDDEN, "no") }))).await;
    let reader = PageReader::new(reqwest::Client::new(), Some(base), None, TIMEOUT, 10);
    let err = reader.fetch("https://example.com/page").await.unwrap_err();
    assert!(matches!(err, RetrievalError::Status(403)), "{:?}", err);
}

#[tokio::test]
async fn failed_search_falls_back_to_search_page() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let search = spawn_stub(Router::new().route(
        "/search",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_GATEWAY
            }
        }),
    ))
    .await;
    let page = format!("Title: results\n\n{}", "搜尋結果內容 ".repeat(40));
    let reader = spawn_stub(Router::new().route("/*target", get(move || async move { page }))).await;

    let retriever = WebRetriever::new(reqwest::Client::new(), &retrieval_settings(&search, &reader));
    let ctx = retriever
        .retrieve(&RetrievalMode::Search("食品 法規".to_string()))
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.sources.len(), 1);
    assert!(ctx.sources[0].text.contains("搜尋結果內容"));
    assert!(ctx.sources[0]
        .url
        .as_deref()
        .is_some_and(|u| u.starts_with("https://search.example/?q=")));
}

fn reader_page(title: &str, extra: &str) -> String {
    format!("Title: {}\n\n{}{}", title, "頁面內容 ".repeat(30), extra)
}

#[tokio::test]
async fn fetch_merges_same_domain_sub_pages() {
    let reader = spawn_stub(Router::new().route(
        "/*target",
        get(|uri: Uri| async move {
            let path = uri.path().to_string();
            if path.ends_with("/page") {
                let links = "\n[A](/sub-a) [![logo](/logo.png)](https://site.example/sub-b) \
                             [elsewhere](https://other.example/x) [C](/sub-c) [D](/sub-d)";
                (StatusCode::OK, reader_page("Main", links))
            } else if path.ends_with("/sub-a") {
                (StatusCode::OK, reader_page("Sub A", ""))
            } else if path.ends_with("/sub-b") {
                (StatusCode::OK, reader_page("Sub B", ""))
            } else if path.ends_with("/sub-c") {
                (StatusCode::INTERNAL_SERVER_ERROR, "down".to_string())
            } else {
                (StatusCode::NOT_FOUND, "unexpected".to_string())
            }
        }),
    ))
    .await;

    let retriever = WebRetriever::new(
        reqwest::Client::new(),
        &retrieval_settings("http://127.0.0.1:9", &reader),
    );
    let ctx = retriever
        .retrieve(&RetrievalMode::Fetch("https://site.example/page".to_string()))
        .await
        .unwrap();

    let urls: Vec<&str> = ctx.sources.iter().filter_map(|s| s.url.as_deref()).collect();
    assert_eq!(
        urls,
        vec![
            "https://site.example/page",
            "https://site.example/sub-a",
            "https://site.example/sub-b",
        ]
    );
    let titles: Vec<&str> = ctx.sources.iter().filter_map(|s| s.title.as_deref()).collect();
    assert_eq!(titles, vec!["Main", "Sub A", "Sub B"]);
}

#[tokio::test]
async fn fetch_fails_when_main_page_is_unreadable() {
    let reader = spawn_stub(Router::new().route("/*target", get(|| async { StatusCode::NOT_FOUND }))).await;
    let retriever = WebRetriever::new(
        reqwest::Client::new(),
        &retrieval_settings("http://127.0.0.1:9", &reader),
    );
    let err = retriever
        .retrieve(&RetrievalMode::Fetch("https://site.example/page".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Status(404)), "{:?}", err);
}

#[tokio::test]
async fn failed_search_and_fallback_reports_search_error() {
    let search = spawn_stub(Router::new().route("/search", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))).await;
    let reader = spawn_stub(Router::new().route("/*target", get(|| async { "short" }))).await;

    let retriever = WebRetriever::new(reqwest::Client::new(), &retrieval_settings(&search, &reader));
    let err = retriever
        .retrieve(&RetrievalMode::Search("q".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Status(500)), "{:?}", err);
}

#[tokio::test]
async fn anything_llm_server_error_becomes_failure_phrase() {
    let base = spawn_stub(Router::new().route(
        "/api/v1/workspace/:slug/chat",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model crashed") }),
    ))
    .await;
    let client = AnythingLlmClient::new(
        reqwest::Client::new(),
        &AnythingLlmSettings {
            base_url: base,
            api_key: "llm-key".to_string(),
            workspace: "research".to_string(),
        },
        TIMEOUT,
    );
    let prompt = PromptBuilder::new("system", 6, 8000).build("hello", None, &[]);
    let result = client.generate(&prompt).await;
    assert!(matches!(result, Err(GenerationError::Status(500, _))), "{:?}", result);
    let text = AnswerOutcome::from_result(result).text();
    assert!(text.starts_with(GENERATION_FAILURE_PHRASE));
}

#[tokio::test]
async fn anything_llm_returns_text_response() {
    let base = spawn_stub(Router::new().route(
        "/api/v1/workspace/research/chat",
        post(|Json(body): Json<serde_json::Value>| async move {
            let echoed = body["message"].as_str().unwrap_or_default().contains("問題：hello");
            let mode_ok = body["mode"] == "chat";
            Json(serde_json::json!({
                "type": "textResponse",
                "textResponse": if echoed && mode_ok { "ok" } else { "unexpected request" },
                "error": null
            }))
        }),
    ))
    .await;
    let client = AnythingLlmClient::new(
        reqwest::Client::new(),
        &AnythingLlmSettings {
            base_url: base,
            api_key: "llm-key".to_string(),
            workspace: "research".to_string(),
        },
        TIMEOUT,
    );
    let prompt = PromptBuilder::new("system", 6, 8000).build("hello", None, &[]);
    assert_eq!(client.generate(&prompt).await.unwrap(), "ok");
}

#[tokio::test]
async fn openai_compatible_reads_first_choice() {
    let base = spawn_stub(Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            Json(serde_json::json!({
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "答案" } }]
            }))
        }),
    ))
    .await;
    let client = OpenAiCompatClient::new(
        reqwest::Client::new(),
        format!("{}/v1", base),
        "key".to_string(),
        "gpt-4o-mini".to_string(),
        TIMEOUT,
    );
    let prompt = PromptBuilder::new("system", 6, 8000).build("hello", Some("ctx"), &[]);
    assert_eq!(client.generate(&prompt).await.unwrap(), "答案");
}

type Recorded = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

fn knowledge_store(base: String) -> AnythingLlmKnowledgeStore {
    AnythingLlmKnowledgeStore::new(
        reqwest::Client::new(),
        &KnowledgeSettings {
            anything_llm: AnythingLlmSettings {
                base_url: base,
                api_key: "llm-key".to_string(),
                workspace: "research".to_string(),
            },
            timeout: TIMEOUT,
        },
    )
}

#[tokio::test]
async fn knowledge_store_uploads_then_embeds_returned_location() {
    let seen: Recorded = Arc::new(Mutex::new(Vec::new()));
    let upload_log = seen.clone();
    let embed_log = seen.clone();
    let base = spawn_stub(
        Router::new()
            .route(
                "/api/v1/document/raw-text",
                post(move |Json(body): Json<serde_json::Value>| {
                    let log = upload_log.clone();
                    async move {
                        log.lock().unwrap().push(("upload".to_string(), body));
                        Json(serde_json::json!({
                            "success": true,
                            "error": null,
                            "documents": [{ "location": "custom-documents/raw-law.json", "title": "法規" }]
                        }))
                    }
                }),
            )
            .route(
                "/api/v1/workspace/research/update-embeddings",
                post(move |Json(body): Json<serde_json::Value>| {
                    let log = embed_log.clone();
                    async move {
                        log.lock().unwrap().push(("embed".to_string(), body));
                        Json(serde_json::json!({ "workspace": { "slug": "research" } }))
                    }
                }),
            ),
    )
    .await;

    let doc = KnowledgeDocument {
        title: "法規".to_string(),
        url: Some("https://site.example/law".to_string()),
        text: "第一條".to_string(),
    };
    knowledge_store(base).store(&doc).await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "upload");
    assert_eq!(seen[0].1["textContent"], "第一條");
    assert_eq!(seen[0].1["metadata"]["title"], "法規");
    assert_eq!(seen[0].1["metadata"]["docSource"], "https://site.example/law");
    assert_eq!(seen[1].0, "embed");
    assert_eq!(
        seen[1].1,
        serde_json::json!({ "adds": ["custom-documents/raw-law.json"], "deletes": [] })
    );
}

#[tokio::test]
async fn knowledge_store_upload_failure_skips_embedding() {
    let embeds = Arc::new(AtomicUsize::new(0));
    let counter = embeds.clone();
    let base = spawn_stub(
        Router::new()
            .route(
                "/api/v1/document/raw-text",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk full") }),
            )
            .route(
                "/api/v1/workspace/research/update-embeddings",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        StatusCode::OK
                    }
                }),
            ),
    )
    .await;

    let doc = KnowledgeDocument {
        title: "t".to_string(),
        url: None,
        text: "x".to_string(),
    };
    let err = knowledge_store(base).store(&doc).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Api(ref m) if m.contains("disk full")), "{:?}", err);
    assert_eq!(embeds.load(Ordering::SeqCst), 0);
}
