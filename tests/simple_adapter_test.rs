//! HTTP Upload Adapter Integration Tests
//!
//! Tests for the multipart upload adapter using a mock server.

use placeholder_uploadr::config::{AdapterConfig, Config};
use placeholder_uploadr::document::InMemoryDocument;
use placeholder_uploadr::upload::{
    FileHandle, Outcome, ProgressSink, SimpleUploadAdapter, SimpleUploadConfig, UploadAdapter,
    UploadResponse,
};
use placeholder_uploadr::UploadSession;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create an adapter pointed at a mock server
fn create_adapter(mock_server: &MockServer) -> SimpleUploadAdapter {
    let config = SimpleUploadConfig::builder()
        .url(&format!("{}/upload", mock_server.uri()))
        .header("Authorization", "Bearer test-token")
        .build()
        .unwrap();
    SimpleUploadAdapter::new(config).unwrap()
}

fn image_file() -> FileHandle {
    FileHandle::from_bytes("image.png", "image/png", vec![0x89, b'P', b'N', b'G'])
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_url_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("Authorization", "Bearer test-token"))
            .and(body_string_contains("name=\"upload\""))
            .and(body_string_contains("filename=\"image.png\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://cdn.example.com/image.png"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let adapter = create_adapter(&mock_server);
        let outcome = adapter.upload(image_file(), ProgressSink::detached()).await;

        assert_eq!(
            outcome,
            Outcome::Resolved(UploadResponse::new("https://cdn.example.com/image.png"))
        );
    }

    #[tokio::test]
    async fn test_named_urls_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "urls": {
                    "default": "https://cdn.example.com/full.png",
                    "800": "https://cdn.example.com/800.png"
                }
            })))
            .mount(&mock_server)
            .await;

        let adapter = create_adapter(&mock_server);
        let Outcome::Resolved(response) = adapter.upload(image_file(), ProgressSink::detached()).await
        else {
            panic!("Expected a resolved upload");
        };

        assert_eq!(response.canonical(), Some("https://cdn.example.com/full.png"));
        assert_eq!(
            response.srcset().as_deref(),
            Some("https://cdn.example.com/800.png 800w")
        );
    }

    #[tokio::test]
    async fn test_error_message_is_passed_through() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(413).set_body_json(json!({
                "error": { "message": "File too large." }
            })))
            .mount(&mock_server)
            .await;

        let adapter = create_adapter(&mock_server);
        let outcome = adapter.upload(image_file(), ProgressSink::detached()).await;

        assert_eq!(outcome, Outcome::Failed("File too large.".into()));
    }

    #[tokio::test]
    async fn test_server_error_uses_generic_message() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let adapter = create_adapter(&mock_server);
        let outcome = adapter.upload(image_file(), ProgressSink::detached()).await;

        assert_eq!(
            outcome,
            Outcome::Failed("Couldn't upload file: image.png.".into())
        );
    }

    #[tokio::test]
    async fn test_response_without_url_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&mock_server)
            .await;

        let adapter = create_adapter(&mock_server);
        let outcome = adapter.upload(image_file(), ProgressSink::detached()).await;

        assert!(matches!(outcome, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_custom_field_name() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(body_string_contains("name=\"file\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://cdn.example.com/image.png"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = SimpleUploadConfig::builder()
            .url(&format!("{}/upload", mock_server.uri()))
            .field_name("file")
            .build()
            .unwrap();
        let adapter = SimpleUploadAdapter::new(config).unwrap();

        let outcome = adapter.upload(image_file(), ProgressSink::detached()).await;
        assert!(outcome.is_resolved());
    }

    #[tokio::test]
    async fn test_timeout_fails_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "url": "late.png" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let config = SimpleUploadConfig::builder()
            .url(&format!("{}/upload", mock_server.uri()))
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let adapter = SimpleUploadAdapter::new(config).unwrap();

        let outcome = adapter.upload(image_file(), ProgressSink::detached()).await;
        assert_eq!(
            outcome,
            Outcome::Failed("Couldn't upload file: image.png.".into())
        );
    }

    #[tokio::test]
    async fn test_abort_cancels_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "url": "late.png" }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let adapter = Arc::new(create_adapter(&mock_server));
        let upload = tokio::spawn({
            let adapter = adapter.clone();
            async move { adapter.upload(image_file(), ProgressSink::detached()).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        adapter.abort();

        let outcome = tokio::time::timeout(Duration::from_secs(1), upload)
            .await
            .expect("abort did not cancel the request")
            .unwrap();
        assert_eq!(outcome, Outcome::Aborted);
    }

    #[tokio::test]
    async fn test_session_uploads_through_http() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("X-Csrf-Token", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://cdn.example.com/image.png"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("X-Csrf-Token".to_string(), "abc".to_string());
        let config = Config {
            adapter: Some(AdapterConfig {
                url: format!("{}/upload", mock_server.uri()),
                field_name: "upload".into(),
                timeout_seconds: 5,
                headers,
            }),
            ..Config::default()
        };

        let document = Arc::new(InMemoryDocument::with_paragraphs(["foo bar"]));
        let session = UploadSession::new(config, document.clone()).unwrap();

        let started = session.handle_files([image_file()], 0).unwrap();
        assert_eq!(started.len(), 1);
        assert!(session.has_pending_uploads());

        tokio::time::timeout(Duration::from_secs(5), session.wait_until_settled())
            .await
            .expect("uploads did not settle");

        assert_eq!(
            document.to_markup(),
            r#"<image src="https://cdn.example.com/image.png"></image><paragraph>foo bar</paragraph>"#
        );
        session.close();
    }
}
