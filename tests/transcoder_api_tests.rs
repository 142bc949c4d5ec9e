//! HTTP-classification tests for the transcoder client.
//!
//! A mock worker exercises the response table: rate limits are absorbed with
//! the server-provided delay, container failures retry, functional failures
//! do not.

use podpipe::config::{AudioCodec, RetrySettings};
use podpipe::error::PipelineError;
use podpipe::transcoder::{
    ChunkRequest, ChunkUpload, EncodeRequest, HttpTranscoderClient, Transcoder,
};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetrySettings {
    RetrySettings {
        budget_secs: 60,
        base_delay_secs: 1,
        max_delay_secs: 2,
    }
}

fn encode_request() -> EncodeRequest {
    EncodeRequest {
        audio_url: "https://media.test/audio/in.mp3?sig".to_string(),
        upload_url: "https://media.test/processing/out.ogg?sig".to_string(),
        output_format: AudioCodec::Opus,
        bitrate: 24,
        channels: Some(1),
        sample_rate: Some(16_000),
    }
}

fn success_body() -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "metadata": { "duration": 75.0, "size": 120_000 }
    })
}

#[tokio::test]
async fn test_rate_limit_absorbed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(serde_json::json!({ "retryAfter": 1 })),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    let started = Instant::now();
    let output = client.encode(&encode_request()).await.unwrap();

    assert_eq!(output.duration_secs, 75.0);
    assert_eq!(output.size_bytes, 120_000);
    // Two 1-second waits, well under the 5s bound
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_functional_failure_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "error": "unsupported codec profile"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    let error = client.encode(&encode_request()).await.unwrap_err();

    match error {
        PipelineError::Encoding(detail) => assert!(detail.contains("unsupported codec profile")),
        other => panic!("expected Encoding, got {other:?}"),
    }
}

#[tokio::test]
async fn test_503_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    let output = client.encode(&encode_request()).await.unwrap();
    assert_eq!(output.size_bytes, 120_000);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_container_disconnect_body_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Container suddenly disconnected"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
        .mount(&server)
        .await;

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    assert!(client.encode(&encode_request()).await.is_ok());
}

#[tokio::test]
async fn test_other_client_error_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    let error = client.encode(&encode_request()).await.unwrap_err();
    assert!(matches!(error, PipelineError::Encoding(_)));
}

#[tokio::test]
async fn test_budget_exhaustion_fails_fast() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/encode"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(serde_json::json!({ "retryAfter": 600 })),
        )
        .mount(&server)
        .await;

    // A 600s sleep can never fit in a 5s budget: fail without sleeping.
    let retry = RetrySettings {
        budget_secs: 5,
        base_delay_secs: 1,
        max_delay_secs: 2,
    };
    let client = HttpTranscoderClient::new(server.uri(), retry);
    let started = Instant::now();
    let error = client.encode(&encode_request()).await.unwrap_err();

    assert!(matches!(error, PipelineError::BudgetExhausted { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_chunk_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chunk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "chunks": [
                { "index": 0, "r2Key": "chunks/ep/a.ogg" },
                { "index": 1, "r2Key": "chunks/ep/b.ogg" }
            ]
        })))
        .mount(&server)
        .await;

    let request = ChunkRequest {
        audio_url: "https://media.test/processing/in.ogg?sig".to_string(),
        chunk_upload_urls: vec![
            ChunkUpload {
                index: 0,
                r2_key: "chunks/ep/a.ogg".to_string(),
                upload_url: "https://media.test/chunks/ep/a.ogg?sig".to_string(),
            },
            ChunkUpload {
                index: 1,
                r2_key: "chunks/ep/b.ogg".to_string(),
                upload_url: "https://media.test/chunks/ep/b.ogg?sig".to_string(),
            },
        ],
        chunk_duration: 60,
        overlap_duration: 2,
        duration: 75.0,
        output_format: Some(AudioCodec::Opus),
        bitrate: None,
    };

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    let pieces = client.chunk(&request).await.unwrap();
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[1].r2_key, "chunks/ep/b.ogg");
}

#[tokio::test]
async fn test_chunk_count_mismatch_is_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chunk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "chunks": [ { "index": 0, "r2Key": "chunks/ep/a.ogg" } ]
        })))
        .mount(&server)
        .await;

    let request = ChunkRequest {
        audio_url: "https://media.test/processing/in.ogg?sig".to_string(),
        chunk_upload_urls: vec![
            ChunkUpload {
                index: 0,
                r2_key: "chunks/ep/a.ogg".to_string(),
                upload_url: "https://media.test/chunks/ep/a.ogg?sig".to_string(),
            },
            ChunkUpload {
                index: 1,
                r2_key: "chunks/ep/b.ogg".to_string(),
                upload_url: "https://media.test/chunks/ep/b.ogg?sig".to_string(),
            },
        ],
        chunk_duration: 60,
        overlap_duration: 2,
        duration: 75.0,
        output_format: None,
        bitrate: None,
    };

    let client = HttpTranscoderClient::new(server.uri(), fast_retry());
    let error = client.chunk(&request).await.unwrap_err();
    assert!(matches!(error, PipelineError::Encoding(_)));
}
