//! HTTP surface tests over the in-process topology.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tower::ServiceExt;

use courier_api::routes::create_router;
use courier_api::state::AppState;
use courier_cache::CacheService;
use courier_common::config::{AppConfig, BrokerConfig, CacheConfig, QueueNames};
use courier_email::{EmailTransport, LogFaultSink, TransportError, email_endpoints};
use courier_messaging::{MemoryTopology, Topology};

struct RecordingTransport {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .await
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        broker: BrokerConfig {
            enabled: false,
            host: "localhost".to_string(),
            port: 5672,
            virtual_host: "/".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            use_tls: false,
        },
        cache: CacheConfig {
            enabled: false,
            connection_string: "redis://unused".to_string(),
            key_prefix: "test:".to_string(),
            default_expiration_minutes: 30,
            local_expiration_minutes: 5,
            max_payload_bytes: 1_048_576,
            max_key_length: 1024,
        },
        queues: QueueNames {
            send_queue: "email-queue".to_string(),
            fault_queue: "email-faults".to_string(),
            resend_queue: "email-resend-requests".to_string(),
        },
        database_url: None,
    }
}

/// Router backed by a running in-process topology; returns the transport's
/// delivery log and the shutdown sender keeping the loops alive.
async fn test_app() -> (Router, Arc<Mutex<Vec<(String, String)>>>, watch::Sender<bool>) {
    let config = test_config();
    let sent = Arc::new(Mutex::new(Vec::new()));

    let topology = MemoryTopology::new();
    let transport = Arc::new(RecordingTransport {
        sent: Arc::clone(&sent),
    });
    for endpoint in email_endpoints(&config.queues, transport, Arc::new(LogFaultSink)) {
        topology.declare(endpoint).await.unwrap();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = topology.clone();
    tokio::spawn(async move {
        let _ = runner.run(shutdown_rx).await;
    });

    let cache = Arc::new(CacheService::new(config.cache.clone(), None));
    let state = AppState::new(Arc::new(topology), cache, None, config);
    (create_router(state), sent, shutdown_tx)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn accepted_job_is_delivered_through_the_pipeline() {
    let (app, sent, _shutdown) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/email/send",
            json!({"to": "a@b.com", "subject": "Hello", "body": "World"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["job_id"].is_string());

    // The consume loop picks the job up asynchronously.
    for _ in 0..500 {
        if !sent.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let sent = sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], ("a@b.com".to_string(), "Hello".to_string()));
}

#[tokio::test]
async fn malformed_recipient_is_rejected() {
    let (app, _sent, _shutdown) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/api/email/send",
            json!({"to": "not-an-address", "subject": "S", "body": "B"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_failure_surfaces_a_generic_error() {
    // Topology with no declared queues: every publish fails.
    let config = test_config();
    let cache = Arc::new(CacheService::new(config.cache.clone(), None));
    let state = AppState::new(Arc::new(MemoryTopology::new()), cache, None, config);
    let app = create_router(state);

    let response = app
        .oneshot(post_json(
            "/api/email/send",
            json!({"to": "a@b.com", "subject": "S", "body": "B"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "An error occurred while accepting the request.");
}

#[tokio::test]
async fn health_reports_ok_when_dependencies_are_up() {
    let (app, _sent, _shutdown) = test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"]["status"], "disabled");
}

#[tokio::test]
async fn job_lookup_without_audit_store_is_not_found() {
    let (app, _sent, _shutdown) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/email/jobs/00000000-0000-0000-0000-000000000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn module_health_is_plain_text() {
    let (app, _sent, _shutdown) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/email/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
