//! End-to-end FCM delivery: token exchange plus message send against
//! mock endpoints.

use pushgate::auth::{AssertionClaims, AssertionSigner};
use pushgate::profile::{FirebaseProfile, ProfileOptions, ServiceAccount};
use pushgate::{
    DispatchError, Profile, ProfileSet, Provider, Push, PushClient, PushOptions, PushRequest,
    PushResultProps, PushStatus, ResultSource, RetryOptions, RetryPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Debug, Default)]
struct FakeSigner {
    signed: AtomicUsize,
}

impl AssertionSigner for FakeSigner {
    fn sign(&self, claims: &AssertionClaims) -> Result<String, DispatchError> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake-assertion.{}", claims.iat))
    }
}

fn service_account(token_uri: String) -> ServiceAccount {
    ServiceAccount {
        project_id: "demo".to_string(),
        client_email: "svc@demo.iam.gserviceaccount.com".to_string(),
        private_key_pem: "unused-by-fake-signer".to_string(),
        token_uri,
    }
}

fn firebase_set(uri: &str, retry: Option<RetryOptions>) -> ProfileSet {
    let mut options = ProfileOptions::default();
    options.retry = retry;
    let profile = FirebaseProfile::builder()
        .endpoint(uri)
        .service_account(service_account(format!("{uri}/token")))
        .options(options)
        .build()
        .unwrap();
    ProfileSet::new("talk", "main", vec![Profile::Firebase(profile)]).unwrap()
}

fn client_for(set: ProfileSet, signer: Arc<FakeSigner>) -> PushClient {
    PushClient::builder().profile_set(set).fcm_signer(signer).build().unwrap()
}

fn fcm_request() -> PushRequest {
    PushRequest::new(Provider::Firebase, "fcm-tok", Push::for_firebase("t", "b")).unwrap()
}

async fn mount_token_endpoint(server: &MockServer, expect: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
        .and(body_string_contains("assertion=fake-assertion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "exchanged-token",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(expect)
        .mount(server)
        .await;
}

#[tokio::test]
async fn fcm_success_uses_an_exchanged_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/demo/messages:send"))
        .and(header("authorization", "Bearer exchanged-token"))
        .and(body_string_contains("\"token\":\"fcm-tok\""))
        .and(body_string_contains("\"validate_only\":false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "projects/demo/messages/42",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let signer = Arc::new(FakeSigner::default());
    let client = client_for(firebase_set(&server.uri(), None), Arc::clone(&signer));
    let result = client.send("talk", "main", &fcm_request(), &PushOptions::default()).await;

    assert_eq!(result.status, PushStatus::Success);
    assert_eq!(result.result_source, ResultSource::PushProvider);
    match result.push_result_props.unwrap() {
        PushResultProps::Firebase { message_id, .. } => {
            assert_eq!(message_id.as_deref(), Some("projects/demo/messages/42"));
        }
        props => panic!("unexpected props: {props:?}"),
    }
    assert_eq!(signer.signed.load(Ordering::SeqCst), 1);
    client.close();
}

#[tokio::test]
async fn access_token_is_cached_across_sends() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/demo/messages:send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "projects/demo/messages/1",
        })))
        .expect(2)
        .mount(&server)
        .await;

    let signer = Arc::new(FakeSigner::default());
    let client = client_for(firebase_set(&server.uri(), None), Arc::clone(&signer));
    for _ in 0..2 {
        let result = client.send("talk", "main", &fcm_request(), &PushOptions::default()).await;
        assert_eq!(result.status, PushStatus::Success);
    }
    // One exchange total; the assertion was signed exactly once.
    assert_eq!(signer.signed.load(Ordering::SeqCst), 1);
    client.close();
}

/// Token endpoint that fails once with 503 before succeeding.
struct FlakyTokenEndpoint {
    hits: AtomicUsize,
}

impl Respond for FlakyTokenEndpoint {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.hits.fetch_add(1, Ordering::SeqCst) == 0 {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "exchanged-token",
                "expires_in": 3600,
                "token_type": "Bearer",
            }))
        }
    }
}

#[tokio::test]
async fn token_exchange_retries_transient_failures_with_a_fresh_assertion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(FlakyTokenEndpoint { hits: AtomicUsize::new(0) })
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/demo/messages:send"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "projects/demo/messages/1",
        })))
        .mount(&server)
        .await;

    let signer = Arc::new(FakeSigner::default());
    let client = client_for(firebase_set(&server.uri(), None), Arc::clone(&signer));
    let result = client.send("talk", "main", &fcm_request(), &PushOptions::default()).await;
    assert_eq!(result.status, PushStatus::Success);
    // The assertion is never cached: each exchange attempt signs anew.
    assert_eq!(signer.signed.load(Ordering::SeqCst), 2);
    client.close();
}

/// 429 with Retry-After on the first hit, then 200.
struct ThrottledOnce {
    hits: AtomicUsize,
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for ThrottledOnce {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        if self.hits.fetch_add(1, Ordering::SeqCst) == 0 {
            ResponseTemplate::new(429)
                .insert_header("retry-after", "2")
                .insert_header("content-type", "application/json")
                .set_body_json(serde_json::json!({
                    "error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"},
                }))
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/demo/messages/2",
            }))
        }
    }
}

#[tokio::test]
async fn fcm_default_rule_complies_with_retry_after_on_429() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .and(path("/v1/projects/demo/messages:send"))
        .respond_with(ThrottledOnce { hits: AtomicUsize::new(0), arrivals: Arc::clone(&arrivals) })
        .expect(2)
        .mount(&server)
        .await;

    let retry = RetryOptions::builder()
        .max_attempts(2)
        .retry_policy(RetryPolicy::FcmDefault)
        .build()
        .unwrap();
    let signer = Arc::new(FakeSigner::default());
    let client = client_for(firebase_set(&server.uri(), Some(retry)), signer);
    let result = client.send("talk", "main", &fcm_request(), &PushOptions::default()).await;

    assert_eq!(result.status, PushStatus::Success);
    let arrivals = arrivals.lock().unwrap();
    assert_eq!(arrivals.len(), 2);
    let gap = arrivals[1] - arrivals[0];
    assert!(gap >= Duration::from_millis(1900), "gap was {gap:?}");
    assert!(gap <= Duration::from_millis(3500), "gap was {gap:?}");
    client.close();
}

#[tokio::test]
async fn fcm_permanent_errors_do_not_retry() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/demo/messages:send"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("content-type", "application/json")
                .set_body_json(serde_json::json!({
                    "error": {"code": 404, "message": "unregistered", "status": "NOT_FOUND"},
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let retry = RetryOptions::builder()
        .max_attempts(3)
        .retry_policy(RetryPolicy::FcmDefault)
        .build()
        .unwrap();
    let signer = Arc::new(FakeSigner::default());
    let client = client_for(firebase_set(&server.uri(), Some(retry)), signer);
    let result = client.send("talk", "main", &fcm_request(), &PushOptions::default()).await;

    assert_eq!(result.status, PushStatus::DeviceUnregistered);
    assert_eq!(result.reason.as_deref(), Some("unregistered"));
    client.close();
}
