#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use bytes::Bytes;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use codemart::auth::{TokenIssuer, TokenScope};
use codemart::config::{Settings, TransferConfig};
use codemart::credentials::{CredentialResolver, HostToken, TokenCipher};
use codemart::payment::{Authorization, CaptureResult, PaymentError, PaymentGateway, ReturnContext};
use codemart::server::{AppState, create_router};
use codemart::settlement::SettlementOrchestrator;
use codemart::store::{SqliteStore, Store};
use codemart::transport::{CodeHost, Git2Vcs, SnapshotTransport, TransportError};
use codemart::types::{OrderStatus, PaymentOrder};

pub const FRONTEND: &str = "https://shop.example";
pub const SOURCE_URL: &str = "https://host.example/alice/widget";

pub fn widget_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in [
        ("alice-widget-3f2a1b/README.md", "# widget"),
        ("alice-widget-3f2a1b/src/lib.rs", "pub fn widget() {}"),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Serves one archive and creates bare repositories on local disk.
pub struct LocalHost {
    archive: Vec<u8>,
    remotes: PathBuf,
    pub created: Mutex<HashSet<String>>,
}

#[async_trait]
impl CodeHost for LocalHost {
    async fn download_snapshot(
        &self,
        owner: &str,
        repo: &str,
        _branch: &str,
        _token: &HostToken,
    ) -> Result<Bytes, TransportError> {
        if (owner, repo) != ("alice", "widget") {
            return Err(TransportError::SnapshotDownloadFailed {
                status: 404,
                body: "Not Found".to_string(),
            });
        }
        Ok(Bytes::from(self.archive.clone()))
    }

    async fn create_repository(
        &self,
        name: &str,
        _token: &HostToken,
    ) -> Result<String, TransportError> {
        let path = self.remotes.join(format!("{name}.git"));
        if self.created.lock().unwrap().insert(name.to_string()) {
            git2::Repository::init_bare(&path).unwrap();
        }
        Ok(path.to_string_lossy().to_string())
    }
}

#[derive(Default)]
pub struct CountingGateway {
    pub orders: AtomicUsize,
    pub captures: AtomicUsize,
    amounts: Mutex<HashMap<String, i64>>,
}

impl CountingGateway {
    pub fn calls(&self) -> usize {
        self.orders.load(Ordering::SeqCst) + self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for CountingGateway {
    fn currency(&self) -> &str {
        "USD"
    }

    async fn create_order(
        &self,
        amount_cents: i64,
        _description: &str,
        _context: &ReturnContext,
    ) -> codemart::payment::Result<PaymentOrder> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        self.amounts
            .lock()
            .unwrap()
            .insert(format!("ORDER-{n}"), amount_cents);
        Ok(PaymentOrder {
            order_id: format!("ORDER-{n}"),
            approval_url: Some(format!("https://processor.example/approve?token=ORDER-{n}")),
            authorization_id: None,
            amount_cents,
            currency: "USD".to_string(),
            status: OrderStatus::Created,
        })
    }

    async fn authorize(&self, order_id: &str) -> codemart::payment::Result<Authorization> {
        let amount_cents = self
            .amounts
            .lock()
            .unwrap()
            .get(order_id)
            .copied()
            .ok_or_else(|| PaymentError::AuthorizationFailed("unknown order".to_string()))?;
        Ok(Authorization {
            id: format!("AUTH-{order_id}"),
            amount_cents,
            currency: "USD".to_string(),
        })
    }

    async fn capture(&self, authorization_id: &str) -> codemart::payment::Result<CaptureResult> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(CaptureResult {
            capture_id: Some(format!("CAP-{authorization_id}")),
            status: Some("COMPLETED".to_string()),
            raw: json!({"id": format!("CAP-{authorization_id}"), "status": "COMPLETED"}),
        })
    }
}

pub struct TestApp {
    _temp: TempDir,
    pub router: Router,
    pub store: Arc<SqliteStore>,
    pub gateway: Arc<CountingGateway>,
    pub host: Arc<LocalHost>,
    pub admin_token: String,
    pub alice_id: String,
    pub alice_token: String,
    pub bob_id: String,
    pub bob_token: String,
}

fn issue_token(store: &SqliteStore, scope: TokenScope) -> String {
    TokenIssuer::new()
        .unwrap()
        .register(store, scope, None)
        .unwrap()
        .raw
}

impl TestApp {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let scratch = temp.path().join("tmp");
        let remotes = temp.path().join("remotes");
        std::fs::create_dir_all(&remotes).unwrap();

        let store = Arc::new(SqliteStore::new(temp.path().join("codemart.db")).unwrap());
        store.initialize().unwrap();

        let cipher = TokenCipher::from_base64_key(&TokenCipher::generate_key()).unwrap();
        let credentials = CredentialResolver::new(store.clone(), Arc::new(cipher));
        let alice = credentials
            .link_user("alice", "alice@example.com", "gho_alice")
            .unwrap();
        let bob = credentials
            .link_user("bob", "bob@example.com", "gho_bob")
            .unwrap();

        let admin_token = issue_token(&store, TokenScope::Admin);
        let alice_token = issue_token(&store, TokenScope::User(alice.id.clone()));
        let bob_token = issue_token(&store, TokenScope::User(bob.id.clone()));

        let gateway = Arc::new(CountingGateway::default());
        let host = Arc::new(LocalHost {
            archive: widget_zip(),
            remotes,
            created: Mutex::new(HashSet::new()),
        });
        let mut config = TransferConfig::new(scratch);
        config.push_backoff = Duration::from_millis(1);
        let transport = SnapshotTransport::new(host.clone(), Arc::new(Git2Vcs), config);

        let settings = Settings::new(FRONTEND, "https://api.example");
        let orchestrator = SettlementOrchestrator::new(
            store.clone(),
            gateway.clone(),
            Arc::new(transport),
            credentials.clone(),
            settings.clone(),
        );

        let state = Arc::new(AppState::new(
            store.clone(),
            Arc::new(orchestrator),
            credentials,
            settings,
        ));

        Self {
            _temp: temp,
            router: create_router(state),
            store,
            gateway,
            host,
            admin_token,
            alice_id: alice.id,
            alice_token,
            bob_id: bob.id,
            bob_token,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, token: &str, body: Value) -> Response<Body> {
        let request = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_form(&self, uri: &str, token: &str, fields: &[(&str, &str)]) -> Response<Body> {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Response<Body> {
        let request = Request::delete(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Orders alice's widget as the token's user and walks the processor
    /// callback. Returns the authorization id to confirm.
    pub async fn approve_widget(&self, token: &str, price: &str) -> String {
        let uri = format!(
            "/api/v1/purchases/create-order/widget?seller_id={}&repo_url={}&repo_price={price}",
            self.alice_id,
            urlencoding::encode(SOURCE_URL),
        );
        let response = self.get(&uri, Some(token)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let approval = reqwest::Url::parse(&location(&response)).unwrap();
        let order_id = approval
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let callback = format!(
            "/api/v1/purchases/success?token={order_id}&PayerID=PAYER-9&repo_name=widget&repo_url={}&seller_id={}",
            urlencoding::encode(SOURCE_URL),
            self.alice_id
        );
        let response = self.get(&callback, None).await;
        let redirect = reqwest::Url::parse(&location(&response)).unwrap();
        redirect
            .query_pairs()
            .find(|(k, _)| k == "authorization_id")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    /// Creates a listing owned by alice and returns its id.
    pub async fn list_widget(&self, price_cents: i64) -> String {
        let response = self
            .post_json(
                "/api/v1/repos",
                &self.alice_token,
                json!({
                    "name": "widget",
                    "source_url": SOURCE_URL,
                    "branch": "dev",
                    "price_cents": price_cents,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}
