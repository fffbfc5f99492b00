//! Mock management point for end-to-end tests.
//!
//! Serves every message endpoint and the query endpoint from an axum router on
//! `127.0.0.1:0`. Each request envelope is decoded and its signature checked;
//! a bad signature gets a non-zero status. Everything received is recorded
//! for assertions.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use mpclient_auth::signing::sign_body;
use mpclient_auth::{ClientToken, PrivateKey, PublicKey};
use mpclient_cli::commands::Session;
use mpclient_cli::config::{FileConfig, Overrides, Settings};
use mpclient_core::xml::parse_document;
use mpclient_core::{
    decode_envelope, encode_reply, AssignmentFlags, MessageType, PolicyAssignment, QuerySpec,
    ResourceKind, ResponsePayload, Row,
};
use serde::Deserialize;

pub const SITE_CODE: &str = "PS1";
pub const COLLECTION_ID: &str = "PS100020";

/// What the mock serves and how it misbehaves.
#[derive(Default)]
pub struct MockConfig {
    pub assignments: Vec<PolicyAssignment>,
    /// Policy bodies by assignment location.
    pub bodies: HashMap<String, Vec<u8>>,
    /// Signs every policy body when set.
    pub body_key: Option<PrivateKey>,
    pub content_urls: Vec<String>,
    /// Members returned by successive queries; the last entry repeats.
    pub membership: Vec<Vec<(u32, &'static str)>>,
    /// Answer message requests with an empty body.
    pub empty_replies: bool,
    /// Answer relay requests with this non-zero status.
    pub relay_status: Option<u32>,
}

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub message_type: MessageType,
    pub source: ClientToken,
    pub site_code: String,
    pub callback_target: Option<String>,
    pub signature_valid: bool,
    pub body: Vec<u8>,
}

struct MockState {
    config: MockConfig,
    requests: Mutex<Vec<RecordedRequest>>,
    issued_tokens: Mutex<Vec<ClientToken>>,
    membership: Mutex<VecDeque<Vec<(u32, &'static str)>>>,
    queries: Mutex<Vec<String>>,
}

pub struct MockManagementPoint {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockManagementPoint {
    pub async fn start() -> Self {
        Self::start_with(MockConfig::default()).await
    }

    pub async fn start_with(config: MockConfig) -> Self {
        let membership = VecDeque::from(config.membership.clone());
        let state = Arc::new(MockState {
            config,
            requests: Mutex::new(Vec::new()),
            issued_tokens: Mutex::new(Vec::new()),
            membership: Mutex::new(membership),
            queries: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/mp/registration", post(handle_message))
            .route("/mp/discovery", post(handle_message))
            .route("/mp/policy", post(handle_message))
            .route("/mp/policy-body", post(handle_message))
            .route("/mp/content-location", post(handle_message))
            .route("/mp/query", post(handle_query))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock management point");
        let addr = listener.local_addr().expect("Failed to read local address");
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Mock server failed");
        });

        Self {
            addr,
            state,
            server,
        }
    }

    /// Settings pointing at this mock over plain HTTP.
    pub fn settings(&self) -> Settings {
        let file = FileConfig {
            management_point: Some("127.0.0.1".to_string()),
            site_code: Some(SITE_CODE.to_string()),
            port: Some(self.addr.port()),
            request_timeout_secs: Some(5),
            ..FileConfig::default()
        };
        Settings::resolve(file, Overrides::default()).expect("Mock settings must resolve")
    }

    /// A session for this mock, with fast polling for membership tests.
    pub fn session(&self) -> Session {
        let mut settings = self.settings();
        settings.poll_interval = Duration::from_millis(50);
        Session::new(settings).expect("Failed to build session")
    }

    /// A session that requires policy bodies signed by `key`.
    pub fn session_pinning_bodies(&self, key: PublicKey) -> Session {
        let mut settings = self.settings();
        settings.policy_signing_key = Some(key);
        Session::new(settings).expect("Failed to build session")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_of(&self, message_type: MessageType) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.message_type == message_type)
            .collect()
    }

    pub fn issued_tokens(&self) -> Vec<ClientToken> {
        self.state.issued_tokens.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().unwrap().clone()
    }
}

impl Drop for MockManagementPoint {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn assignment(id: &str, location: &str, flags: &str) -> PolicyAssignment {
    PolicyAssignment {
        id: id.to_string(),
        name: format!("{id} deployment"),
        collection: COLLECTION_ID.to_string(),
        location: location.to_string(),
        version: "1".to_string(),
        flags: AssignmentFlags::parse(flags),
    }
}

/// A network access account policy with username and password secrets.
pub fn naa_policy(id: &str, username_ct: &[u8], password_ct: &[u8]) -> Vec<u8> {
    format!(
        r#"<Policy ID="{id}" Version="1">
  <Instance Class="NetworkAccessAccount">
    <Secret Name="NetworkAccessUsername" Context="machine">{}</Secret>
    <Secret Name="NetworkAccessPassword" Context="machine">{}</Secret>
  </Instance>
  <Instance Class="SoftwareDistribution">
    <Property Name="ProgramName" Value="setup.exe"/>
  </Instance>
</Policy>"#,
        hex::encode(username_ct),
        hex::encode(password_ct)
    )
    .into_bytes()
}

/// A network access account policy carrying one `username NUL password` blob.
pub fn naa_credential_policy(id: &str, ciphertext: &[u8]) -> Vec<u8> {
    format!(
        r#"<Policy ID="{id}" Version="1"><Instance Class="NetworkAccessAccount"><Secret Name="NetworkAccessCredential" Context="machine">{}</Secret></Instance></Policy>"#,
        hex::encode(ciphertext)
    )
    .into_bytes()
}

// ============================================================================
// Handlers
// ============================================================================

fn xml(bytes: Vec<u8>) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], bytes).into_response()
}

fn reply(status: u32, reason: Option<&str>, payload: Option<&ResponsePayload>) -> Response {
    xml(encode_reply(status, reason, payload).expect("Failed to encode reply"))
}

async fn handle_message(State(state): State<Arc<MockState>>, body: Bytes) -> Response {
    let decoded = match decode_envelope(&body) {
        Ok(decoded) => decoded,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let message = decoded.message;
    let signature_valid = message.verify().is_ok();

    state.requests.lock().unwrap().push(RecordedRequest {
        message_type: message.message_type(),
        source: message.headers().source,
        site_code: message.headers().site_code.clone(),
        callback_target: decoded.callback_target.clone(),
        signature_valid,
        body: message.body().to_vec(),
    });

    if state.config.empty_replies {
        return xml(Vec::new());
    }
    if !signature_valid {
        return reply(1, Some("signature verification failed"), None);
    }
    if decoded.callback_target.is_some() {
        return match state.config.relay_status {
            Some(status) => reply(status, Some("callback refused"), None),
            None => reply(0, None, Some(&ResponsePayload::Acknowledged)),
        };
    }

    let request = parse_document(message.body()).expect("Signed body must be XML");
    let payload = match message.message_type() {
        MessageType::Registration => {
            let token = ClientToken::generate();
            state.issued_tokens.lock().unwrap().push(token);
            ResponsePayload::Registration {
                token,
                approved: true,
            }
        }
        MessageType::DiscoveryRecord => ResponsePayload::Acknowledged,
        MessageType::PolicyRequest => {
            let kind = request
                .attr("ResourceType")
                .and_then(ResourceKind::from_wire)
                .unwrap_or(ResourceKind::Machine);
            ResponsePayload::PolicyAssignments {
                kind,
                assignments: state.config.assignments.clone(),
            }
        }
        MessageType::PolicyBodyRequest => {
            let location = request.attr("Location").unwrap_or_default();
            let Some(body) = state.config.bodies.get(location) else {
                return reply(404, Some("no such policy"), None);
            };
            let signature = state
                .config
                .body_key
                .as_ref()
                .map(|key| sign_body(key, body).expect("Failed to sign body"));
            ResponsePayload::PolicyBody {
                body: body.clone(),
                signature,
            }
        }
        MessageType::ContentLocationRequest => {
            ResponsePayload::ContentLocations(state.config.content_urls.clone())
        }
    };
    reply(0, None, Some(&payload))
}

#[derive(Deserialize)]
struct QueryRequest {
    spec: QuerySpec,
    query: String,
    count: bool,
}

async fn handle_query(
    State(state): State<Arc<MockState>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    state.queries.lock().unwrap().push(request.query);

    let wanted = request
        .spec
        .filter
        .iter()
        .any(|(property, value)| property == "CollectionID" && value == COLLECTION_ID);
    let members = if wanted {
        let mut script = state.membership.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        }
    } else {
        Vec::new()
    };

    if request.count {
        return Json(serde_json::json!({ "count": members.len() })).into_response();
    }
    let rows: Vec<Row> = members
        .into_iter()
        .map(|(id, name)| {
            Row::new()
                .with("ResourceID", id.to_string())
                .with("Name", name)
        })
        .collect();
    Json(serde_json::json!({ "rows": rows })).into_response()
}
