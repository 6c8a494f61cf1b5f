#![forbid(unsafe_code)]

//! Typed client for the simulation backend.
//!
//! All traffic goes through the [`Transport`] trait: a blocking
//! request/response seam with an HTTP implementation ([`HttpTransport`],
//! built on `reqwest`) and whatever in-memory implementation tests need.
//! [`ApiClient`] layers the endpoint paths and JSON bodies on top.
//!
//! Calls are single attempts. Retrying transient failures is the caller's
//! decision (see [`RetryPolicy`](crate::retry::RetryPolicy)).
//!
//! Names interpolated into endpoint paths (app, simulation id, file names)
//! are percent-encoded per segment by [`endpoint_path`].

use std::fmt;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::{ClientConfig, ConfigError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response (connect, timeout, ...).
    Transport { path: String, message: String },
    /// The backend answered with a non-success status.
    Status { path: String, status: u16 },
    /// The response body is not the expected JSON shape.
    Decode { path: String, message: String },
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode { .. } => false,
        }
    }

    /// The request path the error belongs to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Transport { path, .. } | Self::Status { path, .. } | Self::Decode { path, .. } => {
                path
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { path, message } => write!(f, "{path}: request failed: {message}"),
            Self::Status { path, status } => write!(f, "{path}: HTTP status {status}"),
            Self::Decode { path, message } => write!(f, "{path}: bad response body: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    /// A single-file multipart form.
    Multipart {
        field: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

/// One backend request. `path` is relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Body,
}

impl Request {
    /// A `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: Body::Empty,
        }
    }

    /// A `POST` request with a JSON body.
    #[must_use]
    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Body::Json(body),
        }
    }
}

/// Raw backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    /// A `200` response with a JSON body.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self {
            status: 200,
            body: value.to_string().into_bytes(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking request/response seam.
pub trait Transport: Send + Sync {
    /// Send a request. Non-2xx statuses are returned as responses, not errors.
    fn send(&self, request: &Request) -> Result<Response, ApiError>;
}

/// [`Transport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport from client configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        let builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Multipart {
                field,
                file_name,
                bytes,
            } => {
                let part = reqwest::blocking::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone());
                builder.multipart(reqwest::blocking::multipart::Form::new().part(field.clone(), part))
            }
        };

        let transport_error = |e: reqwest::Error| ApiError::Transport {
            path: request.path.clone(),
            message: e.to_string(),
        };
        let response = builder.send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(transport_error)?.to_vec();
        tracing::trace!(path = %request.path, status, bytes = body.len(), "backend response");
        Ok(Response { status, body })
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

static PATH_BASE: LazyLock<reqwest::Url> = LazyLock::new(|| {
    reqwest::Url::parse("http://localhost/").expect("path base URL parses")
});

/// An absolute request path from raw segments, each percent-encoded.
///
/// `["file-list", "my app", "a/b"]` becomes `/file-list/my%20app/a%2Fb`.
#[must_use]
pub fn endpoint_path<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut url = PATH_BASE.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments);
    }
    url.path().to_string()
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /run-simulation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSimulationRequest {
    pub models: Map<String, Value>,
    pub force_run: bool,
    pub report: String,
    pub simulation_id: String,
    pub simulation_type: String,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Endpoint-level client for one application.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    app_name: String,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client over any transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, app_name: impl Into<String>) -> Self {
        Self {
            transport,
            app_name: app_name.into(),
        }
    }

    /// Create an HTTP client from configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config.app_name.clone()))
    }

    /// Application name used in endpoint paths.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Send a request and return the raw bytes of a 2xx response.
    pub fn send_raw(&self, request: &Request) -> Result<Vec<u8>, ApiError> {
        let response = self.transport.send(request)?;
        if !response.is_success() {
            return Err(ApiError::Status {
                path: request.path.clone(),
                status: response.status,
            });
        }
        Ok(response.body)
    }

    /// Send a request and decode a 2xx JSON response.
    pub fn send_json<T: serde::de::DeserializeOwned>(&self, request: &Request) -> Result<T, ApiError> {
        let body = self.send_raw(request)?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode {
            path: request.path.clone(),
            message: e.to_string(),
        })
    }

    /// `GET /react/schema/{app}.json`.
    pub fn fetch_schema(&self) -> Result<Value, ApiError> {
        let file = format!("{}.json", self.app_name);
        self.send_json(&Request::get(endpoint_path(["react", "schema", file.as_str()])))
    }

    /// `GET /auth-guest-login/{app}`. The response body is ignored.
    pub fn guest_login(&self) -> Result<(), ApiError> {
        self.send_raw(&Request::get(endpoint_path(["auth-guest-login", self.app_name.as_str()])))
            .map(|_| ())
    }

    /// `POST /simulation-list`.
    pub fn simulation_list(&self) -> Result<Vec<Value>, ApiError> {
        self.send_json(&Request::post_json(
            "/simulation-list",
            json!({ "simulationType": self.app_name }),
        ))
    }

    /// `GET /simulation/{app}/{id}/{version}/source`.
    pub fn simulation_source(&self, simulation_id: &str, version: u32) -> Result<Value, ApiError> {
        let version = version.to_string();
        self.send_json(&Request::get(endpoint_path([
            "simulation",
            self.app_name.as_str(),
            simulation_id,
            version.as_str(),
            "source",
        ])))
    }

    /// `POST /run-simulation`: one poll of a report computation.
    pub fn run_simulation(&self, request: &RunSimulationRequest) -> Result<Value, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::Decode {
            path: "/run-simulation".to_string(),
            message: e.to_string(),
        })?;
        self.send_json(&Request::post_json("/run-simulation", body))
    }

    /// `POST /save-simulation`.
    pub fn save_simulation(&self, simulation: &Value) -> Result<Value, ApiError> {
        self.send_json(&Request::post_json("/save-simulation", simulation.clone()))
    }

    /// `POST /stateful-compute`: one poll of a backend-side computation.
    pub fn stateful_compute(&self, method: &str, simulation_id: &str) -> Result<Value, ApiError> {
        self.send_json(&Request::post_json(
            "/stateful-compute",
            json!({
                "method": method,
                "simulationId": simulation_id,
                "simulationType": self.app_name,
            }),
        ))
    }

    /// `GET /file-list/{app}/unused/{fileField}`.
    pub fn file_list(&self, file_field: &str) -> Result<Vec<String>, ApiError> {
        self.send_json(&Request::get(endpoint_path([
            "file-list",
            self.app_name.as_str(),
            "unused",
            file_field,
        ])))
    }

    /// `POST /upload-file/{app}/{simulationId}/{fileField}` (multipart field `file`).
    pub fn upload_file(
        &self,
        simulation_id: &str,
        file_field: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ApiError> {
        let request = Request {
            method: Method::Post,
            path: endpoint_path([
                "upload-file",
                self.app_name.as_str(),
                simulation_id,
                file_field,
            ]),
            body: Body::Multipart {
                field: "file".to_string(),
                file_name: file_name.to_string(),
                bytes,
            },
        };
        self.send_raw(&request).map(|_| ())
    }

    /// `GET /download-file/{app}/unused/{fileField}.{fileName}`.
    pub fn download_file(&self, file_field: &str, file_name: &str) -> Result<Vec<u8>, ApiError> {
        let file = format!("{file_field}.{file_name}");
        self.send_raw(&Request::get(endpoint_path([
            "download-file",
            self.app_name.as_str(),
            "unused",
            file.as_str(),
        ])))
    }
}
