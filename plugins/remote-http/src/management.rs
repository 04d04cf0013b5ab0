//! Remote management over a JSON-over-HTTP bridge.
//!
//! Every call is a `POST` of a single request object to the container's
//! endpoint. The bridge answers `200` with `{"status": <code>, "value": ...}`
//! where `status` carries the outcome of the operation itself.

use std::time::Duration;

use async_trait::async_trait;
use fleet_lifecycle::{Credentials, RemoteError, RemoteManagement, RemoteSession};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Object name pattern matching every registered management object.
const ALL_OBJECTS: &str = "*:*";

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BridgeRequest<'a> {
    Version,
    Search {
        mbean: &'a str,
    },
    Exec {
        mbean: &'a str,
        operation: &'a str,
        arguments: Vec<Value>,
    },
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    status: u16,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpRemoteManagement {
    client: reqwest::Client,
}

impl HttpRemoteManagement {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::Connect(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteManagement for HttpRemoteManagement {
    /// Opens a session and probes it with a version request so rejected
    /// credentials surface here rather than on the first operation.
    async fn connect(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let session = HttpRemoteSession {
            client: self.client.clone(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            credentials: credentials.cloned(),
        };
        let version = session.call(&BridgeRequest::Version).await?;
        debug!(%endpoint, ?version, "remote management session opened");
        Ok(Box::new(session))
    }
}

#[derive(Debug)]
struct HttpRemoteSession {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<Credentials>,
}

impl HttpRemoteSession {
    async fn call(&self, request: &BridgeRequest<'_>) -> Result<Value, RemoteError> {
        trace!(endpoint = %self.endpoint, ?request, "remote management request");
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(creds) = &self.credentials {
            builder = builder.basic_auth(&creds.user, Some(&creds.password));
        }
        let response = builder.send().await.map_err(transport_error)?;

        check_status(response.status())?;
        let body: BridgeResponse = response
            .json()
            .await
            .map_err(|err| RemoteError::Protocol(format!("malformed response: {err}")))?;
        into_value(body)
    }
}

#[async_trait]
impl RemoteSession for HttpRemoteSession {
    async fn list_objects(&self) -> Result<Vec<String>, RemoteError> {
        let value = self
            .call(&BridgeRequest::Search { mbean: ALL_OBJECTS })
            .await?;
        serde_json::from_value(value)
            .map_err(|err| RemoteError::Protocol(format!("unexpected search result: {err}")))
    }

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        self.call(&BridgeRequest::Exec {
            mbean: object,
            operation,
            arguments: args,
        })
        .await
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::Connect(err.to_string())
    } else {
        RemoteError::Protocol(err.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), RemoteError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(RemoteError::Authentication(status.to_string()))
        }
        s if s.is_success() => Ok(()),
        s => Err(RemoteError::Protocol(format!("unexpected HTTP status {s}"))),
    }
}

fn into_value(body: BridgeResponse) -> Result<Value, RemoteError> {
    match body.status {
        200 => Ok(body.value),
        401 | 403 => Err(RemoteError::Authentication(
            body.error.unwrap_or_else(|| format!("status {}", body.status)),
        )),
        status => Err(RemoteError::Protocol(
            body.error.unwrap_or_else(|| format!("status {status}")),
        )),
    }
}
