use std::time::Duration;

use async_trait::async_trait;
use connect_protocol::{
    ApiErrorBody, CloseSessionsResponse, CreateSessionRequest, CreateSessionResponse,
    ListSessionsResponse, MailboxMessage, PublicSessionView, SendSignalRequest,
    SendSignalResponse, SessionCode, SessionView, SignalKind, VerifyPasswordRequest,
    VerifyPasswordResponse,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::RelayClientError;

/// The relay operations a participant needs. Implemented over HTTP by
/// [`HttpRelayClient`]; tests can drive the relay in-process instead.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn send(
        &self,
        target: &SessionCode,
        kind: SignalKind,
        payload: Value,
    ) -> Result<(), RelayClientError>;

    async fn poll(&self, code: &SessionCode) -> Result<Vec<MailboxMessage>, RelayClientError>;

    /// Checks a caller-supplied password against a session the caller owns.
    async fn verify_password(
        &self,
        code: &SessionCode,
        password: &str,
    ) -> Result<bool, RelayClientError>;
}

#[derive(Clone)]
pub struct HttpRelayClient {
    base: Url,
    http: Client,
    token: Option<String>,
}

impl HttpRelayClient {
    pub fn new(base: &str) -> Result<Self, RelayClientError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base,
            http,
            token: None,
        })
    }

    /// Attaches a bearer token for the authenticated routes.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, RelayClientError> {
        Ok(self.base.join(path)?)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<SessionView, RelayClientError> {
        let response = self
            .authorized(self.http.post(self.endpoint("api/session/create")?))
            .json(request)
            .send()
            .await?;
        let created: CreateSessionResponse = decode(response).await?;
        Ok(created.session)
    }

    pub async fn list_sessions(&self) -> Result<Vec<PublicSessionView>, RelayClientError> {
        let response = self
            .http
            .get(self.endpoint("api/session/list")?)
            .send()
            .await?;
        let list: ListSessionsResponse = decode(response).await?;
        Ok(list.sessions)
    }

    pub async fn get_session(
        &self,
        code: &SessionCode,
    ) -> Result<Option<PublicSessionView>, RelayClientError> {
        let response = self
            .http
            .get(self.endpoint(&format!("api/session/{code}"))?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    pub async fn close_sessions(&self) -> Result<usize, RelayClientError> {
        let response = self
            .authorized(self.http.post(self.endpoint("api/session/close")?))
            .send()
            .await?;
        let closed: CloseSessionsResponse = decode(response).await?;
        Ok(closed.closed)
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn send(
        &self,
        target: &SessionCode,
        kind: SignalKind,
        payload: Value,
    ) -> Result<(), RelayClientError> {
        let request = SendSignalRequest {
            target_code: target.clone(),
            kind,
            payload,
        };
        let response = self
            .http
            .post(self.endpoint("api/signal/send")?)
            .json(&request)
            .send()
            .await?;
        let _: SendSignalResponse = decode(response).await?;
        Ok(())
    }

    async fn poll(&self, code: &SessionCode) -> Result<Vec<MailboxMessage>, RelayClientError> {
        let response = self
            .http
            .get(self.endpoint("api/signal/poll")?)
            .query(&[("code", code.as_str())])
            .send()
            .await?;
        decode(response).await
    }

    async fn verify_password(
        &self,
        code: &SessionCode,
        password: &str,
    ) -> Result<bool, RelayClientError> {
        let request = VerifyPasswordRequest {
            code: code.clone(),
            password: password.to_string(),
        };
        let response = self
            .authorized(self.http.post(self.endpoint("api/session/verify")?))
            .json(&request)
            .send()
            .await?;
        let verdict: VerifyPasswordResponse = decode(response).await?;
        Ok(verdict.valid)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RelayClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.json::<ApiErrorBody>().await.ok();
    Err(RelayClientError::Status {
        status,
        error: body
            .as_ref()
            .map(|body| body.error.clone())
            .unwrap_or_else(|| status.to_string()),
        message: body.and_then(|body| body.message),
    })
}
