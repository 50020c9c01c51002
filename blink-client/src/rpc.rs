//! # Action HTTP Client
//!
//! Resolves action urls into descriptors and forwards component POSTs to action endpoints,
//! optionally through a CORS/privacy proxy. Descriptor fetches retry transient failures, POSTs
//! that may lead to a signed transaction never do.
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use blink_common::{
    dto::{
        ActionError, ActionGetResponse, ActionPostRequest, ActionPostResponse, ErrorBody,
        NextActionPostRequest,
    },
    models::{action::ActionMetadata, error::ClientError},
    traits::{ActionClient, ResolvedAction},
};
use reqwest::{header, Client, ClientBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, instrument, trace, warn};

use crate::config::RetryConfiguration;

pub const BLOCKCHAIN_IDS_HEADER: &str = "x-blockchain-ids";
pub const ACTION_VERSION_HEADER: &str = "x-action-version";

#[derive(Debug, Clone, Default)]
pub struct HttpActionClientOptions {
    /// Requests are sent to `<proxy_url>?url=<target>` when set.
    pub proxy_url: Option<String>,
    pub retry: RetryConfiguration,
    /// Per request timeout.
    pub timeout: Option<Duration>,
}

impl HttpActionClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxy_url(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfiguration) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpActionClient {
    http_client: Client,
    proxy_url: Option<Url>,
    retry_after: Arc<RwLock<Option<SystemTime>>>,
    backoff_policy: ExponentialBackoff,
    server_restart_duration: Duration,
}

impl HttpActionClient {
    pub fn new(options: HttpActionClientOptions) -> Result<Self, ClientError> {
        let proxy_url = options
            .proxy_url
            .as_deref()
            .map(|proxy| {
                proxy
                    .parse::<Url>()
                    .map_err(|e| ClientError::UrlParsing(proxy.to_string(), e.to_string()))
            })
            .transpose()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        let user_agent = format!("blink-client-{version}", version = env!("CARGO_PKG_VERSION"));
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&user_agent)
                .map_err(|e| ClientError::FormatRequest(format!("Invalid user agent format: {e}")))?,
        );

        let mut builder = ClientBuilder::new().default_headers(headers);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;

        Ok(Self {
            http_client: client,
            proxy_url,
            retry_after: Arc::new(RwLock::new(None)),
            backoff_policy: options.retry.backoff_policy(),
            server_restart_duration: Duration::from_secs(5),
        })
    }

    #[cfg(test)]
    pub fn with_test_backoff_policy(mut self) -> Self {
        // Extremely short intervals for very fast testing
        self.backoff_policy = RetryConfiguration::exponential(
            Duration::from_millis(1),
            1.1,
            Duration::from_millis(5),
            Some(Duration::from_millis(50)),
        )
        .backoff_policy();
        self.server_restart_duration = Duration::from_millis(5);
        self
    }

    /// Url the request is actually sent to.
    fn proxify(&self, target: &str) -> Result<Url, ClientError> {
        match &self.proxy_url {
            Some(proxy) => {
                let mut url = proxy.clone();
                url.query_pairs_mut()
                    .append_pair("url", target);
                Ok(url)
            }
            None => target
                .parse::<Url>()
                .map_err(|e| ClientError::UrlParsing(target.to_string(), e.to_string())),
        }
    }

    /// Converts transient error responses into errors.
    ///
    /// Raises an error if the response status code is 429, 502, 503 or 504. In the 429
    /// case it will try to look for a retry-after header an parse it accordingly. The
    /// parsed value is then passed as part of the error.
    async fn error_for_response(&self, response: Response) -> Result<Response, ClientError> {
        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_raw = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|h| h.to_str().ok())
                    .and_then(parse_retry_value);

                Err(ClientError::RateLimited(retry_after_raw))
            }
            StatusCode::BAD_GATEWAY |
            StatusCode::SERVICE_UNAVAILABLE |
            StatusCode::GATEWAY_TIMEOUT => Err(ClientError::ServerUnreachable(
                response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Server Unreachable".to_string()),
            )),
            _ => Ok(response),
        }
    }

    /// Classifies errors into transient or permanent ones.
    ///
    /// Transient errors are retried with a potential backoff, permanent ones are not.
    /// If the error is RateLimited, this method will set the self.retry_after value so
    /// future requests wait until the rate limit has been reset.
    async fn handle_error_for_backoff(&self, e: ClientError) -> backoff::Error<ClientError> {
        match e {
            ClientError::ServerUnreachable(_) => {
                backoff::Error::retry_after(e, self.server_restart_duration)
            }
            ClientError::RateLimited(Some(until)) => {
                let mut retry_after_guard = self.retry_after.write().await;
                *retry_after_guard = Some(
                    retry_after_guard
                        .unwrap_or(until)
                        .max(until),
                );

                if let Ok(duration) = until.duration_since(SystemTime::now()) {
                    backoff::Error::retry_after(e, duration)
                } else {
                    e.into()
                }
            }
            ClientError::RateLimited(None) => e.into(),
            _ => backoff::Error::permanent(e),
        }
    }

    /// Waits until the current rate limit time has passed.
    async fn wait_until_retry_after(&self) {
        if let Some(&until) = self.retry_after.read().await.as_ref() {
            let now = SystemTime::now();
            if until > now {
                if let Ok(duration) = until.duration_since(now) {
                    sleep(duration).await
                }
            }
        }
    }

    /// Makes a get request handling transient failures.
    async fn make_get_request(&self, uri: &Url) -> Result<Response, ClientError> {
        self.wait_until_retry_after().await;
        let response = backoff::future::retry(self.backoff_policy.clone(), || async {
            let server_response = self
                .http_client
                .get(uri.clone())
                .send()
                .await
                .map_err(|e| ClientError::HttpClient(e.to_string()))?;

            match self
                .error_for_response(server_response)
                .await
            {
                Ok(response) => Ok(response),
                Err(e) => Err(self.handle_error_for_backoff(e).await),
            }
        })
        .await?;
        Ok(response)
    }

    /// Makes a single post request. Nothing is retried: the endpoint may have built a
    /// transaction already.
    async fn make_post_request<T: Serialize + ?Sized>(
        &self,
        request: &T,
        uri: &Url,
    ) -> Result<Response, ClientError> {
        self.wait_until_retry_after().await;
        let response = self
            .http_client
            .post(uri.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;
        self.error_for_response(response)
            .await
    }

    /// Reads the body, mapping non-success statuses to the endpoint's error message.
    async fn read_body(response: Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::ParseResponse(e.to_string()))?;
        if status.is_success() {
            return Ok(body);
        }
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => Err(ClientError::Action(ActionError::from(error))),
            Err(_) => Err(ClientError::UnexpectedStatus(status.as_u16(), body)),
        }
    }

    fn parse<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
        serde_json::from_str::<T>(body)
            .map_err(|err| ClientError::ParseResponse(format!("Error: {err}, Body: {body}")))
    }

    async fn read_action(response: Response) -> Result<ResolvedAction, ClientError> {
        let metadata = metadata_from_headers(response.headers());
        let body = Self::read_body(response).await?;
        let action = Self::parse::<ActionGetResponse>(&body)?;
        Ok(ResolvedAction { response: action, metadata })
    }
}

fn metadata_from_headers(headers: &header::HeaderMap) -> ActionMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    ActionMetadata {
        blockchain_ids: header(BLOCKCHAIN_IDS_HEADER)
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        version: header(ACTION_VERSION_HEADER).map(String::from),
    }
}

fn parse_retry_value(val: &str) -> Option<SystemTime> {
    if let Ok(secs) = val.parse::<u64>() {
        return Some(SystemTime::now() + Duration::from_secs(secs));
    }
    if let Ok(date) = OffsetDateTime::parse(val, &Rfc2822) {
        return Some(date.into());
    }
    None
}

#[async_trait]
impl ActionClient for HttpActionClient {
    #[instrument(skip(self), fields(%url))]
    async fn get_action(&self, url: &Url) -> Result<ResolvedAction, ClientError> {
        let uri = self.proxify(url.as_str())?;
        debug!(%uri, "Fetching action descriptor");

        let response = self.make_get_request(&uri).await?;
        trace!(?response, "Received descriptor response");

        let resolved = Self::read_action(response).await?;
        if resolved.response.error.is_some() {
            warn!(error = ?resolved.response.error, "Action descriptor carries an error");
        }
        Ok(resolved)
    }

    #[instrument(skip(self, body))]
    async fn post_action(
        &self,
        href: &str,
        body: &ActionPostRequest,
    ) -> Result<ActionPostResponse, ClientError> {
        let uri = self.proxify(href)?;
        debug!(%uri, "Posting action");
        trace!(?body, "Sending action request");

        let response = self.make_post_request(body, &uri).await?;
        let body = Self::read_body(response).await?;
        let value = Self::parse::<serde_json::Value>(&body)?;
        // Success statuses may still carry `{"error": "..."}` or `{"error": {"message": ..}}`.
        if let Some(error) = value
            .get("error")
            .filter(|error| !error.is_null())
        {
            let error = match error {
                serde_json::Value::String(message) => {
                    Some(ActionError { message: message.clone() })
                }
                other => serde_json::from_value::<ActionError>(other.clone()).ok(),
            };
            if let Some(error) = error {
                return Err(ClientError::Action(error));
            }
        }
        let response = serde_json::from_value::<ActionPostResponse>(value)
            .map_err(|err| ClientError::ParseResponse(format!("Error: {err}, Body: {body}")))?;
        trace!(?response, "Received action response");
        Ok(response)
    }

    #[instrument(skip(self, body))]
    async fn post_next_action(
        &self,
        href: &str,
        body: &NextActionPostRequest,
    ) -> Result<ResolvedAction, ClientError> {
        let uri = self.proxify(href)?;
        debug!(%uri, "Posting chain continuation");

        let response = self.make_post_request(body, &uri).await?;
        Self::read_action(response).await
    }
}
