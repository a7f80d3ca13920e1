//! A [`Transport`] over HTTP, backed by reqwest.

use std::time::Duration;

use futures::{
    future::{BoxFuture, FutureExt},
    task::{FutureObj, Spawn, SpawnError},
};
use reqwest::{Client, Url};

use crate::{
    config::DispatchConfig,
    dispatch::{DispatchRules, Dispatcher},
    error::TransportError,
    request::{Method, RequestDescriptor, Response},
    transport::Transport,
};

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Performs requests against a fixed base URL with a default timeout. Any
/// status is reported as a [`Response`]; only failures that produce no
/// response become a [`TransportError`].
///
/// The futures it returns need a tokio runtime.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &DispatchConfig) -> Result<Self, TransportError> {
        let base_url = Url::parse(&config.base_url).map_err(|err| TransportError::InvalidTarget {
            target: config.base_url.clone(),
            reason: err.to_string(),
        })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout: config.timeout(),
        })
    }

    /// The full URL a descriptor resolves to: its target joined onto the base
    /// URL (absolute targets replace it), followed by its query parameters.
    pub fn uri(&self, descriptor: &RequestDescriptor) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(descriptor.target.trim_start_matches('/'))
            .map_err(|err| TransportError::InvalidTarget {
                target: descriptor.target.clone(),
                reason: err.to_string(),
            })?;

        if !descriptor.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&descriptor.params);
        }

        Ok(url)
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

impl Transport for HttpTransport {
    fn perform(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Response, TransportError>> {
        let client = self.client.clone();
        let url = self.uri(&request);
        let timeout = request.timeout.unwrap_or(self.timeout);

        async move {
            let mut builder = client.request(request.method.into(), url?).timeout(timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|err| classify(err, timeout))?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(|err| classify(err, timeout))?;

            Ok::<_, TransportError>(Response::new(status, body))
        }
        .boxed()
    }
}

/// Spawns onto the tokio runtime the caller is running in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawn for TokioSpawner {
    fn spawn_obj(&self, future: FutureObj<'static, ()>) -> Result<(), SpawnError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SpawnError::shutdown())?;
        runtime.spawn(future);
        Ok(())
    }
}

impl Dispatcher {
    /// A dispatcher over an [`HttpTransport`] with the configured retry
    /// policy and timer-based backoff. Its lane runs on tokio tasks, so
    /// requests are sent even if their handles are dropped.
    pub fn from_config(config: &DispatchConfig) -> Result<Self, TransportError> {
        let dispatcher = Self::with_rules(DispatchRules {
            transport: HttpTransport::new(config)?,
            sleep: futures_timer::Delay::new,
            policy: config.retry_policy(),
        });

        Ok(dispatcher.with_spawner(TokioSpawner))
    }
}
