//! Talking to the remote distribution service.

use std::{thread, time::Duration};

use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
    StatusCode,
};
use tracing::{debug, warn};

use crate::errors::GribArchiveErr;

/// A fully qualified request for one artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteRequest {
    url: String,
}

impl RemoteRequest {
    /// Wrap a URL.
    pub fn new(url: String) -> Self {
        RemoteRequest { url }
    }

    /// The URL to request.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Result of asking the remote service for one artifact.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoteResponse {
    /// The artifact's bytes.
    Available(Vec<u8>),
    /// The service does not publish this artifact, yet or at all.
    NotAvailable,
    /// Network, timeout, or server failure. Worth trying again later.
    TransientFailure(String),
}

/// A source of artifacts.
pub trait RemoteSource: Send + Sync {
    /// Make the request, including any retrying, and classify the result.
    fn fetch(&self, request: &RemoteRequest) -> RemoteResponse;
}

/// Client for the NOMADS GRIB filter service, or anything that answers plain HTTP GETs.
#[derive(Clone, Debug)]
pub struct NomadsClient {
    client: Client,
    retries: u32,
    backoff: Duration,
}

impl NomadsClient {
    const BASE_DELAY_MS: u64 = 500;

    /// Create a client with a per request timeout and a number of retries for transient failures.
    pub fn new(timeout: Duration, retries: u32) -> Result<Self, GribArchiveErr> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gribdn/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|_| GribArchiveErr::LogicError("invalid user agent"))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(NomadsClient {
            client,
            retries,
            backoff: Duration::from_millis(Self::BASE_DELAY_MS),
        })
    }

    fn attempt(&self, request: &RemoteRequest) -> RemoteResponse {
        let response = match self.client.get(request.url()).send() {
            Ok(response) => response,
            Err(err) => return RemoteResponse::TransientFailure(err.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return match response.bytes() {
                Ok(bytes) if bytes.is_empty() => RemoteResponse::NotAvailable,
                Ok(bytes) => RemoteResponse::Available(bytes.to_vec()),
                Err(err) => RemoteResponse::TransientFailure(err.to_string()),
            };
        }

        classify_status(status)
    }
}

impl RemoteSource for NomadsClient {
    fn fetch(&self, request: &RemoteRequest) -> RemoteResponse {
        with_retries(request, self.retries, self.backoff, || self.attempt(request))
    }
}

/// Call `attempt` until it gives something other than a transient failure, at most `retries`
/// extra times, sleeping a linearly growing `backoff` in between.
fn with_retries<F>(
    request: &RemoteRequest,
    retries: u32,
    backoff: Duration,
    mut attempt: F,
) -> RemoteResponse
where
    F: FnMut() -> RemoteResponse,
{
    let mut retried = 0;
    loop {
        match attempt() {
            RemoteResponse::TransientFailure(msg) if retried < retries => {
                retried += 1;
                warn!(url = request.url(), attempt = retried, %msg, "retrying transient failure");
                thread::sleep(backoff * retried);
            }
            response => {
                debug!(url = request.url(), attempts = retried + 1, "request finished");
                return response;
            }
        }
    }
}

fn classify_status(status: StatusCode) -> RemoteResponse {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteResponse::TransientFailure(format!("http status {}", status))
        }
        s if s.is_server_error() => {
            RemoteResponse::TransientFailure(format!("http status {}", status))
        }
        _ => RemoteResponse::NotAvailable,
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
