//! Instance metadata service client.
//!
//! Speaks the EC2 instance metadata protocol: a session token is requested
//! first (IMDSv2) and the client falls back to plain token-less requests when
//! the endpoint does not issue tokens.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use tracing::debug;

use crate::error::ProviderError;

/// Link-local address of the metadata service.
pub const DEFAULT_ENDPOINT: &str = "http://169.254.169.254";

/// Key holding the calling instance's id.
pub const INSTANCE_ID_KEY: &str = "instance-id";

const TOKEN_PATH: &str = "/latest/api/token";
const METADATA_PATH: &str = "/latest/meta-data/";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_TTL_SECONDS: &str = "21600";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Key-based access to instance metadata.
pub trait MetadataSource {
    /// Fetches the value stored under `key` (e.g. `instance-id`).
    fn get(&self, key: &str) -> Result<String, ProviderError>;

    /// Checks whether the source answers at all, returning the instance id.
    fn probe(&self) -> Result<String, ProviderError> {
        self.get(INSTANCE_ID_KEY)
    }
}

/// HTTP client for the metadata service.
pub struct ImdsClient {
    endpoint: String,
    agent: ureq::Agent,
    token: RefCell<Option<String>>,
    tokenless: Cell<bool>,
}

impl ImdsClient {
    /// Creates a client for `endpoint` (scheme and host, no trailing path).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    /// Creates a client whose requests give up after `timeout`.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout.min(CONNECT_TIMEOUT))
            .timeout(timeout)
            .build();

        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            agent,
            token: RefCell::new(None),
            tokenless: Cell::new(false),
        }
    }

    /// Returns the session token, fetching it on first use.
    ///
    /// `None` means the endpoint only serves token-less requests.
    fn session_token(&self) -> Result<Option<String>, ProviderError> {
        if let Some(token) = self.token.borrow().as_ref() {
            return Ok(Some(token.clone()));
        }
        if self.tokenless.get() {
            return Ok(None);
        }

        let url = format!("{}{}", self.endpoint, TOKEN_PATH);
        match self
            .agent
            .put(&url)
            .set(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .call()
        {
            Ok(response) => {
                let token = response
                    .into_string()
                    .map_err(|e| ProviderError::new(format!("failed to read token: {}", e)))?;
                *self.token.borrow_mut() = Some(token.clone());
                Ok(Some(token))
            }
            Err(ureq::Error::Status(code @ (403 | 404 | 405), _)) => {
                debug!("Metadata token endpoint answered {}, using token-less requests", code);
                self.tokenless.set(true);
                Ok(None)
            }
            // The token response can be dropped by the hop limit (e.g. inside
            // a container) while plain requests still get through.
            Err(ureq::Error::Transport(transport)) => {
                debug!("Metadata token request failed ({}), using token-less requests", transport);
                self.tokenless.set(true);
                Ok(None)
            }
            Err(err) => Err(provider_error(err)),
        }
    }
}

impl MetadataSource for ImdsClient {
    fn get(&self, key: &str) -> Result<String, ProviderError> {
        let url = format!("{}{}{}", self.endpoint, METADATA_PATH, key);
        let mut request = self.agent.get(&url);
        if let Some(token) = self.session_token()? {
            request = request.set(TOKEN_HEADER, &token);
        }

        let response = request.call().map_err(provider_error)?;
        response
            .into_string()
            .map(|value| value.trim().to_string())
            .map_err(|e| ProviderError::new(format!("failed to read '{}': {}", key, e)))
    }
}

fn provider_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(code, response) => {
            let status = response.status_text().to_string();
            ProviderError::with_code(code.to_string(), status)
        }
        ureq::Error::Transport(transport) => ProviderError::new(transport.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread::JoinHandle;

    /// In-memory metadata source.
    #[derive(Default)]
    pub(crate) struct FakeMetadata {
        pub(crate) values: HashMap<String, String>,
        pub(crate) unreachable: bool,
        pub(crate) lookups: RefCell<Vec<String>>,
    }

    impl FakeMetadata {
        pub(crate) fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                values: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl MetadataSource for FakeMetadata {
        fn get(&self, key: &str) -> Result<String, ProviderError> {
            self.lookups.borrow_mut().push(key.to_string());
            if self.unreachable {
                return Err(ProviderError::new("connection refused"));
            }
            self.values
                .get(key)
                .cloned()
                .ok_or_else(|| ProviderError::with_code("404", "Not Found"))
        }
    }

    /// Serves `requests` requests on a loopback port with `handler`.
    fn serve<F>(requests: usize, handler: F) -> (String, JoinHandle<()>)
    where
        F: Fn(&tiny_http::Request) -> (u16, String) + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let handle = std::thread::spawn(move || {
            for _ in 0..requests {
                let request = server.recv().unwrap();
                let (status, body) = handler(&request);
                request
                    .respond(tiny_http::Response::from_string(body).with_status_code(status))
                    .unwrap();
            }
        });
        (format!("http://127.0.0.1:{}", port), handle)
    }

    fn header(request: &tiny_http::Request, name: &str) -> Option<String> {
        request
            .headers()
            .iter()
            .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str().to_string())
    }

    #[test]
    fn test_token_is_fetched_once_and_sent() {
        let (endpoint, handle) = serve(3, |request| {
            match (request.method(), request.url()) {
                (tiny_http::Method::Put, TOKEN_PATH) => {
                    assert_eq!(header(request, TOKEN_TTL_HEADER).as_deref(), Some("21600"));
                    (200, "session-token".to_string())
                }
                (tiny_http::Method::Get, "/latest/meta-data/instance-id") => {
                    assert_eq!(
                        header(request, TOKEN_HEADER).as_deref(),
                        Some("session-token")
                    );
                    (200, "i-0123456789abcdef0".to_string())
                }
                (tiny_http::Method::Get, "/latest/meta-data/placement/availability-zone") => {
                    (200, "eu-west-1b\n".to_string())
                }
                other => panic!("unexpected request: {:?}", other),
            }
        });

        let client = ImdsClient::new(endpoint);
        assert_eq!(client.get("instance-id").unwrap(), "i-0123456789abcdef0");
        assert_eq!(
            client.get("placement/availability-zone").unwrap(),
            "eu-west-1b"
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_falls_back_to_tokenless_requests() {
        let (endpoint, handle) = serve(2, |request| match request.method() {
            tiny_http::Method::Put => (405, String::new()),
            _ => {
                assert!(header(request, TOKEN_HEADER).is_none());
                (200, "i-legacy".to_string())
            }
        });

        let client = ImdsClient::new(endpoint);
        assert_eq!(client.get("instance-id").unwrap(), "i-legacy");
        handle.join().unwrap();
    }

    #[test]
    fn test_unanswered_token_request_falls_back() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let handle = std::thread::spawn(move || {
            // Hold the token request open so the client times out on it.
            let stalled = server.recv().unwrap();
            assert!(matches!(stalled.method(), tiny_http::Method::Put));

            let request = server.recv().unwrap();
            assert_eq!(request.url(), "/latest/meta-data/instance-id");
            assert!(header(&request, TOKEN_HEADER).is_none());
            request
                .respond(tiny_http::Response::from_string("i-container"))
                .unwrap();
            drop(stalled);
        });

        let client = ImdsClient::with_timeout(
            format!("http://127.0.0.1:{}", port),
            Duration::from_millis(300),
        );
        assert_eq!(client.probe().unwrap(), "i-container");
        assert!(client.tokenless.get());
        handle.join().unwrap();
    }

    #[test]
    fn test_missing_key_reports_status() {
        let (endpoint, handle) = serve(2, |request| match request.method() {
            tiny_http::Method::Put => (200, "tok".to_string()),
            _ => (404, "Not Found".to_string()),
        });

        let client = ImdsClient::new(endpoint);
        let err = client.get("placement/availability-zone").unwrap_err();
        assert_eq!(err.code.as_deref(), Some("404"));
        handle.join().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint() {
        let client = ImdsClient::new("http://127.0.0.1:1");
        let err = client.probe().unwrap_err();
        assert!(err.code.is_none());
    }
}
