//! TAP endpoint connection and query submission
//!
//! A `TapConnection` holds the validated base URL and connection parameters
//! for one TAP service. Construction is lazy: no network round trip happens
//! until a query is submitted. All per-connection configuration arrives
//! through `ConnectOptions`; nothing process-global is read or mutated.

use super::error::{Result, TapError};
use super::job::{QueryJob, QueryMode};
use super::table::ResultTable;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Tabular response format negotiated with the service at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Csv,
}

impl ResponseFormat {
    /// Value for the TAP FORMAT parameter
    pub fn as_tap_param(&self) -> &'static str {
        match self {
            ResponseFormat::Csv => "csv",
        }
    }
}

/// Connection configuration passed into `TapConnection::connect`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Override TLS use; default is inferred from the URL scheme
    #[serde(default)]
    pub use_https: Option<bool>,

    /// Override the port from the URL
    #[serde(default)]
    pub port: Option<u16>,

    /// Per-request timeout; no timeout is enforced by default. Expiry
    /// surfaces as a connection error with a timeout reason.
    #[serde(default)]
    pub timeout: Option<Duration>,

    /// Response format requested from the service
    #[serde(default)]
    pub format: ResponseFormat,
}

/// A reachable TAP endpoint. Parameters are read-only after construction,
/// so one connection can be shared across callers submitting independent
/// jobs.
#[derive(Debug, Clone)]
pub struct TapConnection {
    base_url: Url,
    host: String,
    port: u16,
    use_https: bool,
    format: ResponseFormat,
    http: reqwest::Client,
}

impl TapConnection {
    /// Validate the service URL and build a connection.
    ///
    /// The URL must carry an http or https scheme and a host; anything else
    /// fails with `InvalidEndpoint`. No network I/O happens here.
    pub fn connect(service_url: &str, options: ConnectOptions) -> Result<TapConnection> {
        let invalid = |reason: String| TapError::InvalidEndpoint {
            url: service_url.to_string(),
            reason,
        };

        let mut base_url = Url::parse(service_url).map_err(|e| invalid(e.to_string()))?;

        match base_url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }

        let host = base_url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .to_string();

        let use_https = options
            .use_https
            .unwrap_or(base_url.scheme() == "https");
        if use_https != (base_url.scheme() == "https") {
            let scheme = if use_https { "https" } else { "http" };
            base_url
                .set_scheme(scheme)
                .map_err(|_| invalid(format!("cannot apply scheme '{}'", scheme)))?;
        }

        if let Some(port) = options.port {
            base_url
                .set_port(Some(port))
                .map_err(|_| invalid(format!("cannot apply port {}", port)))?;
        }
        let port = base_url
            .port_or_known_default()
            .unwrap_or(if use_https { 443 } else { 80 });

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| TapError::Connection {
            reason: format!("failed to build HTTP client: {}", e),
        })?;

        debug!("TAP connection ready for {}", base_url);

        Ok(TapConnection {
            base_url,
            host,
            port,
            use_https,
            format: options.format,
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn use_https(&self) -> bool {
        self.use_https
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    /// Submit an ADQL query.
    ///
    /// Sync mode blocks (one awaited round trip) until the service returns
    /// a complete result or an error; the returned job is already terminal.
    /// Async mode creates a UWS job and returns immediately; the caller
    /// drives it with `QueryJob::poll`.
    pub async fn submit_query(&self, adql: &str, mode: QueryMode) -> Result<QueryJob> {
        if adql.trim().is_empty() {
            return Err(TapError::InvalidArgument("query text is empty".into()));
        }
        match mode {
            QueryMode::Sync => self.submit_sync(adql).await,
            QueryMode::Async => self.submit_async(adql).await,
        }
    }

    /// Convenience wrapper for the common blocking case
    pub async fn submit_query_sync(&self, adql: &str) -> Result<QueryJob> {
        self.submit_query(adql, QueryMode::Sync).await
    }

    async fn submit_sync(&self, adql: &str) -> Result<QueryJob> {
        let endpoint = self.endpoint("sync")?;
        debug!("submitting sync query to {}", endpoint);

        let params = self.query_params(adql);
        let response = self
            .http
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(classify_service_error(status.as_u16(), &body));
        }
        // Some services answer 200 with an in-band TAP error document
        if let Some(diagnostic) = tap_error_diagnostic(&body) {
            return Err(TapError::MalformedQuery(diagnostic));
        }

        let table = ResultTable::from_csv(body.as_bytes())?;
        Ok(QueryJob::completed(adql.to_string(), table))
    }

    async fn submit_async(&self, adql: &str) -> Result<QueryJob> {
        let endpoint = self.endpoint("async")?;
        debug!("creating async job at {}", endpoint);

        let mut params = self.query_params(adql);
        params.push(("PHASE", "RUN"));

        let response = self
            .http
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        // UWS answers job creation with a redirect to the job resource;
        // after following it, the response URL is the job URL.
        let job_url = response.url().clone();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(classify_service_error(status.as_u16(), &body));
        }

        debug!("async job created at {}", job_url);
        Ok(QueryJob::submitted(
            adql.to_string(),
            job_url,
            self.http.clone(),
        ))
    }

    fn query_params<'a>(&self, adql: &'a str) -> Vec<(&'static str, &'a str)> {
        vec![
            ("REQUEST", "doQuery"),
            ("LANG", "ADQL"),
            ("QUERY", adql),
            ("FORMAT", self.format.as_tap_param()),
        ]
    }

    fn endpoint(&self, suffix: &str) -> Result<Url> {
        join_url(&self.base_url, suffix)
    }
}

/// Append path segments to a URL, tolerating a trailing slash and keeping
/// any query string in place (registry access URLs carry one).
pub(crate) fn join_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| TapError::Other(format!("cannot extend URL '{}'", base)))?;
        segments.pop_if_empty();
        for segment in suffix.split('/') {
            segments.push(segment);
        }
    }
    Ok(url)
}

/// Map a reqwest transport failure onto the connection-error category
pub(crate) fn map_transport_error(err: reqwest::Error) -> TapError {
    let reason = if err.is_timeout() {
        format!("timeout: {}", err)
    } else if err.is_connect() {
        format!("network unreachable: {}", err)
    } else {
        err.to_string()
    };
    TapError::Connection { reason }
}

/// Classify a non-2xx response: a TAP error document means the service
/// rejected the query text; anything else is a generic service error.
pub(crate) fn classify_service_error(status: u16, body: &str) -> TapError {
    if let Some(diagnostic) = tap_error_diagnostic(body) {
        return TapError::MalformedQuery(diagnostic);
    }
    let message = if body.trim().is_empty() {
        "no response body".to_string()
    } else {
        truncate(body.trim(), 500)
    };
    TapError::Service { status, message }
}

/// Pull the human-readable diagnostic out of a TAP error document.
///
/// Query failures arrive as a VOTable whose INFO element has
/// name="QUERY_STATUS" and value="ERROR", with the diagnostic as element
/// text. Only that text is needed, so the document is scanned rather than
/// fully parsed.
pub(crate) fn tap_error_diagnostic(body: &str) -> Option<String> {
    let marker = body.find("QUERY_STATUS")?;
    let tail = &body[marker..];
    let tag_end = tail.find('>')?;
    if !tail[..tag_end].contains("ERROR") {
        return None;
    }
    let text = &tail[tag_end + 1..];
    let close = text.find("</INFO>")?;
    let diagnostic = text[..close].trim();
    if diagnostic.is_empty() {
        None
    } else {
        Some(diagnostic.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
