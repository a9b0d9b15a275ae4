//! Query job lifecycle
//!
//! A `QueryJob` tracks one submitted query from submission to a terminal
//! state. Sync jobs are born terminal: the blocking submission collapses
//! pending/running, so callers only ever observe completed (or an error
//! from the submission itself). Async jobs follow the UWS lifecycle and
//! are driven by caller-side polling; nothing pushes state at the caller.

use super::connection::{classify_service_error, join_url, map_transport_error, tap_error_diagnostic};
use super::error::{Result, TapError};
use super::table::ResultTable;
use log::debug;
use std::fmt;
use url::Url;

/// Query execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// One blocking round trip; the job returns in a terminal state
    #[default]
    Sync,
    /// UWS job creation; the caller polls for completion
    Async,
}

/// Job lifecycle states. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One submitted query and its (eventual) result.
///
/// The job exclusively owns its `ResultTable` once completed; repeated
/// `get_results` calls return the same parsed table.
#[derive(Debug)]
pub struct QueryJob {
    query_text: String,
    mode: QueryMode,
    state: JobState,
    result: Option<ResultTable>,
    error_text: Option<String>,
    job_url: Option<Url>,
    http: Option<reqwest::Client>,
}

impl QueryJob {
    /// Terminal job produced by a successful sync submission
    pub(crate) fn completed(query_text: String, result: ResultTable) -> Self {
        QueryJob {
            query_text,
            mode: QueryMode::Sync,
            state: JobState::Completed,
            result: Some(result),
            error_text: None,
            job_url: None,
            http: None,
        }
    }

    /// Freshly created async job; the job URL is its polling identifier
    pub(crate) fn submitted(query_text: String, job_url: Url, http: reqwest::Client) -> Self {
        QueryJob {
            query_text,
            mode: QueryMode::Async,
            state: JobState::Pending,
            result: None,
            error_text: None,
            job_url: Some(job_url),
            http: Some(http),
        }
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// UWS job resource URL; `None` for sync jobs
    pub fn job_url(&self) -> Option<&Url> {
        self.job_url.as_ref()
    }

    /// Observe the remote job phase and advance the state machine.
    ///
    /// Pull model: each call makes one phase request. On a COMPLETED phase
    /// the result document is fetched and parsed; on ERROR the service
    /// diagnostic is fetched. Polling a terminal job is a no-op returning
    /// the current state.
    pub async fn poll(&mut self) -> Result<JobState> {
        if self.mode == QueryMode::Sync || self.state.is_terminal() {
            return Ok(self.state);
        }

        let phase = self.fetch_text("phase").await?;
        let phase = phase.trim();
        debug!("job {:?} phase: {}", self.job_url.as_ref().map(Url::as_str), phase);

        match phase {
            "PENDING" | "QUEUED" | "HELD" | "SUSPENDED" => self.state = JobState::Pending,
            "EXECUTING" | "UNKNOWN" => self.state = JobState::Running,
            "COMPLETED" => {
                let body = self.fetch_text("results/result").await?;
                let table = ResultTable::from_csv(body.as_bytes())?;
                self.result = Some(table);
                self.state = JobState::Completed;
            }
            "ERROR" => {
                let body = self
                    .fetch_text("error")
                    .await
                    .unwrap_or_else(|e| format!("error document unavailable: {}", e));
                self.error_text =
                    Some(tap_error_diagnostic(&body).unwrap_or_else(|| body.trim().to_string()));
                self.state = JobState::Failed;
            }
            "ABORTED" => self.state = JobState::Cancelled,
            other => {
                return Err(TapError::Other(format!("unexpected UWS phase '{}'", other)));
            }
        }

        Ok(self.state)
    }

    /// Request cancellation of a pending or running job.
    ///
    /// Cancelling a job already in a terminal state fails with
    /// `AlreadyTerminal`.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(TapError::AlreadyTerminal {
                state: self.state.to_string(),
            });
        }

        let url = self.job_resource("phase")?;
        let http = self.http_client()?;
        let response = http
            .post(url)
            .form(&[("PHASE", "ABORT")])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.map_err(map_transport_error)?;
            return Err(classify_service_error(status.as_u16(), &body));
        }

        self.state = JobState::Cancelled;
        Ok(())
    }

    /// Parsed results; valid only once the job has completed
    pub fn get_results(&self) -> Result<&ResultTable> {
        if self.state != JobState::Completed {
            return Err(TapError::JobNotComplete {
                state: self.state.to_string(),
            });
        }
        self.result
            .as_ref()
            .ok_or_else(|| TapError::Other("completed job has no result".into()))
    }

    /// Service-reported diagnostic; valid only in the failed state
    pub fn get_error(&self) -> Result<&str> {
        if self.state != JobState::Failed {
            return Err(TapError::JobNotComplete {
                state: self.state.to_string(),
            });
        }
        self.error_text
            .as_deref()
            .ok_or_else(|| TapError::Other("failed job has no error text".into()))
    }

    fn job_resource(&self, suffix: &str) -> Result<Url> {
        let base = self
            .job_url
            .as_ref()
            .ok_or_else(|| TapError::Other("job has no job URL".into()))?;
        join_url(base, suffix)
    }

    fn http_client(&self) -> Result<&reqwest::Client> {
        self.http
            .as_ref()
            .ok_or_else(|| TapError::Other("job has no HTTP client".into()))
    }

    async fn fetch_text(&self, suffix: &str) -> Result<String> {
        let url = self.job_resource(suffix)?;
        let response = self
            .http_client()?
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(classify_service_error(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tap::table::{Column, ColumnType, ResultTable, Value};

    fn completed_job() -> QueryJob {
        let table = ResultTable::new(
            vec![Column::new("s_ra", ColumnType::Float)],
            vec![vec![Value::Float(16.0)]],
        )
        .unwrap();
        QueryJob::completed("SELECT s_ra FROM ivoa.Obscore".to_string(), table)
    }

    fn pending_job() -> QueryJob {
        QueryJob::submitted(
            "SELECT s_ra FROM ivoa.Obscore".to_string(),
            Url::parse("http://example.org/tap/async/1").unwrap(),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_sync_job_is_born_completed() {
        let job = completed_job();
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.mode(), QueryMode::Sync);
        assert!(job.job_url().is_none());
    }

    #[test]
    fn test_get_results_deterministic() {
        let job = completed_job();
        let first = job.get_results().unwrap().clone();
        let second = job.get_results().unwrap();
        assert_eq!(&first, second);
    }

    #[test]
    fn test_get_results_on_pending_job() {
        let job = pending_job();
        let err = job.get_results().unwrap_err();
        match err {
            TapError::JobNotComplete { state } => assert_eq!(state, "pending"),
            other => panic!("expected JobNotComplete, got {:?}", other),
        }
    }

    #[test]
    fn test_get_error_only_when_failed() {
        let mut job = pending_job();
        assert!(matches!(
            job.get_error(),
            Err(TapError::JobNotComplete { .. })
        ));

        job.state = JobState::Failed;
        job.error_text = Some("syntax error".to_string());
        assert_eq!(job.get_error().unwrap(), "syntax error");
        assert!(matches!(
            job.get_results(),
            Err(TapError::JobNotComplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_on_terminal_job() {
        let mut job = completed_job();
        let err = job.cancel().await.unwrap_err();
        match err {
            TapError::AlreadyTerminal { state } => assert_eq!(state, "completed"),
            other => panic!("expected AlreadyTerminal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_is_noop_for_sync_job() {
        let mut job = completed_job();
        assert_eq!(job.poll().await.unwrap(), JobState::Completed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }
}
