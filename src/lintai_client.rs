use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::{
    error::TransportError,
    models::{JobId, JobKind, StartRequest, StartedJob},
    transport::{JobStarter, LastResultFetcher, ResultFetcher},
};

const STATUS_MARKER: &str = "\n__http_status:";

/// Talks to the lintai UI server through `curl`.
#[derive(Debug, Clone)]
pub struct LintaiClient {
    base_url: String,
    api_token: Option<String>,
    timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CurlResponse {
    status: u16,
    body: String,
}

#[derive(Debug, Clone, Default)]
struct CurlRequest {
    method: &'static str,
    url: String,
    form: Vec<(String, String)>,
}

impl LintaiClient {
    pub fn new(base_url: String, api_token: Option<String>, timeout_seconds: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            timeout_seconds,
        }
    }

    fn start_request(&self, kind: JobKind, request: &StartRequest) -> CurlRequest {
        let depth = request.depth.map(|d| d.to_string());
        match kind {
            JobKind::FindIssues => {
                let mut form = Vec::new();
                if let Some(depth) = depth {
                    form.push(("depth".to_string(), depth));
                }
                if let Some(level) = &request.log_level {
                    form.push(("log_level".to_string(), level.clone()));
                }
                CurlRequest {
                    method: "POST",
                    url: format!(
                        "{}/api/find-issues{}",
                        self.base_url,
                        query_string(&[("path", request.path.clone())])
                    ),
                    form,
                }
            }
            JobKind::CatalogAi => CurlRequest {
                method: "POST",
                url: format!(
                    "{}/api/catalog-ai{}",
                    self.base_url,
                    query_string(&[
                        ("path", request.path.clone()),
                        ("depth", depth),
                        ("log_level", request.log_level.clone()),
                    ])
                ),
                form: Vec::new(),
            },
        }
    }

    fn results_url(&self, job_id: &JobId) -> String {
        format!(
            "{}/api/results/{}",
            self.base_url,
            urlencoding::encode(job_id.as_str())
        )
    }

    fn last_result_url(&self, kind: JobKind) -> String {
        format!("{}/api/last-result/{}", self.base_url, kind)
    }

    async fn execute(&self, request: CurlRequest) -> Result<CurlResponse, TransportError> {
        let mut command = Command::new("curl");
        command
            .arg("-sS")
            .arg("-X")
            .arg(request.method)
            .arg(&request.url)
            .arg("--max-time")
            .arg(self.timeout_seconds.to_string())
            .arg("-H")
            .arg("Accept: application/json")
            .arg("-w")
            .arg(format!("{STATUS_MARKER}%{{http_code}}"));

        if let Some(token) = &self.api_token {
            command
                .arg("-H")
                .arg(format!("Authorization: Bearer {}", token));
        }

        for (name, value) in &request.form {
            command.arg("-F").arg(format!("{name}={value}"));
        }

        debug!(method = request.method, url = %request.url, "lintai request");
        let output = command.output().await.map_err(|err| {
            TransportError::Client(format!("failed to execute curl for {}: {err}", request.url))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(curl_failure(output.status.code(), stderr.trim()));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| TransportError::Decode("response was not valid UTF-8".to_string()))?;
        split_status(&stdout)
    }
}

#[async_trait]
impl ResultFetcher for LintaiClient {
    async fn fetch_result(&self, job_id: &JobId) -> Result<Value, TransportError> {
        let response = self
            .execute(CurlRequest {
                method: "GET",
                url: self.results_url(job_id),
                ..Default::default()
            })
            .await?;
        parse_json(ensure_success(response)?)
    }
}

#[async_trait]
impl LastResultFetcher for LintaiClient {
    async fn fetch_last_result(&self, kind: JobKind) -> Result<Option<Value>, TransportError> {
        let response = self
            .execute(CurlRequest {
                method: "GET",
                url: self.last_result_url(kind),
                ..Default::default()
            })
            .await?;
        if response.status == 404 {
            return Ok(None);
        }
        let value = parse_json(ensure_success(response)?)?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }
}

#[async_trait]
impl JobStarter for LintaiClient {
    async fn start_job(
        &self,
        kind: JobKind,
        request: &StartRequest,
    ) -> Result<StartedJob, TransportError> {
        let response = self.execute(self.start_request(kind, request)).await?;
        let value = parse_json(ensure_success(response)?)?;
        Ok(StartedJob {
            id: run_id(&value),
        })
    }
}

fn query_string(pairs: &[(&str, Option<String>)]) -> String {
    let encoded: Vec<String> = pairs
        .iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| format!("{name}={}", urlencoding::encode(v)))
        })
        .collect();
    if encoded.is_empty() {
        String::new()
    } else {
        format!("?{}", encoded.join("&"))
    }
}

/// Maps curl exit codes onto the transport taxonomy.
fn curl_failure(exit_code: Option<i32>, stderr: &str) -> TransportError {
    let detail = if stderr.is_empty() {
        format!("curl exited with {exit_code:?}")
    } else {
        stderr.to_string()
    };
    match exit_code {
        Some(28) => TransportError::Timeout(detail),
        Some(5 | 6 | 7 | 35 | 52 | 55 | 56) | None => TransportError::Network(detail),
        Some(_) => TransportError::Client(detail),
    }
}

fn split_status(stdout: &str) -> Result<CurlResponse, TransportError> {
    let (body, status) = stdout
        .rsplit_once(STATUS_MARKER)
        .ok_or_else(|| TransportError::Decode("missing HTTP status from curl".to_string()))?;
    let status = status
        .trim()
        .parse::<u16>()
        .map_err(|_| TransportError::Decode(format!("invalid HTTP status {status:?}")))?;
    if status == 0 {
        return Err(TransportError::Network("no HTTP response received".to_string()));
    }
    Ok(CurlResponse {
        status,
        body: body.to_string(),
    })
}

fn ensure_success(response: CurlResponse) -> Result<String, TransportError> {
    if response.status < 400 {
        return Ok(response.body);
    }
    let (code, message) = parse_error_body(&response.body);
    Err(TransportError::Http {
        status: response.status,
        code,
        message: message.unwrap_or_else(|| format!("HTTP {}", response.status)),
    })
}

fn parse_json(body: String) -> Result<Value, TransportError> {
    serde_json::from_str::<Value>(&body).map_err(|err| {
        TransportError::Decode(format!("{err}: {}", body.chars().take(200).collect::<String>()))
    })
}

/// Pulls an application error code and message out of an error body.
/// Handles `{"code", "message"}`, `{"error": {"code", "message"}}` and
/// FastAPI's `{"detail": ...}`.
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        let trimmed = body.trim();
        return (None, Some(trimmed.to_string()).filter(|t| !t.is_empty()));
    };

    let nested = value.get("error").filter(|e| e.is_object());
    let code = value
        .get("code")
        .or_else(|| nested.and_then(|e| e.get("code")))
        .and_then(scalar_to_string);
    let message = value
        .get("detail")
        .or_else(|| value.get("message"))
        .or_else(|| nested.and_then(|e| e.get("message")))
        .or_else(|| value.get("error").filter(|e| e.is_string()))
        .map(|m| match m {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        });
    (code, message)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn run_id(value: &Value) -> Option<JobId> {
    value
        .get("run_id")
        .or_else(|| value.get("id"))
        .and_then(scalar_to_string)
        .map(JobId::new)
}
