use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use super::classifier_gateway::{
    ClassifierError, ExercisePredictor, PredictionRequest, PredictionResponse,
};

/// Classifier run as a child process: JSON request on stdin, JSON response on stdout
#[derive(Debug, Clone)]
pub struct ProcessPredictor {
    program: String,
    args: Vec<String>,
}

impl ProcessPredictor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl ExercisePredictor for ProcessPredictor {
    async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ClassifierError::InvalidRequest(e.to_string()))?;

        // kill_on_drop so a timed-out call does not leave the child running
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClassifierError::Unavailable(format!("failed to start {}: {}", self.program, e)))?;

        // Feed stdin while stdout is drained; a child that answers before
        // reading its whole request must not block on a full pipe
        let stdin = child.stdin.take();
        let write_request = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write_request, child.wait_with_output());

        let output =
            output.map_err(|e| ClassifierError::Unavailable(format!("failed to read output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Classifier process exited with {}: {}", output.status, stderr.trim());
            return Err(ClassifierError::Failed(format!("exited with {}", output.status)));
        }
        written.map_err(|e| ClassifierError::Unavailable(format!("failed to write request: {}", e)))?;

        debug!("Classifier process returned {} bytes", output.stdout.len());
        serde_json::from_slice(&output.stdout).map_err(|e| ClassifierError::Malformed(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("process:{} {}", self.program, self.args.join(" "))
            .trim_end()
            .to_string()
    }
}

/// Classifier served over HTTP, request and response as JSON bodies
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    client: Client,
    endpoint: String,
}

impl HttpPredictor {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ExercisePredictor for HttpPredictor {
    async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, ClassifierError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Classifier endpoint returned {}: {}", status, error_text);
            return Err(ClassifierError::Failed(format!("HTTP {}", status)));
        }

        response
            .json::<PredictionResponse>()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("http:{}", self.endpoint)
    }
}
