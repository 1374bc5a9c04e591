use anyhow::{Context, Result};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::api::QualityGate;
use crate::services::{
    AngleModel, ExercisePredictor, GatewaySettings, HttpPredictor, ProcessPredictor,
    SessionSettings,
};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// When set the classifier is called over HTTP instead of as a subprocess
    pub predictor_url: Option<String>,
    pub predictor_command: String,
    pub predictor_script: String,
    pub frame_prediction_timeout: Duration,
    pub sequence_prediction_timeout: Duration,
    pub classifier_window: usize,
    pub angle_model: AngleModel,
    pub form_rules_path: Option<PathBuf>,
    pub far_from_ideal_ratio: f64,
    pub motion_gain: f64,
    pub reps_per_set: u32,
    pub session_history_limit: usize,
    /// JSON-file session store; sessions live in memory when unset
    pub session_store_dir: Option<PathBuf>,
    pub session_retention: Duration,
    pub session_idle_expiry: Duration,
    pub cleanup_schedule: String,
    pub quality_gate: QualityGate,
}

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let classifier_window: usize = parse(&lookup, "CLASSIFIER_WINDOW", "20")?;
        if classifier_window == 0 {
            anyhow::bail!("CLASSIFIER_WINDOW must be at least 1");
        }

        let angle_model = string("ANGLE_MODEL", "geometric")
            .parse::<AngleModel>()
            .map_err(anyhow::Error::msg)
            .context("Invalid value for ANGLE_MODEL")?;

        Ok(AppConfig {
            host: string("HOST", "0.0.0.0"),
            port: parse(&lookup, "PORT", "3000")?,
            log_level: string("LOG_LEVEL", "info"),
            predictor_url: optional("PREDICTOR_URL"),
            predictor_command: string("PREDICTOR_COMMAND", "python3"),
            predictor_script: string("PREDICTOR_SCRIPT", "resources/python/predict.py"),
            frame_prediction_timeout: Duration::from_millis(parse(
                &lookup,
                "FRAME_PREDICTION_TIMEOUT_MS",
                "3000",
            )?),
            sequence_prediction_timeout: Duration::from_secs(parse(
                &lookup,
                "SEQUENCE_PREDICTION_TIMEOUT_SECS",
                "30",
            )?),
            classifier_window,
            angle_model,
            form_rules_path: optional("FORM_RULES_PATH").map(PathBuf::from),
            far_from_ideal_ratio: parse(&lookup, "FAR_FROM_IDEAL_RATIO", "0.5")?,
            motion_gain: parse(&lookup, "MOTION_GAIN", "10.0")?,
            reps_per_set: parse(&lookup, "REPS_PER_SET", "10")?,
            session_history_limit: parse(&lookup, "SESSION_HISTORY_LIMIT", "50")?,
            session_store_dir: optional("SESSION_STORE_DIR").map(PathBuf::from),
            session_retention: Duration::from_secs(parse(&lookup, "SESSION_RETENTION_SECS", "3600")?),
            session_idle_expiry: Duration::from_secs(parse(
                &lookup,
                "SESSION_IDLE_EXPIRY_SECS",
                "3600",
            )?),
            cleanup_schedule: string("CLEANUP_SCHEDULE", "0 */10 * * * *"),
            quality_gate: QualityGate {
                min_success_rate: parse(&lookup, "QUALITY_MIN_SUCCESS_RATE", "30")?,
                min_correct_exercise_rate: parse(&lookup, "QUALITY_MIN_CORRECT_EXERCISE_RATE", "40")?,
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            frame_timeout: self.frame_prediction_timeout,
            sequence_timeout: self.sequence_prediction_timeout,
            window_size: self.classifier_window,
        }
    }

    pub fn session_settings(&self) -> Result<SessionSettings> {
        Ok(SessionSettings {
            history_limit: self.session_history_limit,
            reps_per_set: self.reps_per_set,
            window_size: self.classifier_window.saturating_sub(1).max(1),
            retention: chrono::Duration::from_std(self.session_retention)
                .context("SESSION_RETENTION_SECS is out of range")?,
            idle_expiry: chrono::Duration::from_std(self.session_idle_expiry)
                .context("SESSION_IDLE_EXPIRY_SECS is out of range")?,
        })
    }

    /// Classifier transport selected by the configuration
    pub fn build_predictor(&self) -> Result<Arc<dyn ExercisePredictor>> {
        match &self.predictor_url {
            Some(url) => {
                let predictor = HttpPredictor::new(url.clone(), self.sequence_prediction_timeout)?;
                Ok(Arc::new(predictor))
            }
            None => Ok(Arc::new(ProcessPredictor::new(
                self.predictor_command.clone(),
                vec![self.predictor_script.clone()],
            ))),
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e: T::Err| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e))
}
