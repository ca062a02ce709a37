//! Song analysis: prompt, model call with retries and fallback, then JSON
//! extraction and normalization.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use thiserror::Error;

use crate::client::{GenerateRequest, GenerativeModel, ModelError};
use crate::extract::{extract_json, ExtractError};
use crate::input::AudioInput;
use crate::model::{AudioMetadata, NormalizeError, SongAnalysis};
use crate::prompt::build_prompt;
use crate::retry::{retry_with_backoff, RetryPolicy, Retryable, Sleeper, ThreadSleeper};

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Analysis failed: {0}")]
    Model(#[from] ModelError),
    #[error("Could not read the analysis: {0}")]
    Extract(#[from] ExtractError),
    #[error("Could not read the analysis: {0}")]
    Normalize(#[from] NormalizeError),
}

/// Sends audio to the model and turns the reply into a `SongAnalysis`.
///
/// The client is injected so the entry point owns its lifecycle and tests
/// can substitute a scripted one.
pub struct Analyzer<M, S = ThreadSleeper> {
    client: M,
    models: Vec<String>,
    policy: RetryPolicy,
    sleeper: S,
    json_mode: bool,
    show_progress: bool,
}

impl<M: GenerativeModel> Analyzer<M, ThreadSleeper> {
    pub fn new(client: M, primary_model: &str) -> Self {
        Self {
            client,
            models: vec![primary_model.to_string()],
            policy: RetryPolicy::default(),
            sleeper: ThreadSleeper,
            json_mode: true,
            show_progress: false,
        }
    }
}

impl<M: GenerativeModel, S: Sleeper> Analyzer<M, S> {
    /// Model to try once the primary is unavailable or out of retries.
    pub fn with_fallback(mut self, model: Option<&str>) -> Self {
        self.models.truncate(1);
        if let Some(m) = model.filter(|m| !m.is_empty() && *m != self.models[0]) {
            self.models.push(m.to_string());
        }
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> Analyzer<M, S2> {
        Analyzer {
            client: self.client,
            models: self.models,
            policy: self.policy,
            sleeper,
            json_mode: self.json_mode,
            show_progress: self.show_progress,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Run one analysis: prompt, call with retries and fallback, extract, normalize.
    pub fn analyze(
        &self,
        input: &AudioInput,
        metadata: &AudioMetadata,
    ) -> Result<SongAnalysis, AnalyzeError> {
        let prompt = build_prompt(input, metadata, self.json_mode);
        let request = GenerateRequest {
            prompt: &prompt,
            audio: input,
        };

        let pb = self.spinner();
        let mut last_error = None;

        for (i, model) in self.models.iter().enumerate() {
            pb.set_message(format!("Analyzing with {model}..."));
            let result = retry_with_backoff(&self.policy, &self.sleeper, |attempt| {
                log::info!("Requesting analysis from {model} (attempt {attempt})");
                self.client.generate(model, &request)
            });

            match result {
                Ok(text) => {
                    pb.finish_and_clear();
                    log::debug!("Model returned {} characters", text.len());
                    let value = extract_json(&text)?;
                    return Ok(SongAnalysis::from_value(&value, metadata.duration)?);
                }
                Err(e) if e.is_transient() || matches!(e, ModelError::ModelUnavailable(_)) => {
                    if let Some(next) = self.models.get(i + 1) {
                        log::warn!("{model} failed ({e}); falling back to {next}");
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    pb.finish_and_clear();
                    return Err(e.into());
                }
            }
        }

        pb.finish_and_clear();
        Err(last_error
            .unwrap_or_else(|| ModelError::Fatal("no model configured".into()))
            .into())
    }

    fn spinner(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}
