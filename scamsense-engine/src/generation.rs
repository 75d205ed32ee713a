//! Generation gateway: asks an external text generator for a scenario
//! document and retries transient failures with bounded exponential backoff.
//!
//! The gateway never trusts what comes back. Output is handed to
//! [`normalize_str`](crate::normalize::normalize_str) like any other document.
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::RetryPolicy;
use crate::constants::{LOG_TARGET_GENERATION, MAX_OPTIONS, MAX_STEPS};
use crate::normalize::{Normalized, ValidationError, normalize_str};

/// Language the generated scenario should be written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Id,
}

impl Locale {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Self::En),
            "id" | "indonesian" | "bahasa" => Some(Self::Id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Id => "id",
        }
    }

    const fn language(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Id => "Indonesian (Bahasa Indonesia)",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub topic: String,
    #[serde(default)]
    pub locale: Locale,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(topic: impl Into<String>, locale: Locale) -> Self {
        Self {
            topic: topic.into(),
            locale,
        }
    }

    /// Instructions sent to the generator for this request.
    #[must_use]
    pub fn prompt(&self) -> String {
        build_prompt(self)
    }
}

/// Describe the wire format and limits the normalizer enforces anyway, so a
/// well-behaved generator needs no repairs.
#[must_use]
pub fn build_prompt(request: &GenerationRequest) -> String {
    let topic = request.topic.trim();
    let language = request.locale.language();
    format!(
        "Write an interactive social-engineering awareness scenario about: {topic}.\n\
         Write all player-facing text in {language}.\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"title\": string, \"completionSummary\": string, \"steps\": [step, ...]}}\n\
         Each step: {{\"id\": string, \"kind\": \"information\" | \"question\" | \"decision\", \
         \"channel\": \"sms\" | \"call\" | \"email\" | \"chat\" | \"web\", \"sender\": string, \
         \"narrative\": string, \"options\": [option, ...], \"nextStepId\": string}}\n\
         Each option: {{\"id\": string, \"label\": string, \
         \"outcomeType\": \"safe\" | \"risky\" | \"dangerous\", \"nextStepId\": string, \
         \"feedback\": string}}\n\
         Rules:\n\
         - At most {MAX_STEPS} steps; the first step is where play starts.\n\
         - Information steps have no options and may continue with nextStepId.\n\
         - Question and decision steps have 2 to {MAX_OPTIONS} options.\n\
         - nextStepId names another step's id, or \"end\" to finish the scenario.\n\
         - Every question or decision offers at least one safe option.\n\
         - feedback explains in one or two sentences why the choice was safe or not."
    )
}

/// Failure classes worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    RateLimited,
    ServerError,
    Timeout,
    ConnectionReset,
}

impl TransientKind {
    /// Recognize a transient failure from backend error text.
    #[must_use]
    pub fn classify(message: &str) -> Option<Self> {
        let lower = message.to_ascii_lowercase();
        if lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("too many requests")
            || has_status_token(&lower, |code| code == 429)
        {
            Some(Self::RateLimited)
        } else if lower.contains("server error")
            || lower.contains("service unavailable")
            || has_status_token(&lower, |code| (500..600).contains(&code))
        {
            Some(Self::ServerError)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Some(Self::Timeout)
        } else if lower.contains("connection reset") || lower.contains("econnreset") {
            Some(Self::ConnectionReset)
        } else {
            None
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
            Self::ServerError => write!(f, "server error"),
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionReset => write!(f, "connection reset"),
        }
    }
}

fn has_status_token(text: &str, matches: impl Fn(u16) -> bool) -> bool {
    text.split(|ch: char| !ch.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .any(matches)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator {kind}: {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },
    #[error("generator failed: {0}")]
    Fatal(String),
    #[error("generator did not answer within {0:?}")]
    Timeout(Duration),
    #[error("generation failed after {attempts} attempts; last error: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("generation cancelled")]
    Cancelled,
    #[error("generated document rejected: {0}")]
    Invalid(#[from] ValidationError),
}

impl GenerationError {
    /// Transient when the text names a known transient condition, else fatal.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        match TransientKind::classify(&message) {
            Some(kind) => Self::Transient { kind, message },
            None => Self::Fatal(message),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }
}

/// A producer of untrusted scenario documents.
#[async_trait::async_trait]
pub trait TextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Runs an external program with the prompt on stdin and reads the
/// document from stdout. A non-zero exit is classified from stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Split a whitespace-separated command line; `None` when blank.
    #[must_use]
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }
}

#[async_trait::async_trait]
impl TextGenerator for CommandGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| GenerationError::Fatal(format!("cannot start {}: {err}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => {}
                // The program may legitimately exit without reading its input.
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(target: LOG_TARGET_GENERATION, "{} ignored its prompt", self.program);
                }
                Err(err) => return Err(GenerationError::classify(err.to_string())),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| GenerationError::classify(err.to_string()))?;
        if output.status.success() {
            return String::from_utf8(output.stdout)
                .map_err(|_| GenerationError::Fatal("generator output is not UTF-8".to_string()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => format!("{} exited with {}", self.program, output.status),
            text => text.to_string(),
        };
        Err(GenerationError::classify(message))
    }
}

/// Retrying front of a [`TextGenerator`].
#[derive(Debug, Clone)]
pub struct GenerationGateway<G> {
    generator: G,
    policy: RetryPolicy,
}

impl<G: TextGenerator> GenerationGateway<G> {
    pub const fn new(generator: G, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Request a raw document, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or
    /// [`GenerationError::Exhausted`] once the attempt budget is spent.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let prompt = request.prompt();
        let attempts = self.policy.max_attempts.max(1);
        let per_attempt = self.policy.attempt_timeout();
        let mut last = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.policy.delay_before_retry(attempt - 1);
                debug!(
                    target: LOG_TARGET_GENERATION,
                    "retry attempt {attempt}/{attempts} after {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }

            let result = tokio::time::timeout(per_attempt, self.generator.generate(&prompt))
                .await
                .unwrap_or(Err(GenerationError::Timeout(per_attempt)));
            match result {
                Ok(document) => {
                    debug!(target: LOG_TARGET_GENERATION, "attempt {attempt} produced a document");
                    return Ok(document);
                }
                Err(err) if err.is_retryable() => {
                    debug!(target: LOG_TARGET_GENERATION, "attempt {attempt} failed: {err}");
                    last = err.to_string();
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            target: LOG_TARGET_GENERATION,
            "generation for '{}' exhausted {attempts} attempts: {last}",
            request.topic
        );
        Err(GenerationError::Exhausted { attempts, last })
    }

    /// Like [`generate`](Self::generate), abandoned as soon as `cancel`
    /// completes. Dropping the retry loop also drops any pending backoff
    /// sleep and kills a running generator process.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Cancelled`] when `cancel` wins the race.
    pub async fn generate_until<F>(
        &self,
        request: &GenerationRequest,
        cancel: F,
    ) -> Result<String, GenerationError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.generate(request) => result,
            () = cancel => {
                debug!(target: LOG_TARGET_GENERATION, "generation for '{}' cancelled", request.topic);
                Err(GenerationError::Cancelled)
            }
        }
    }

    /// Generate and normalize in one step. Normalization failures are not
    /// retried: the document was delivered, it just held nothing usable.
    ///
    /// # Errors
    ///
    /// Returns a generation error, or [`GenerationError::Invalid`].
    pub async fn generate_scenario(
        &self,
        request: &GenerationRequest,
    ) -> Result<Normalized, GenerationError> {
        let document = self.generate(request).await?;
        Ok(normalize_str(&document)?)
    }
}
