//! Scripted remote operation for `bulwark simulate`.
//!
//! A script is a comma-separated list of steps, consumed one per remote
//! call; once only one step is left it repeats forever.
//!
//! | token     | outcome                                         |
//! |-----------|-------------------------------------------------|
//! | `ok`      | success                                         |
//! | `NNN`     | remote error with HTTP status `NNN`             |
//! | `NNN:S`   | remote error with a retry hint of `S` seconds   |
//! | `reset`   | transport failure with no status                |
//! | `slow:MS` | success after `MS` milliseconds                 |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bulwark_core::{classify_message, ClassifiedError, InvokeError, Invoker, QueryRequest};

/// One scripted outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Ok,
    Status { code: u16, retry_after: Option<u64> },
    Reset,
    Slow(Duration),
}

impl Step {
    fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let (head, arg) = match token.split_once(':') {
            Some((head, arg)) => (head, Some(arg)),
            None => (token, None),
        };

        match (head.to_ascii_lowercase().as_str(), arg) {
            ("ok", None) => Ok(Step::Ok),
            ("reset", None) => Ok(Step::Reset),
            ("slow", Some(ms)) => {
                let ms: u64 = ms.parse().with_context(|| format!("Bad delay in '{token}'"))?;
                Ok(Step::Slow(Duration::from_millis(ms)))
            }
            (code, retry_after) => {
                let code: u16 = code
                    .parse()
                    .with_context(|| format!("Unknown script token '{token}'"))?;
                if !(400..=599).contains(&code) {
                    bail!("Status in '{token}' must be between 400 and 599");
                }
                let retry_after = retry_after
                    .map(|s| s.parse::<u64>())
                    .transpose()
                    .with_context(|| format!("Bad retry hint in '{token}'"))?;
                Ok(Step::Status { code, retry_after })
            }
        }
    }
}

/// Parse a comma-separated script.
pub fn parse_script(script: &str) -> Result<Vec<Step>> {
    let steps = script
        .split(',')
        .filter(|token| !token.trim().is_empty())
        .map(Step::parse)
        .collect::<Result<Vec<_>>>()?;

    if steps.is_empty() {
        bail!("Script must contain at least one step");
    }
    Ok(steps)
}

/// Remote operation that replays a script.
pub struct ScriptedRemote {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedRemote {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of times the remote was actually reached.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front().unwrap_or(Step::Ok)
        } else {
            steps.front().cloned().unwrap_or(Step::Ok)
        }
    }
}

#[async_trait]
impl Invoker<QueryRequest, String> for ScriptedRemote {
    async fn invoke(&self, request: &QueryRequest) -> Result<String, InvokeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.next_step();
        tracing::debug!(call, ?step, "Scripted remote call");

        match step {
            Step::Ok => Ok(format!("{}: result for '{}'", request.target, request.query)),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(format!("{}: slow result for '{}'", request.target, request.query))
            }
            Step::Reset => Err(classify_message("connection reset by peer")),
            Step::Status { code, retry_after } => {
                let body = match retry_after {
                    Some(seconds) => json!({ "retryAfter": seconds }),
                    None => json!({}),
                };
                Err(ClassifiedError::from_status(code, format!("simulated HTTP {code}"), &body).into())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
