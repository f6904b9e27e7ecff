//! Ordered fallback strategies

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::deploy::transcript::Transcript;
use crate::errors::DeployerError;

type Attempt<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, DeployerError>> + Send + 'a>;

/// Alternative ways of reaching one goal, tried in order until one succeeds.
///
/// Intermediate failures are recorded as "attempt failed, trying next"; only
/// exhausting every strategy is reported to the caller as an error.
pub struct StrategyChain<'a, T> {
    goal: String,
    strategies: Vec<(String, Attempt<'a, T>)>,
}

/// The strategy that worked
#[derive(Debug)]
pub struct ChainSuccess<T> {
    pub strategy: String,
    pub value: T,
    pub failed_attempts: usize,
}

/// Every strategy failed
#[derive(Debug)]
pub struct ChainExhausted {
    pub goal: String,
    pub attempted: Vec<String>,
    pub last_error: DeployerError,
}

impl ChainExhausted {
    /// Promote to a real error of the caller's category
    pub fn into_error(self, make: fn(String) -> DeployerError) -> DeployerError {
        make(self.to_string())
    }
}

impl fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after trying {}; last error: {}",
            self.goal,
            self.attempted.join(", "),
            self.last_error
        )
    }
}

impl<'a, T: Send + 'a> StrategyChain<'a, T> {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            strategies: Vec::new(),
        }
    }

    /// Append a strategy; it is only started if every earlier one failed
    pub fn strategy<F, Fut>(mut self, name: impl Into<String>, attempt: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, DeployerError>> + Send + 'a,
    {
        self.strategies
            .push((name.into(), Box::new(move || attempt().boxed())));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn run(self, transcript: &Transcript) -> Result<ChainSuccess<T>, ChainExhausted> {
        let total = self.strategies.len();
        let mut attempted = Vec::with_capacity(total);
        let mut last_error = None;

        for (index, (name, attempt)) in self.strategies.into_iter().enumerate() {
            transcript.info(format!(
                "{}: trying {} ({}/{})",
                self.goal,
                name,
                index + 1,
                total
            ));
            attempted.push(name.clone());

            match attempt().await {
                Ok(value) => {
                    transcript.info(format!("{}: {} succeeded", self.goal, name));
                    return Ok(ChainSuccess {
                        strategy: name,
                        value,
                        failed_attempts: index,
                    });
                }
                Err(e) => {
                    if index + 1 < total {
                        transcript.info(format!(
                            "{}: {} attempt failed, trying next: {}",
                            self.goal, name, e
                        ));
                    } else {
                        transcript.info(format!("{}: {} attempt failed: {}", self.goal, name, e));
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(ChainExhausted {
            goal: self.goal,
            attempted,
            last_error: last_error
                .unwrap_or_else(|| DeployerError::Internal("no strategies configured".to_string())),
        })
    }
}
