use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;
use nodeflow::errors::{EngineError, Result};
use nodeflow::execution::{FailureInfo, StepResponse};
use nodeflow::steps::{StepInput, SyncExecutable};

/// Scripted synchronous step.
///
/// Returns the scripted responses in order, then keeps returning the last
/// one (or SUCCEEDED if nothing was scripted). Records the parameters of
/// every invocation.
pub struct ScriptedStep {
    script: Mutex<VecDeque<Result<StepResponse>>>,
    last: Mutex<Option<StepResponse>>,
    seen: Mutex<Vec<Value>>,
}

impl ScriptedStep {
    pub fn new(responses: Vec<StepResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new())
    }

    /// Fails `times` times with `message`, then succeeds.
    pub fn failing_then_succeeding(times: usize, message: &str) -> Self {
        let mut responses: Vec<StepResponse> = (0..times)
            .map(|_| StepResponse::failed(FailureInfo::new(message)))
            .collect();
        responses.push(StepResponse::succeeded());
        Self::new(responses)
    }

    /// First invocation returns an engine error instead of a response.
    pub fn erroring(message: &str) -> Self {
        let step = Self::succeeding();
        step.script
            .lock()
            .unwrap()
            .push_back(Err(EngineError::ContractViolation(message.to_string())));
        step
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Parameters seen by each invocation, in order.
    pub fn seen_parameters(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

impl SyncExecutable for ScriptedStep {
    fn execute_sync(&self, input: &StepInput) -> Result<StepResponse> {
        self.seen.lock().unwrap().push(input.parameters.clone());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(response)) => {
                *self.last.lock().unwrap() = Some(response.clone());
                Ok(response)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(StepResponse::succeeded)),
        }
    }
}
