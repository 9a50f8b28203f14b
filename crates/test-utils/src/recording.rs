use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use nodeflow::errors::{EngineError, Result};
use nodeflow::execution::ResponseData;
use nodeflow::types::BoxFuture;
use nodeflow::waiter::NotifyCallback;

/// One callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub callback: Value,
    pub responses: BTreeMap<String, ResponseData>,
}

/// Notify callback that records deliveries; optionally fails the first
/// `failures` calls.
#[derive(Default)]
pub struct RecordingCallback {
    deliveries: Mutex<Vec<Delivery>>,
    failures: AtomicUsize,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl NotifyCallback for RecordingCallback {
    fn notify(
        &self,
        callback: Value,
        responses: BTreeMap<String, ResponseData>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.deliveries.lock().unwrap().push(Delivery {
                callback,
                responses,
            });

            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(EngineError::ContractViolation(
                    "recording callback told to fail".to_string(),
                ));
            }
            Ok(())
        })
    }
}
