//! Executor whose behavior is scripted per source URL.

use async_trait::async_trait;
use dlq_core::executor::{
    ExecutionError, ExecutionOutput, ExecutionRequest, JobExecutor, ProgressReporter,
};
use dlq_core::retry::ErrorKind;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Write `output.<ext>` containing the source URL.
    Succeed,
    Fail(ErrorKind),
    ProgressThenFail(f64, ErrorKind),
    /// Report 0.5 and wait for cancellation.
    Block,
}

#[derive(Default)]
pub struct Scripted {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn script(&self, source: &str, steps: impl IntoIterator<Item = Step>) {
        self.steps
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .extend(steps);
    }

    /// Sources in the order they were executed.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next(&self, source: &str) -> Step {
        self.calls.lock().unwrap().push(source.to_string());
        self.steps
            .lock()
            .unwrap()
            .get_mut(source)
            .and_then(|q| q.pop_front())
            .unwrap_or(Step::Succeed)
    }
}

#[async_trait]
impl JobExecutor for Scripted {
    async fn execute(
        &self,
        request: ExecutionRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutionError> {
        tokio::fs::create_dir_all(&request.work_dir).await.unwrap();
        match self.next(&request.source) {
            Step::Succeed => {
                let path = request
                    .work_dir
                    .join(format!("output.{}", request.output_format.extension()));
                tokio::fs::write(&path, request.source.as_bytes())
                    .await
                    .unwrap();
                progress.report(1.0);
                Ok(path.display().to_string().into())
            }
            Step::Fail(kind) => Err(ExecutionError::failed(kind, "scripted failure")),
            Step::ProgressThenFail(p, kind) => {
                progress.report(p);
                tokio::task::yield_now().await;
                Err(ExecutionError::failed(kind, "scripted failure"))
            }
            Step::Block => {
                progress.report(0.5);
                cancel.cancelled().await;
                Err(ExecutionError::Cancelled)
            }
        }
    }
}
