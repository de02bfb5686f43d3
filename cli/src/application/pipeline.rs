//! Sequential step pipeline with typed result passing.
//!
//! Steps run strictly in insertion order, one at a time. Each step's output
//! is stored in a table owned by the pipeline; the [`StepHandle`] returned
//! when a step is added is the only way to read it back, so a later step
//! cannot mistake one result for another.
//!
//! Actions receive the table synchronously, copy out whatever they need, and
//! return a future that owns its inputs. That keeps futures free of borrows
//! on the table while it is being written.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use futures_util::future::{self, Either, LocalBoxFuture};

use crate::application::ports::StepProgress;
use crate::domain::DeployError;

/// Future returned by a step action.
pub type StepFuture<'a, T> = LocalBoxFuture<'a, Result<T>>;

type ErasedAction<'a> =
    Box<dyn FnOnce(&StepOutputs) -> LocalBoxFuture<'a, Result<Box<dyn Any>>> + 'a>;
type SkipPredicate<'a> = Box<dyn Fn(&StepOutputs) -> bool + 'a>;

/// Wrap an already-computed result as a step future.
pub fn immediate<'a, T: 'a>(result: Result<T>) -> StepFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

/// Typed reference to the output of one step.
pub struct StepHandle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StepHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StepHandle<T> {}

impl<T> std::fmt::Debug for StepHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandle").field("index", &self.index).finish()
    }
}

impl<T> StepHandle<T> {
    /// Position of the step in the pipeline.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Skipped,
    Done { elapsed: Duration },
    Failed,
}

/// Results of executed steps, indexed by step position.
#[derive(Default)]
pub struct StepOutputs {
    labels: Vec<String>,
    slots: Vec<Option<Box<dyn Any>>>,
    statuses: Vec<StepStatus>,
}

impl StepOutputs {
    /// Output of a completed step.
    ///
    /// # Errors
    ///
    /// Fails when the step was skipped, failed, or has not run yet, and
    /// for a handle issued by another pipeline.
    pub fn get<T: 'static>(&self, handle: StepHandle<T>) -> Result<&T> {
        let (Some(label), Some(status)) = (
            self.labels.get(handle.index),
            self.statuses.get(handle.index),
        ) else {
            bail!("no step #{} in this pipeline", handle.index);
        };
        match status {
            StepStatus::Done { .. } => self.slots[handle.index]
                .as_ref()
                .and_then(|slot| slot.downcast_ref::<T>())
                .ok_or_else(|| anyhow!("step '{label}' produced an unexpected output type")),
            StepStatus::Skipped => bail!("step '{label}' was skipped and has no output"),
            StepStatus::Failed => bail!("step '{label}' failed and has no output"),
            StepStatus::Pending => bail!("step '{label}' has not run yet"),
        }
    }

    /// Output of a completed step, or `None`.
    #[must_use]
    pub fn try_get<T: 'static>(&self, handle: StepHandle<T>) -> Option<&T> {
        self.get(handle).ok()
    }

    /// `None` for a handle issued by another pipeline.
    #[must_use]
    pub fn status<T>(&self, handle: StepHandle<T>) -> Option<StepStatus> {
        self.statuses.get(handle.index).copied()
    }
}

struct Step<'a> {
    skip_if: Option<SkipPredicate<'a>>,
    action: Option<ErasedAction<'a>>,
}

/// An ordered list of steps and the table of their outputs.
#[derive(Default)]
pub struct Pipeline<'a> {
    steps: Vec<Step<'a>>,
    outputs: StepOutputs,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            outputs: StepOutputs::default(),
        }
    }

    /// Append a step that always runs.
    pub fn step<T, F>(&mut self, label: impl Into<String>, action: F) -> StepHandle<T>
    where
        T: 'static,
        F: FnOnce(&StepOutputs) -> StepFuture<'a, T> + 'a,
    {
        self.push(label.into(), None, action)
    }

    /// Append a step that is skipped when `skip_if` returns true.
    ///
    /// The predicate is evaluated immediately before the step would run and
    /// may read outputs of earlier steps.
    pub fn step_unless<T, P, F>(
        &mut self,
        label: impl Into<String>,
        skip_if: P,
        action: F,
    ) -> StepHandle<T>
    where
        T: 'static,
        P: Fn(&StepOutputs) -> bool + 'a,
        F: FnOnce(&StepOutputs) -> StepFuture<'a, T> + 'a,
    {
        self.push(label.into(), Some(Box::new(skip_if)), action)
    }

    fn push<T, F>(
        &mut self,
        label: String,
        skip_if: Option<SkipPredicate<'a>>,
        action: F,
    ) -> StepHandle<T>
    where
        T: 'static,
        F: FnOnce(&StepOutputs) -> StepFuture<'a, T> + 'a,
    {
        let erased: ErasedAction<'a> = Box::new(move |outputs: &StepOutputs| {
            let fut = action(outputs);
            let erased: LocalBoxFuture<'a, Result<Box<dyn Any>>> =
                Box::pin(async move { fut.await.map(|value| Box::new(value) as Box<dyn Any>) });
            erased
        });
        let index = self.steps.len();
        self.steps.push(Step {
            skip_if,
            action: Some(erased),
        });
        self.outputs.labels.push(label);
        self.outputs.slots.push(None);
        self.outputs.statuses.push(StepStatus::Pending);
        StepHandle {
            index,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn outputs(&self) -> &StepOutputs {
        &self.outputs
    }

    /// Execute every pending step in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step and returns its error, with the
    /// step label attached as context. Later steps stay `Pending`.
    pub async fn run(&mut self, progress: &impl StepProgress) -> Result<()> {
        tracing::debug!(steps = self.steps.len(), "pipeline started");
        progress.begin(self.steps.len());

        for index in 0..self.steps.len() {
            let label = self.outputs.labels[index].clone();

            let skip = self.steps[index]
                .skip_if
                .as_ref()
                .is_some_and(|predicate| predicate(&self.outputs));
            if skip {
                self.steps[index].action = None;
                self.outputs.statuses[index] = StepStatus::Skipped;
                tracing::info!(step = %label, "[SKIP]");
                progress.skipped(&label);
                progress.advance();
                continue;
            }

            let Some(action) = self.steps[index].action.take() else {
                continue;
            };

            tracing::info!(step = %label, "[STEP]");
            progress.started(&label);
            let started = Instant::now();

            match action(&self.outputs).await {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    self.outputs.slots[index] = Some(value);
                    self.outputs.statuses[index] = StepStatus::Done { elapsed };
                    tracing::info!(step = %label, elapsed_s = elapsed.as_secs_f64(), "[DONE]");
                    progress.finished(&label, elapsed);
                    progress.advance();
                }
                Err(e) => {
                    self.outputs.statuses[index] = StepStatus::Failed;
                    tracing::error!(step = %label, error = %format!("{e:#}"), "[FAIL]");
                    progress.failed(&label);
                    return Err(e.context(format!("step '{label}' failed")));
                }
            }
        }
        Ok(())
    }

    /// Like [`run`](Self::run), but gives up as soon as `interrupt`
    /// completes.
    ///
    /// The step in flight is dropped and marked `Failed`; later steps stay
    /// `Pending`. Outputs of finished steps remain readable so the caller
    /// can still clean up after them.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus `DeployError::Interrupted` naming the
    /// step that was cut short.
    pub async fn run_until(
        &mut self,
        progress: &impl StepProgress,
        interrupt: impl Future<Output = ()>,
    ) -> Result<()> {
        let finished = {
            let run = std::pin::pin!(self.run(progress));
            let interrupt = std::pin::pin!(interrupt);
            match future::select(run, interrupt).await {
                Either::Left((result, _)) => Some(result),
                Either::Right(((), _)) => None,
            }
        };
        match finished {
            Some(result) => result,
            None => self.abandon_in_flight(progress),
        }
    }

    fn abandon_in_flight(&mut self, progress: &impl StepProgress) -> Result<()> {
        let Some(index) = self
            .outputs
            .statuses
            .iter()
            .position(|status| *status == StepStatus::Pending)
        else {
            return Ok(());
        };
        let label = self.outputs.labels[index].clone();
        self.steps[index].action = None;
        self.outputs.statuses[index] = StepStatus::Failed;
        tracing::warn!(step = %label, "interrupted");
        progress.failed(&label);
        Err(anyhow::Error::new(DeployError::Interrupted {
            command: label.clone(),
        })
        .context(format!("step '{label}' failed")))
    }
}
