use crate::cancel::CancelToken;
use crate::error::{BoxError, PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::queue::BoundedQueue;
use crate::select::{Route, Selector, Take};
use log::{debug, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default interval between cancellation checks while inputs are idle
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// A processing step applied to every item flowing through a stage.
///
/// Implemented for free by any `FnMut(TIn) -> Result<TOut, BoxError>`
/// closure or function.
pub trait Transform<TIn, TOut>: Send {
    fn apply(&mut self, item: TIn) -> std::result::Result<TOut, BoxError>;
}

impl<F, TIn, TOut> Transform<TIn, TOut> for F
where
    F: FnMut(TIn) -> std::result::Result<TOut, BoxError> + Send,
{
    fn apply(&mut self, item: TIn) -> std::result::Result<TOut, BoxError> {
        self(item)
    }
}

/// The terminal step of a pipeline: consumes items and produces nothing.
///
/// Implemented for free by any `FnMut(TIn) -> Result<(), BoxError>`
/// closure or function.
pub trait Sink<TIn>: Send {
    fn consume(&mut self, item: TIn) -> std::result::Result<(), BoxError>;
}

impl<F, TIn> Sink<TIn> for F
where
    F: FnMut(TIn) -> std::result::Result<(), BoxError> + Send,
{
    fn consume(&mut self, item: TIn) -> std::result::Result<(), BoxError> {
        self(item)
    }
}

/// Terminal disposition of a stage's drive loop
#[derive(Debug)]
pub enum StageOutcome {
    /// Every input queue was exhausted and every taken item was processed
    Completed,
    /// The shared cancellation signal stopped the stage early
    Cancelled,
    /// The transform or sink reported an error, or the outputs were closed
    Faulted(PipelineError),
}

impl StageOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageOutcome::Cancelled)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, StageOutcome::Faulted(_))
    }

    /// Convert into a `Result`, surfacing only faults as errors
    pub fn into_result(self) -> Result<()> {
        match self {
            StageOutcome::Faulted(err) => Err(err),
            _ => Ok(()),
        }
    }
}

/// Marks a set of output queues completed when dropped.
///
/// Each drive loop holds one of these for its whole run, so the outputs are
/// completed on every exit path, including a panic inside a caller-supplied
/// function. Without this, a stage that stops for any reason would leave
/// downstream consumers blocked forever on queues that can never fill.
///
/// Workers scaling out one stage share the same output set and must share a
/// [`group`](Self::group) of guards: the outputs complete only when the last
/// worker exits, never while a sibling still holds an in-flight item.
pub struct CompletionGuard<T: Send> {
    stage: String,
    outputs: Vec<BoundedQueue<T>>,
    remaining: Arc<AtomicUsize>,
}

impl<T: Send> CompletionGuard<T> {
    /// Guard for a single worker owning the whole output set
    pub fn new(stage: impl Into<String>, outputs: Vec<BoundedQueue<T>>) -> Self {
        let mut guards = Self::group(stage, outputs, 1);
        guards.pop().expect("group of one")
    }

    /// Guards for `workers` drive loops sharing one output set
    pub fn group(
        stage: impl Into<String>,
        outputs: Vec<BoundedQueue<T>>,
        workers: usize,
    ) -> Vec<Self> {
        assert!(workers > 0, "a guard group needs at least one worker");
        let stage = stage.into();
        let remaining = Arc::new(AtomicUsize::new(workers));
        (0..workers)
            .map(|_| Self {
                stage: stage.clone(),
                outputs: outputs.clone(),
                remaining: Arc::clone(&remaining),
            })
            .collect()
    }
}

impl<T: Send> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            for queue in &self.outputs {
                queue.mark_completed();
            }
            debug!("stage `{}`: output queues marked completed", self.stage);
        }
    }
}

enum StageKind<TIn: Send, TOut: Send> {
    Transforming {
        transform: Box<dyn Transform<TIn, TOut>>,
        outputs: Selector<TOut>,
    },
    Terminal {
        sink: Box<dyn Sink<TIn>>,
    },
}

/// One pipeline worker: a named drive loop over a set of input queues,
/// either transforming items into a set of output queues or consuming them
/// in a terminal sink.
///
/// Queue sets are shared by handle: a stage's outputs are the next stage's
/// inputs, and several workers may be built over the same sets to scale a
/// stage out. `run` consumes the stage and returns its terminal disposition.
pub struct Stage<TIn: Send, TOut: Send = TIn> {
    name: String,
    inputs: Selector<TIn>,
    kind: StageKind<TIn, TOut>,
    cancel: CancelToken,
    poll_timeout: Duration,
    metrics: StageMetrics,
    guard: Option<CompletionGuard<TOut>>,
}

impl<TIn: Send, TOut: Send> Stage<TIn, TOut> {
    /// Create a transforming stage.
    ///
    /// Fails with a configuration error if `outputs` is empty: a stage with
    /// a transform but nowhere to route results is a wiring mistake.
    pub fn transform(
        name: impl Into<String>,
        inputs: Vec<BoundedQueue<TIn>>,
        outputs: Vec<BoundedQueue<TOut>>,
        transform: impl Transform<TIn, TOut> + 'static,
        cancel: CancelToken,
    ) -> Result<Self> {
        let name = name.into();
        if outputs.is_empty() {
            return Err(PipelineError::Config(format!(
                "transforming stage `{name}` needs at least one output queue"
            )));
        }
        Ok(Self {
            name,
            inputs: Selector::new(inputs),
            kind: StageKind::Transforming {
                transform: Box::new(transform),
                outputs: Selector::new(outputs),
            },
            cancel,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            metrics: StageMetrics::new(),
            guard: None,
        })
    }

    /// Replace the default poll timeout, the upper bound on how long the
    /// stage can stay blocked without observing cancellation
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Replace the metrics handle, letting several workers share one
    pub fn with_metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Supply a guard from a shared [`CompletionGuard::group`].
    ///
    /// Required when several workers share this stage's output set, so the
    /// outputs complete only once the last worker exits. Ignored by
    /// terminal stages, which have no outputs to propagate to.
    pub fn with_completion_guard(mut self, guard: CompletionGuard<TOut>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// The stage's metrics handle
    pub fn metrics(&self) -> StageMetrics {
        self.metrics.clone()
    }

    /// The stage's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the stage until its inputs are exhausted, the shared signal is
    /// raised, or the processing function fails.
    ///
    /// On every exit the stage's output queues are marked completed, so
    /// downstream stages observe exhaustion rather than blocking forever.
    pub fn run(self) -> StageOutcome {
        let Stage {
            name,
            mut inputs,
            kind,
            cancel,
            poll_timeout,
            metrics,
            guard,
        } = self;
        debug!("stage `{name}` starting");
        let outcome = match kind {
            StageKind::Transforming { transform, outputs } => {
                let guard = guard.unwrap_or_else(|| {
                    CompletionGuard::new(name.clone(), outputs.queues().to_vec())
                });
                drive_transforming(
                    &name,
                    &mut inputs,
                    transform,
                    outputs,
                    guard,
                    &cancel,
                    poll_timeout,
                    &metrics,
                )
            }
            StageKind::Terminal { sink } => {
                drive_terminal(&name, &mut inputs, sink, &cancel, poll_timeout, &metrics)
            }
        };
        debug!("stage `{name}` finished: {outcome:?}");
        outcome
    }
}

impl<TIn: Send> Stage<TIn, TIn> {
    /// Create a terminal stage: items are consumed by `sink` and nothing is
    /// produced downstream
    pub fn sink(
        name: impl Into<String>,
        inputs: Vec<BoundedQueue<TIn>>,
        sink: impl Sink<TIn> + 'static,
        cancel: CancelToken,
    ) -> Self {
        Self {
            name: name.into(),
            inputs: Selector::new(inputs),
            kind: StageKind::Terminal {
                sink: Box::new(sink),
            },
            cancel,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            metrics: StageMetrics::new(),
            guard: None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn drive_transforming<TIn: Send, TOut: Send>(
    name: &str,
    inputs: &mut Selector<TIn>,
    mut transform: Box<dyn Transform<TIn, TOut>>,
    mut outputs: Selector<TOut>,
    guard: CompletionGuard<TOut>,
    cancel: &CancelToken,
    poll_timeout: Duration,
    metrics: &StageMetrics,
) -> StageOutcome {
    let _guard = guard;
    loop {
        match inputs.take_from_any(poll_timeout, cancel) {
            Take::Cancelled => return StageOutcome::Cancelled,
            Take::Exhausted => return StageOutcome::Completed,
            Take::TimedOut => continue,
            Take::Item { index, item } => {
                trace!("stage `{name}`: item taken from input {index}");
                metrics.record_taken();
                let started = Instant::now();
                let result = match transform.apply(item) {
                    Ok(result) => result,
                    Err(source) => {
                        return StageOutcome::Faulted(PipelineError::Processing {
                            stage: name.to_owned(),
                            source,
                        });
                    }
                };
                metrics.record_latency(started.elapsed().as_nanos() as u64);
                match outputs.push_to_any(result, cancel) {
                    Route::Accepted { index } => {
                        trace!("stage `{name}`: item routed to output {index}");
                        metrics.record_emitted();
                    }
                    Route::Cancelled => return StageOutcome::Cancelled,
                    Route::Closed => {
                        return StageOutcome::Faulted(PipelineError::OutputsClosed {
                            stage: name.to_owned(),
                        });
                    }
                }
            }
        }
    }
}

fn drive_terminal<TIn: Send>(
    name: &str,
    inputs: &mut Selector<TIn>,
    mut sink: Box<dyn Sink<TIn>>,
    cancel: &CancelToken,
    poll_timeout: Duration,
    metrics: &StageMetrics,
) -> StageOutcome {
    loop {
        match inputs.take_from_any(poll_timeout, cancel) {
            Take::Cancelled => return StageOutcome::Cancelled,
            Take::Exhausted => return StageOutcome::Completed,
            Take::TimedOut => continue,
            Take::Item { index, item } => {
                trace!("stage `{name}`: item taken from input {index}");
                metrics.record_taken();
                let started = Instant::now();
                if let Err(source) = sink.consume(item) {
                    return StageOutcome::Faulted(PipelineError::Processing {
                        stage: name.to_owned(),
                        source,
                    });
                }
                metrics.record_latency(started.elapsed().as_nanos() as u64);
            }
        }
    }
}
