use crate::cancel::CancelToken;
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::queue::{queue_set, BoundedQueue};
use crate::select::{Route, Selector};
use crate::stage::{CompletionGuard, Sink, Stage, StageOutcome, Transform};
use log::debug;
use std::thread::{spawn, JoinHandle};
use std::time::Duration;

/// Default per-queue capacity for links created by the builder
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Sizing for one stage appended to a pipeline
#[derive(Debug, Clone, Copy)]
pub struct StageConfig {
    /// Concurrent drive loops sharing this stage's input and output sets
    pub workers: usize,
    /// Queues in the stage's output link (fan width)
    pub queues: usize,
    /// Capacity of each output queue
    pub capacity: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queues: 1,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl StageConfig {
    fn validate(&self, stage: &str) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::Config(format!(
                "stage `{stage}` needs at least one worker"
            )));
        }
        if self.queues == 0 || self.capacity == 0 {
            return Err(PipelineError::Config(format!(
                "stage `{stage}` needs a positive queue count and capacity"
            )));
        }
        Ok(())
    }
}

fn worker_label(stage: &str, index: usize, workers: usize) -> String {
    if workers == 1 {
        stage.to_owned()
    } else {
        format!("{stage}#{index}")
    }
}

/// Builder for a linear pipeline of stages connected by bounded queue links.
///
/// Each `transform` call appends a stage and a fresh output link; the item
/// type of the chain changes with it. Workers spawn as stages are added, so
/// the pipeline is live while it is being built — the queues simply stay
/// empty until something is fed. `sink` appends the terminal stage and
/// hands back the running [`Pipeline`].
///
/// `TEntry` is the item type fed into the first link, `TCur` the type
/// flowing out of the most recently added stage.
pub struct PipelineBuilder<TEntry: Send + 'static, TCur: Send + 'static> {
    cancel: CancelToken,
    entry: Vec<BoundedQueue<TEntry>>,
    link: Vec<BoundedQueue<TCur>>,
    handles: Vec<(String, JoinHandle<StageOutcome>)>,
    stage_metrics: Vec<(String, StageMetrics)>,
    poll_timeout: Duration,
}

impl<T: Send + 'static> PipelineBuilder<T, T> {
    /// Start a pipeline with a single entry queue of the default capacity
    pub fn new(cancel: &CancelToken) -> Self {
        Self::with_entry(cancel, 1, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start a pipeline with an entry link of `queues` queues of `capacity`
    ///
    /// # Panics
    ///
    /// Panics if `queues` or `capacity` is zero.
    pub fn with_entry(cancel: &CancelToken, queues: usize, capacity: usize) -> Self {
        assert!(queues > 0, "entry link needs at least one queue");
        let entry = queue_set(queues, capacity);
        Self {
            cancel: cancel.clone(),
            link: entry.clone(),
            entry,
            handles: Vec::new(),
            stage_metrics: Vec::new(),
            poll_timeout: crate::stage::DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl<TEntry: Send + 'static, TCur: Send + 'static> PipelineBuilder<TEntry, TCur> {
    /// Replace the poll timeout applied to every stage added after this call
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Append a transforming stage.
    ///
    /// `factory` is called once per worker with the worker index and must
    /// produce that worker's [`Transform`] instance; all workers share the
    /// stage's input and output queue sets.
    pub fn transform<TNext, S, F>(
        mut self,
        name: impl Into<String>,
        cfg: StageConfig,
        mut factory: F,
    ) -> Result<PipelineBuilder<TEntry, TNext>>
    where
        TNext: Send + 'static,
        S: Transform<TCur, TNext> + 'static,
        F: FnMut(usize) -> S,
    {
        let name = name.into();
        cfg.validate(&name)?;
        let outputs = queue_set(cfg.queues, cfg.capacity);
        let metrics = StageMetrics::new();
        let mut guards = CompletionGuard::group(name.clone(), outputs.clone(), cfg.workers);
        for index in 0..cfg.workers {
            let label = worker_label(&name, index, cfg.workers);
            let stage = Stage::transform(
                label.clone(),
                self.link.clone(),
                outputs.clone(),
                factory(index),
                self.cancel.clone(),
            )?
            .with_poll_timeout(self.poll_timeout)
            .with_metrics(metrics.clone())
            .with_completion_guard(guards.pop().expect("one guard per worker"));
            self.handles.push((label, spawn(move || stage.run())));
        }
        self.stage_metrics.push((name, metrics));
        Ok(PipelineBuilder {
            cancel: self.cancel,
            entry: self.entry,
            link: outputs,
            handles: self.handles,
            stage_metrics: self.stage_metrics,
            poll_timeout: self.poll_timeout,
        })
    }

    /// Append the terminal stage and return the running pipeline.
    ///
    /// `factory` is called once per worker with the worker index and must
    /// produce that worker's [`Sink`] instance.
    pub fn sink<S, F>(
        mut self,
        name: impl Into<String>,
        workers: usize,
        mut factory: F,
    ) -> Result<Pipeline<TEntry>>
    where
        S: Sink<TCur> + 'static,
        F: FnMut(usize) -> S,
    {
        let name = name.into();
        if workers == 0 {
            return Err(PipelineError::Config(format!(
                "stage `{name}` needs at least one worker"
            )));
        }
        let metrics = StageMetrics::new();
        for index in 0..workers {
            let label = worker_label(&name, index, workers);
            let stage = Stage::sink(
                label.clone(),
                self.link.clone(),
                factory(index),
                self.cancel.clone(),
            )
            .with_poll_timeout(self.poll_timeout)
            .with_metrics(metrics.clone());
            self.handles.push((label, spawn(move || stage.run())));
        }
        self.stage_metrics.push((name, metrics));
        Ok(Pipeline {
            cancel: self.cancel,
            feeder: Selector::new(self.entry.clone()),
            entry: self.entry,
            handles: self.handles,
            stage_metrics: self.stage_metrics,
        })
    }
}

/// A running pipeline: feed items in, close the input, wait for the result.
///
/// The pipeline owns the entry queue set; every stage behind it is wired to
/// its predecessor solely through shared queue handles.
pub struct Pipeline<T: Send + 'static> {
    cancel: CancelToken,
    entry: Vec<BoundedQueue<T>>,
    feeder: Selector<T>,
    handles: Vec<(String, JoinHandle<StageOutcome>)>,
    stage_metrics: Vec<(String, StageMetrics)>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Route one item into the entry link, blocking under backpressure
    pub fn feed(&mut self, item: T) -> Route {
        self.feeder.push_to_any(item, &self.cancel)
    }

    /// Clones of the entry queues, for producer threads that feed the
    /// pipeline directly
    pub fn entry_handles(&self) -> Vec<BoundedQueue<T>> {
        self.entry.clone()
    }

    /// Mark the entry queues completed; idempotent.
    ///
    /// After this, the first stage drains what is buffered and then
    /// completes, which cascades stage by stage to the sink.
    pub fn close_input(&self) {
        for queue in &self.entry {
            queue.mark_completed();
        }
    }

    /// Raise the shared cancellation signal for every stage
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The pipeline's shared cancellation token
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Metrics handles, one per stage in wiring order
    pub fn stage_metrics(&self) -> &[(String, StageMetrics)] {
        &self.stage_metrics
    }

    /// Format a metrics line per stage
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("pipeline metrics:\n");
        for (name, metrics) in &self.stage_metrics {
            summary.push_str(&format!("  {}: {}\n", name, metrics.snapshot().format()));
        }
        summary
    }

    /// Close the input and block until every worker reaches a terminal
    /// state.
    ///
    /// Completion, exhaustion and cancellation are all success; the first
    /// faulted worker's error (or a worker panic) is returned after every
    /// other worker has still been joined.
    pub fn wait(self) -> Result<()> {
        self.close_input();
        let mut first_error = None;
        for (label, handle) in self.handles {
            match handle.join() {
                Ok(outcome) => {
                    debug!("worker `{label}` finished: {outcome:?}");
                    if let StageOutcome::Faulted(err) = outcome {
                        first_error.get_or_insert(err);
                    }
                }
                Err(_) => {
                    first_error.get_or_insert(PipelineError::WorkerPanicked(label));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
