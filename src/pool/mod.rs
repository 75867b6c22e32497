//! Fixed-size pool of isolated engine instances.
//!
//! A single dispatcher task owns the slot table; submissions wait in a
//! bounded channel and are pulled only when a slot is idle, so the channel
//! capacity is the queue bound. Every task is answered on its own oneshot
//! channel and results carry their segment index: completion order is not
//! submission order. A worker whose task panics is answered with a failure
//! and its slot is retired; the pool closes once no worker is left.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::EncodeCommand;
use crate::engine::{Engine, EngineError, EngineFactory};
use crate::progress::{ProgressSink, ProgressSource};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    #[error("failed to start worker engines: {0}")]
    Load(#[source] EngineError),

    #[error("task queue is full ({0} tasks waiting)")]
    QueueFull(usize),

    #[error("worker pool has been shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub workers: usize,
    /// Submissions that may wait for a worker before `submit` blocks
    pub queue_capacity: usize,
    /// Watchdog applied to each task, `None` to disable
    pub task_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            task_timeout: None,
        }
    }
}

/// Unit of work for one worker: write the input, run the command, read the output
#[derive(Debug, Clone)]
pub struct Task {
    pub segment_index: usize,
    pub input_name: String,
    pub input: Bytes,
    pub output_name: String,
    pub command: EncodeCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success { bytes: Vec<u8> },
    Failure { error: EngineError },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub segment_index: usize,
    pub outcome: TaskOutcome,
}

/// Pending result of a submitted task
#[derive(Debug)]
pub struct TaskHandle {
    segment_index: usize,
    cancel: CancellationToken,
    reply: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn segment_index(&self) -> usize {
        self.segment_index
    }

    /// Stop this task: it will not start, or its running command is dropped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn result(self) -> TaskResult {
        let segment_index = self.segment_index;
        self.reply.await.unwrap_or(TaskResult {
            segment_index,
            outcome: TaskOutcome::Cancelled,
        })
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
    pub peak_busy: usize,
    pub completed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    completed: AtomicUsize,
}

struct Envelope {
    task: Task,
    cancel: CancellationToken,
    progress: ProgressSink,
    reply: oneshot::Sender<TaskResult>,
}

impl Envelope {
    fn answer(self, outcome: TaskOutcome) {
        answer(self.reply, self.task.segment_index, outcome);
    }
}

fn answer(reply: oneshot::Sender<TaskResult>, segment_index: usize, outcome: TaskOutcome) {
    let _ = reply.send(TaskResult {
        segment_index,
        outcome,
    });
}

/// Long-lived pool, reusable across conversions until shut down
pub struct WorkerPool {
    submissions: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
    workers: usize,
    dispatcher: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create and load `config.workers` engines. If any engine fails to
    /// load, the ones that did load are terminated again.
    pub async fn start(
        factory: Arc<dyn EngineFactory>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let workers = config.workers.max(1);

        let mut loading = JoinSet::new();
        for index in 0..workers {
            let mut engine = factory.create();
            loading.spawn(async move {
                let loaded = engine.load().await;
                (index, engine, loaded)
            });
        }

        let mut engines: Vec<Option<Box<dyn Engine>>> = (0..workers).map(|_| None).collect();
        let mut failure = None;
        while let Some(joined) = loading.join_next().await {
            match joined {
                Ok((index, engine, Ok(()))) => engines[index] = Some(engine),
                Ok((_, mut engine, Err(e))) => {
                    let _ = engine.terminate().await;
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(EngineError::Load(e.to_string()));
                }
            }
        }

        if let Some(error) = failure {
            for engine in engines.iter_mut().flatten() {
                let _ = engine.terminate().await;
            }
            return Err(PoolError::Load(error));
        }

        let (submissions_tx, submissions_rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let dispatcher = Dispatcher {
            slots: engines
                .into_iter()
                .map(|engine| WorkerSlot {
                    engine,
                    retired: false,
                })
                .collect(),
            submissions: submissions_rx,
            running: JoinSet::new(),
            in_flight: HashMap::new(),
            shutdown: shutdown.clone(),
            counters: counters.clone(),
            task_timeout: config.task_timeout,
        };
        let dispatcher = tokio::spawn(dispatcher.run());

        info!("🧵 Worker pool started with {} engines", workers);
        Ok(Self {
            submissions: submissions_tx,
            shutdown,
            counters,
            workers,
            dispatcher: Some(dispatcher),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            busy: self.counters.busy.load(Ordering::SeqCst),
            queued: self.submissions.max_capacity() - self.submissions.capacity(),
            peak_busy: self.counters.peak_busy.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
        }
    }

    /// Queue a task, waiting while the queue is full. Cancelling `cancel`
    /// (or the returned handle) stops the task.
    pub async fn submit(
        &self,
        task: Task,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<TaskHandle, PoolError> {
        let (envelope, handle) = Self::envelope(task, cancel, progress);
        self.submissions
            .send(envelope)
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(handle)
    }

    /// Queue a task, rejecting it when the queue is full
    pub fn try_submit(
        &self,
        task: Task,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<TaskHandle, PoolError> {
        let (envelope, handle) = Self::envelope(task, cancel, progress);
        self.submissions.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PoolError::QueueFull(self.submissions.max_capacity())
            }
            mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
        })?;
        Ok(handle)
    }

    fn envelope(
        task: Task,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> (Envelope, TaskHandle) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let token = cancel.child_token();
        let handle = TaskHandle {
            segment_index: task.segment_index,
            cancel: token.clone(),
            reply: reply_rx,
        };
        let progress = progress.with_source(ProgressSource::Segment(task.segment_index));
        let envelope = Envelope {
            task,
            cancel: token,
            progress,
            reply: reply_tx,
        };
        (envelope, handle)
    }

    /// Cancel queued and running tasks, wait for workers to go idle and
    /// terminate every engine
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                warn!("Worker pool dispatcher ended abnormally: {}", e);
            }
        }
        info!("🧵 Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // The dispatcher notices and terminates the engines on its own.
        self.shutdown.cancel();
    }
}

/// One worker. The engine is out of the slot while a task runs on it.
struct WorkerSlot {
    engine: Option<Box<dyn Engine>>,
    /// Its engine was lost with a panicking task
    retired: bool,
}

/// Where to deliver the result of a running task
struct InFlight {
    slot: usize,
    segment_index: usize,
    reply: oneshot::Sender<TaskResult>,
}

type Finished = (Box<dyn Engine>, TaskOutcome);

/// Sole owner of the slot table and of every running task
struct Dispatcher {
    slots: Vec<WorkerSlot>,
    submissions: mpsc::Receiver<Envelope>,
    running: JoinSet<Finished>,
    in_flight: HashMap<Id, InFlight>,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
    task_timeout: Option<Duration>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = self.running.join_next_with_id() => self.finish(joined),
                envelope = self.submissions.recv(), if self.idle_slot().is_some() => {
                    match envelope {
                        Some(envelope) => self.start(envelope),
                        None => break,
                    }
                }
            }
            if self.slots.iter().all(|slot| slot.retired) {
                warn!("Every worker has been lost, closing the pool");
                break;
            }
        }
        self.drain().await;
    }

    fn idle_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.engine.is_some())
    }

    fn start(&mut self, envelope: Envelope) {
        if envelope.cancel.is_cancelled() {
            debug!("Segment {} cancelled before start", envelope.task.segment_index);
            envelope.answer(TaskOutcome::Cancelled);
            return;
        }
        let Some(slot) = self.idle_slot() else {
            // Only reachable if the select guard was bypassed.
            envelope.answer(TaskOutcome::Cancelled);
            return;
        };
        let Some(mut engine) = self.slots[slot].engine.take() else {
            envelope.answer(TaskOutcome::Cancelled);
            return;
        };

        let busy = self.counters.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_busy.fetch_max(busy, Ordering::SeqCst);
        let Envelope {
            task,
            cancel,
            progress,
            reply,
        } = envelope;
        let segment_index = task.segment_index;
        debug!(
            "Dispatching segment {} to worker {} ({} busy)",
            segment_index, slot, busy
        );

        let shutdown = self.shutdown.clone();
        let timeout = self.task_timeout;
        let spawned = self.running.spawn(async move {
            let outcome =
                run_task(engine.as_mut(), &task, &cancel, &progress, &shutdown, timeout).await;
            (engine, outcome)
        });
        self.in_flight.insert(
            spawned.id(),
            InFlight {
                slot,
                segment_index,
                reply,
            },
        );
    }

    fn finish(&mut self, joined: Result<(Id, Finished), JoinError>) {
        let (id, finished) = match joined {
            Ok((id, finished)) => (id, Ok(finished)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some(flight) = self.in_flight.remove(&id) else {
            return;
        };
        self.counters.busy.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);

        let outcome = match finished {
            Ok((engine, outcome)) => {
                self.slots[flight.slot].engine = Some(engine);
                outcome
            }
            Err(e) => {
                warn!(
                    "Worker {} lost while encoding segment {}: {}",
                    flight.slot, flight.segment_index, e
                );
                self.slots[flight.slot].retired = true;
                TaskOutcome::Failure {
                    error: EngineError::exec("worker task panicked", e.to_string()),
                }
            }
        };
        answer(flight.reply, flight.segment_index, outcome);
    }

    async fn drain(&mut self) {
        self.submissions.close();
        while let Ok(envelope) = self.submissions.try_recv() {
            envelope.answer(TaskOutcome::Cancelled);
        }

        while let Some(joined) = self.running.join_next_with_id().await {
            self.finish(joined);
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(engine) = slot.engine.as_mut() {
                if let Err(e) = engine.terminate().await {
                    warn!("Failed to terminate worker {}: {}", index, e);
                }
            }
        }
        debug!("All worker engines terminated");
    }
}

/// Write, execute, read, then delete both entries whatever the outcome
async fn run_task(
    engine: &mut dyn Engine,
    task: &Task,
    cancel: &CancellationToken,
    progress: &ProgressSink,
    shutdown: &CancellationToken,
    timeout: Option<Duration>,
) -> TaskOutcome {
    if cancel.is_cancelled() || shutdown.is_cancelled() {
        return TaskOutcome::Cancelled;
    }

    let outcome = {
        let work = async {
            engine.write_input(&task.input_name, &task.input).await?;
            engine.exec(task.command.args(), progress).await?;
            engine.read_output(&task.output_name).await
        };
        tokio::select! {
            _ = cancel.cancelled() => TaskOutcome::Cancelled,
            _ = shutdown.cancelled() => TaskOutcome::Cancelled,
            result = with_watchdog(timeout, work) => match result {
                Ok(bytes) => TaskOutcome::Success { bytes },
                Err(error) => {
                    warn!("Segment {} failed: {}", task.segment_index, error);
                    TaskOutcome::Failure { error }
                }
            },
        }
    };

    for name in [&task.input_name, &task.output_name] {
        if let Err(e) = engine.delete_entry(name).await {
            warn!("Failed to remove {} from worker storage: {}", name, e);
        }
    }
    outcome
}

pub(crate) async fn with_watchdog<T>(
    timeout: Option<Duration>,
    work: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| Err(EngineError::TimedOut(limit))),
        None => work.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;
    use crate::engine::memory::{MemoryEngineFactory, Script, Stats};
    use crate::settings::ConversionSettings;

    fn task(index: usize) -> Task {
        let output_name = format!("segment_{index}.mp4");
        Task {
            segment_index: index,
            input_name: "in.mkv".to_string(),
            input: Bytes::from_static(b"source"),
            command: CommandBuilder::default().build(
                "in.mkv",
                &output_name,
                &ConversionSettings::default(),
            ),
            output_name,
        }
    }

    async fn pool(script: Script, config: PoolConfig) -> (WorkerPool, Arc<Stats>) {
        let factory = Arc::new(MemoryEngineFactory::new(script));
        let stats = factory.stats.clone();
        let pool = WorkerPool::start(factory, config).await.unwrap();
        (pool, stats)
    }

    fn config(workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_results_are_keyed_by_segment_index() {
        let script = Script::default().delayed("segment_0.mp4", Duration::from_millis(60));
        let (pool, _) = pool(script, config(2)).await;
        let cancel = CancellationToken::new();

        let mut pending = JoinSet::new();
        for index in 0..2 {
            let handle = pool
                .submit(task(index), &cancel, &ProgressSink::noop())
                .await
                .unwrap();
            pending.spawn(handle.result());
        }

        let mut arrival = Vec::new();
        while let Some(result) = pending.join_next().await {
            let result = result.unwrap();
            let expected = format!("<segment_{}.mp4>", result.segment_index).into_bytes();
            assert_eq!(result.outcome, TaskOutcome::Success { bytes: expected });
            arrival.push(result.segment_index);
        }
        assert_eq!(arrival, vec![1, 0]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_pool_size() {
        let mut script = Script::default();
        for index in 0..8 {
            script = script.delayed(&format!("segment_{index}.mp4"), Duration::from_millis(15));
        }
        let (pool, stats) = pool(script, config(3)).await;
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for index in 0..8 {
            handles.push(
                pool.submit(task(index), &cancel, &ProgressSink::noop())
                    .await
                    .unwrap(),
            );
        }
        for handle in handles {
            assert!(matches!(
                handle.result().await.outcome,
                TaskOutcome::Success { .. }
            ));
        }

        assert_eq!(pool.stats().workers, 3);
        let counters = pool.counters.clone();
        pool.shutdown().await;

        assert_eq!(Stats::get(&counters.peak_busy), 3);
        assert!(Stats::get(&stats.peak_running) <= 3);
        assert_eq!(Stats::get(&counters.completed), 8);
        assert_eq!(Stats::get(&counters.busy), 0);
    }

    #[tokio::test]
    async fn test_failure_is_reported_per_task() {
        let (pool, stats) = pool(Script::default().failing("segment_1.mp4"), config(2)).await;
        let cancel = CancellationToken::new();

        let first = pool.submit(task(0), &cancel, &ProgressSink::noop()).await.unwrap();
        let second = pool.submit(task(1), &cancel, &ProgressSink::noop()).await.unwrap();

        assert!(matches!(first.result().await.outcome, TaskOutcome::Success { .. }));
        let failed = second.result().await;
        assert_eq!(failed.segment_index, 1);
        assert!(matches!(
            failed.outcome,
            TaskOutcome::Failure {
                error: EngineError::Exec { .. }
            }
        ));

        pool.shutdown().await;
        assert_eq!(stats.live_entries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_tasks_never_start() {
        let script = Script::default().delayed("segment_0.mp4", Duration::from_millis(50));
        let (pool, stats) = pool(script, config(1)).await;
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for index in 0..4 {
            handles.push(
                pool.submit(task(index), &cancel, &ProgressSink::noop())
                    .await
                    .unwrap(),
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        for handle in handles {
            assert_eq!(handle.result().await.outcome, TaskOutcome::Cancelled);
        }
        assert_eq!(Stats::get(&stats.execs), 1);
        let counters = pool.counters.clone();
        pool.shutdown().await;
        assert_eq!(Stats::get(&counters.busy), 0);
        assert_eq!(stats.live_entries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_watchdog_times_out_slow_tasks() {
        let script = Script::default().delayed("segment_0.mp4", Duration::from_secs(5));
        let (pool, _) = pool(
            script,
            PoolConfig {
                workers: 1,
                task_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        )
        .await;

        let handle = pool
            .submit(task(0), &CancellationToken::new(), &ProgressSink::noop())
            .await
            .unwrap();
        assert_eq!(
            handle.result().await.outcome,
            TaskOutcome::Failure {
                error: EngineError::TimedOut(Duration::from_millis(20))
            }
        );
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_try_submit_rejects_when_queue_is_full() {
        let script = Script::default().delayed("segment_0.mp4", Duration::from_millis(30));
        let (pool, _) = pool(
            script,
            PoolConfig {
                workers: 1,
                queue_capacity: 1,
                task_timeout: None,
            },
        )
        .await;
        let cancel = CancellationToken::new();

        let first = pool.try_submit(task(0), &cancel, &ProgressSink::noop()).unwrap();
        let second = pool.try_submit(task(1), &cancel, &ProgressSink::noop());
        assert_eq!(second.unwrap_err(), PoolError::QueueFull(1));
        assert_eq!(pool.stats().queued, 1);

        assert!(matches!(first.result().await.outcome, TaskOutcome::Success { .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queue_and_terminates_engines() {
        let script = Script::default().delayed("segment_0.mp4", Duration::from_secs(5));
        let (pool, stats) = pool(script, config(2)).await;
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for index in 0..5 {
            handles.push(
                pool.submit(task(index), &cancel, &ProgressSink::noop())
                    .await
                    .unwrap(),
            );
        }
        let counters = pool.counters.clone();
        pool.shutdown().await;

        assert_eq!(counters.busy.load(Ordering::SeqCst), 0);
        assert_eq!(Stats::get(&stats.terminations), 2);
        let slow = handles.remove(0).result().await;
        assert_eq!(slow.outcome, TaskOutcome::Cancelled);
        assert_eq!(stats.live_entries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelling_one_handle_leaves_the_others_running() {
        let script = Script::default().delayed("segment_0.mp4", Duration::from_secs(5));
        let (pool, _) = pool(script, config(2)).await;
        assert_eq!(pool.workers(), 2);
        let cancel = CancellationToken::new();

        let slow = pool.submit(task(0), &cancel, &ProgressSink::noop()).await.unwrap();
        let quick = pool.submit(task(1), &cancel, &ProgressSink::noop()).await.unwrap();
        assert_eq!(slow.segment_index(), 0);
        assert_eq!(quick.segment_index(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        slow.cancel();
        assert!(!cancel.is_cancelled());

        let slow = tokio::time::timeout(Duration::from_secs(1), slow.result())
            .await
            .expect("cancelled task answers promptly");
        assert_eq!(slow.outcome, TaskOutcome::Cancelled);
        assert!(matches!(quick.result().await.outcome, TaskOutcome::Success { .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_task_fails_and_shutdown_still_completes() {
        let (pool, stats) = pool(Script::default().panicking("segment_1.mp4"), config(2)).await;
        let cancel = CancellationToken::new();

        let first = pool.submit(task(0), &cancel, &ProgressSink::noop()).await.unwrap();
        let crashed = pool.submit(task(1), &cancel, &ProgressSink::noop()).await.unwrap();
        assert!(matches!(first.result().await.outcome, TaskOutcome::Success { .. }));
        let crashed = crashed.result().await;
        assert_eq!(crashed.segment_index, 1);
        assert!(matches!(
            crashed.outcome,
            TaskOutcome::Failure {
                error: EngineError::Exec { .. }
            }
        ));

        // The surviving worker keeps serving.
        let after = pool.submit(task(2), &cancel, &ProgressSink::noop()).await.unwrap();
        assert!(matches!(after.result().await.outcome, TaskOutcome::Success { .. }));

        let counters = pool.counters.clone();
        tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
            .await
            .expect("shutdown finished");
        assert_eq!(Stats::get(&counters.busy), 0);
        assert_eq!(Stats::get(&counters.completed), 3);
        assert_eq!(Stats::get(&stats.terminations), 1);
    }

    #[tokio::test]
    async fn test_pool_closes_when_every_worker_is_lost() {
        let (pool, _) = pool(Script::default().panicking("segment_0.mp4"), config(1)).await;
        let cancel = CancellationToken::new();

        let crashed = pool.submit(task(0), &cancel, &ProgressSink::noop()).await.unwrap();
        assert!(matches!(crashed.result().await.outcome, TaskOutcome::Failure { .. }));

        match pool.submit(task(1), &cancel, &ProgressSink::noop()).await {
            Ok(handle) => assert_eq!(handle.result().await.outcome, TaskOutcome::Cancelled),
            Err(e) => assert_eq!(e, PoolError::Closed),
        }
        tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
            .await
            .expect("shutdown finished");
    }

    #[tokio::test]
    async fn test_load_failure_fails_start() {
        let factory = Arc::new(MemoryEngineFactory::new(Script {
            load_fails: true,
            ..Default::default()
        }));
        let result = WorkerPool::start(factory, config(3)).await;
        assert!(matches!(result, Err(PoolError::Load(EngineError::Load(_)))));
    }
}
