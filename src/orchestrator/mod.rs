//! End to end conversion of one asset: validate, probe, plan, encode on the
//! primary engine or a worker pool, reassemble.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assemble::{assemble, order_by_index, remux, AssemblyError, ReassemblyMode};
use crate::command::CommandBuilder;
use crate::config::Config;
use crate::engine::{Engine, EngineError, EngineFactory, FfmpegEngine, FfmpegEngineFactory};
use crate::planner::{Segment, SegmentPlan, SegmentPlanner, Strategy};
use crate::pool::{with_watchdog, PoolError, Task, TaskHandle, TaskOutcome, TaskResult, WorkerPool};
use crate::probe::DurationProber;
use crate::progress::{ProgressAggregator, ProgressEvent, ProgressSink, ProgressSource};
use crate::settings::{
    file_extension, output_file_name, ConversionResult, ConversionSettings, MediaAsset, SettingsError,
};

/// The single error a caller sees for a failed conversion
#[derive(Debug, Error)]
#[error("video conversion failed for '{file_name}'")]
pub struct ConversionFailed {
    pub file_name: String,
    #[source]
    pub cause: FailureCause,
}

#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("invalid settings")]
    InvalidSettings(#[source] SettingsError),

    #[error("could not probe the input")]
    Probe(#[source] EngineError),

    #[error("encoding failed")]
    Engine(#[source] EngineError),

    #[error("segment {index} failed")]
    Segment {
        index: usize,
        #[source]
        error: EngineError,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("segment task ended abnormally: {0}")]
    Internal(String),
}

/// Owns the primary engine and, when configured, a warm worker pool
pub struct Orchestrator {
    engine: Box<dyn Engine>,
    factory: Arc<dyn EngineFactory>,
    config: Config,
    builder: CommandBuilder,
    planner: SegmentPlanner,
    warm_pool: Option<WorkerPool>,
}

impl Orchestrator {
    /// Load `engine` as the primary engine. Pool workers are created from
    /// `factory` on demand.
    pub async fn new(
        mut engine: Box<dyn Engine>,
        factory: Arc<dyn EngineFactory>,
        config: Config,
    ) -> Result<Self, EngineError> {
        engine.load().await?;
        let builder = CommandBuilder::new(config.encoder_tuning());
        let planner = SegmentPlanner::new(config.segment_seconds, config.min_segmented_bytes);
        debug!(
            "Orchestrator ready: {} workers, {:?} reassembly",
            config.workers, config.reassembly
        );
        Ok(Self {
            engine,
            factory,
            config,
            builder,
            planner,
            warm_pool: None,
        })
    }

    /// Orchestrator backed by the ffmpeg binary named in `config`
    pub async fn with_ffmpeg(config: Config) -> Result<Self, EngineError> {
        let engine = FfmpegEngine::new(&config.ffmpeg_path, config.background_mode);
        let factory = FfmpegEngineFactory::new(&config.ffmpeg_path, config.background_mode);
        Self::new(Box::new(engine), Arc::new(factory), config).await
    }

    pub async fn convert(
        &mut self,
        asset: &MediaAsset,
        settings: &ConversionSettings,
    ) -> Result<ConversionResult, ConversionFailed> {
        self.run(asset, settings, None).await
    }

    /// Like [`convert`](Self::convert), sending overall completion in
    /// percent to `progress`. Values never decrease and end at 100 on success.
    pub async fn convert_with_progress(
        &mut self,
        asset: &MediaAsset,
        settings: &ConversionSettings,
        progress: mpsc::UnboundedSender<f64>,
    ) -> Result<ConversionResult, ConversionFailed> {
        self.run(asset, settings, Some(progress)).await
    }

    async fn run(
        &mut self,
        asset: &MediaAsset,
        settings: &ConversionSettings,
        progress: Option<mpsc::UnboundedSender<f64>>,
    ) -> Result<ConversionResult, ConversionFailed> {
        let failed = |cause: FailureCause| {
            error!("❌ Conversion of {} failed: {}", asset.file_name, cause);
            ConversionFailed {
                file_name: asset.file_name.clone(),
                cause,
            }
        };

        settings
            .validate()
            .map_err(|e| failed(FailureCause::InvalidSettings(e)))?;

        let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
        info!(
            "🎬 Converting {} ({} bytes) [{}]",
            asset.file_name,
            asset.size(),
            tag
        );

        let duration = DurationProber::probe(self.engine.as_mut(), asset)
            .await
            .map_err(|e| failed(FailureCause::Probe(e)))?;

        let extension = file_extension(&asset.entry_name());
        let input_name = if extension.is_empty() {
            format!("{tag}_input")
        } else {
            format!("{tag}_input.{extension}")
        };
        let strategy = self.planner.plan(
            duration,
            asset.size(),
            settings,
            &self.builder,
            &input_name,
            &tag,
        );

        let mut relay = ProgressRelay::start(progress, &strategy);
        let outcome = match strategy {
            Strategy::SingleJob => self
                .run_single(asset, settings, &input_name, &tag, &relay.sink)
                .await
                .map(|bytes| (bytes, 1)),
            Strategy::Segmented(plan) => {
                let count = plan.len();
                info!("✂️ Splitting {} into {} segments", asset.file_name, count);
                self.run_segmented(asset, settings, &plan, &input_name, &tag, &relay.sink)
                    .await
                    .map(|bytes| (bytes, count))
            }
        };
        relay.finish(outcome.is_ok()).await;

        let (output_bytes, segments) = outcome.map_err(failed)?;
        let output_format = settings.output_format();
        let result = ConversionResult {
            output_file_name: output_file_name(&asset.file_name, output_format, &tag),
            output_bytes,
            mime_type: output_format.mime_type().to_string(),
            segments,
        };
        info!(
            "✅ Converted {} -> {} ({} bytes)",
            asset.file_name,
            result.output_file_name,
            result.output_bytes.len()
        );
        Ok(result)
    }

    async fn run_single(
        &mut self,
        asset: &MediaAsset,
        settings: &ConversionSettings,
        input_name: &str,
        tag: &str,
        progress: &ProgressSink,
    ) -> Result<Vec<u8>, FailureCause> {
        let output_name = format!("{tag}_output.{}", settings.output_format().extension());
        let command = self.builder.build(input_name, &output_name, settings);
        debug!("Single job: {}", command);

        let engine = self.engine.as_mut();
        let work = async {
            engine.write_input(input_name, &asset.raw_bytes).await?;
            engine.exec(command.args(), progress).await?;
            engine.read_output(&output_name).await
        };
        let result = with_watchdog(self.config.task_timeout(), work).await;

        for name in [input_name, output_name.as_str()] {
            if let Err(e) = engine.delete_entry(name).await {
                warn!("Failed to remove {} from engine storage: {}", name, e);
            }
        }
        result.map_err(FailureCause::Engine)
    }

    async fn run_segmented(
        &mut self,
        asset: &MediaAsset,
        settings: &ConversionSettings,
        plan: &SegmentPlan,
        input_name: &str,
        tag: &str,
        progress: &ProgressSink,
    ) -> Result<Vec<u8>, FailureCause> {
        let pool = match self.warm_pool.take() {
            Some(pool) => pool,
            None => WorkerPool::start(self.factory.clone(), self.config.pool_config()).await?,
        };
        debug!(
            "[{}] Dispatching {} segments to {} workers",
            tag,
            plan.len(),
            pool.workers()
        );

        let cancel = CancellationToken::new();
        let collected = dispatch(&pool, asset, plan, input_name, &cancel, progress).await;

        if collected.is_ok() && self.config.keep_pool_warm {
            self.warm_pool = Some(pool);
        } else {
            pool.shutdown().await;
        }

        let ordered = order_by_index(collected?, plan.len())?;
        match self.config.reassembly {
            ReassemblyMode::Concat => Ok(assemble(&ordered)),
            ReassemblyMode::Remux => {
                let extension = settings.output_format().extension();
                Ok(remux(self.engine.as_mut(), &ordered, extension, tag).await?)
            }
        }
    }

    /// Terminate the primary engine and any warm pool
    pub async fn shutdown(mut self) {
        if let Some(pool) = self.warm_pool.take() {
            pool.shutdown().await;
        }
        if let Err(e) = self.engine.terminate().await {
            warn!("Failed to terminate primary engine: {}", e);
        }
    }
}

/// Submit every segment and collect results in completion order. The first
/// failure cancels everything still queued or running.
async fn dispatch(
    pool: &WorkerPool,
    asset: &MediaAsset,
    plan: &SegmentPlan,
    input_name: &str,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Result<Vec<TaskResult>, FailureCause> {
    let mut pending = JoinSet::new();
    let mut queue = plan.segments.iter().peekable();
    let mut results = Vec::with_capacity(plan.len());
    let mut failure = None;

    while failure.is_none() {
        let next = queue
            .peek()
            .map(|segment| segment_task(asset, input_name, segment));
        let has_next = next.is_some();
        if !has_next && pending.is_empty() {
            break;
        }

        tokio::select! {
            Some(joined) = pending.join_next(), if !pending.is_empty() => match joined {
                Ok(result) => match failure_of(&result) {
                    Some(cause) => failure = Some(cause),
                    None => results.push(result),
                },
                Err(e) => failure = Some(FailureCause::Internal(e.to_string())),
            },
            Some(submitted) = submit_next(pool, next, cancel, progress), if has_next => {
                match submitted {
                    Ok(handle) => {
                        queue.next();
                        pending.spawn(handle.result());
                    }
                    Err(e) => failure = Some(FailureCause::Pool(e)),
                }
            }
        }
    }

    match failure {
        Some(cause) => {
            cancel.cancel();
            while pending.join_next().await.is_some() {}
            Err(cause)
        }
        None => Ok(results),
    }
}

async fn submit_next(
    pool: &WorkerPool,
    task: Option<Task>,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Option<Result<TaskHandle, PoolError>> {
    match task {
        Some(task) => Some(pool.submit(task, cancel, progress).await),
        None => None,
    }
}

fn segment_task(asset: &MediaAsset, input_name: &str, segment: &Segment) -> Task {
    Task {
        segment_index: segment.index,
        input_name: input_name.to_string(),
        input: asset.raw_bytes.clone(),
        output_name: segment.output_name.clone(),
        command: segment.command.clone(),
    }
}

fn failure_of(result: &TaskResult) -> Option<FailureCause> {
    let index = result.segment_index;
    match &result.outcome {
        TaskOutcome::Success { .. } => None,
        TaskOutcome::Failure { error } => Some(FailureCause::Segment {
            index,
            error: error.clone(),
        }),
        TaskOutcome::Cancelled => Some(FailureCause::Segment {
            index,
            error: EngineError::Cancelled,
        }),
    }
}

/// Forwards engine progress events to the caller as overall percentages
struct ProgressRelay {
    sink: ProgressSink,
    forwarder: Option<(JoinHandle<()>, mpsc::UnboundedSender<f64>)>,
}

impl ProgressRelay {
    fn start(caller: Option<mpsc::UnboundedSender<f64>>, strategy: &Strategy) -> Self {
        let Some(caller) = caller else {
            return Self {
                sink: ProgressSink::noop(),
                forwarder: None,
            };
        };

        let mut aggregator = match strategy {
            Strategy::SingleJob => ProgressAggregator::single(),
            Strategy::Segmented(plan) => ProgressAggregator::for_segments(
                plan.segments.iter().map(|s| (s.index, s.duration)),
            ),
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let out = caller.clone();
        let forwarder = tokio::spawn(async move {
            let mut last = 0.0;
            while let Some(event) = rx.recv().await {
                let overall = aggregator.update(event) * 100.0;
                if overall > last {
                    last = overall;
                    let _ = out.send(overall);
                }
            }
        });

        Self {
            sink: ProgressSink::new(ProgressSource::Primary, tx),
            forwarder: Some((forwarder, caller)),
        }
    }

    /// Close the stream once every engine is done with it, then report 100
    /// on success
    async fn finish(&mut self, succeeded: bool) {
        self.sink = ProgressSink::noop();
        if let Some((forwarder, caller)) = self.forwarder.take() {
            if let Err(e) = forwarder.await {
                warn!("Progress forwarder ended abnormally: {}", e);
            }
            if succeeded {
                let _ = caller.send(100.0);
            }
        }
    }
}
