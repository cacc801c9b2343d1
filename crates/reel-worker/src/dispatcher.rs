//! Trigger dispatcher.
//!
//! Consumes object-created events and routes each to the stage watching
//! that store. Successful events (including "not ready" and "already
//! done" outcomes) are acked; failed ones stay pending until the reclaim
//! loop redelivers them, and exhausted or permanent failures go to the DLQ.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reel_models::{Compilation, ObjectCreated, StageName};
use reel_queue::{TriggerDelivery, TriggerQueue};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::retry::LogThrottle;
use crate::stages::{
    concatenate, evaluate_gate, normalize, publish, GateOutcome, NormalizeOutcome, PublishOutcome,
};

/// How an event was handled.
#[derive(Debug)]
pub enum Handled {
    Normalized(NormalizeOutcome),
    BatchNotReady { found: usize, required: usize },
    BatchHeldElsewhere { holder: String },
    Compiled(Compilation),
    Published(PublishOutcome),
    /// Events from stores no stage watches
    Ignored,
}

/// Gate evaluation followed by concatenation when a batch is claimed.
pub async fn run_gate_cycle(ctx: &PipelineContext) -> PipelineResult<Handled> {
    match evaluate_gate(ctx).await? {
        GateOutcome::Insufficient { found, required } => Ok(Handled::BatchNotReady { found, required }),
        GateOutcome::AlreadyClaimed { holder, .. } => Ok(Handled::BatchHeldElsewhere { holder }),
        GateOutcome::Claimed(claimed) => concatenate(ctx, claimed).await.map(Handled::Compiled),
    }
}

/// Route one event to its stage.
pub async fn handle_event(ctx: &PipelineContext, event: &ObjectCreated) -> PipelineResult<Handled> {
    match event.stage {
        StageName::Quarantine => normalize(ctx, &event.key).await.map(Handled::Normalized),
        StageName::Normalized => run_gate_cycle(ctx).await,
        StageName::Compilations => publish(ctx, &event.key).await.map(Handled::Published),
        StageName::Archive => Ok(Handled::Ignored),
    }
}

/// Consumes triggers with bounded concurrency until shut down.
pub struct Dispatcher {
    ctx: Arc<PipelineContext>,
    queue: Arc<TriggerQueue>,
    semaphore: Arc<Semaphore>,
    max_tasks: usize,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl Dispatcher {
    pub fn new(ctx: Arc<PipelineContext>, queue: TriggerQueue) -> Self {
        let max_tasks = ctx.config.max_tasks;
        let (shutdown, _) = watch::channel(false);
        let consumer_name = ctx.instance_id().to_string();

        Self {
            ctx,
            queue: Arc::new(queue),
            semaphore: Arc::new(Semaphore::new(max_tasks)),
            max_tasks,
            shutdown,
            consumer_name,
        }
    }

    /// Run until `shutdown` is called, then wait for in-flight tasks.
    pub async fn run(&self) -> PipelineResult<()> {
        info!(
            "Starting dispatcher '{}' with {} max concurrent tasks",
            self.consumer_name, self.max_tasks
        );

        self.queue.init().await?;

        let reclaim_task = tokio::spawn(Self::reclaim_loop(
            Arc::clone(&self.ctx),
            Arc::clone(&self.queue),
            Arc::clone(&self.semaphore),
            self.consumer_name.clone(),
            self.shutdown.subscribe(),
        ));

        let poll_task = self.ctx.config.gate_poll_interval.map(|every| {
            let poller = GatePoller::new(Arc::clone(&self.ctx), Arc::clone(&self.semaphore), every);
            tokio::spawn(poller.run(self.shutdown.subscribe()))
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = LogThrottle::new(5);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping dispatcher");
                        break;
                    }
                }
                result = self.consume_batch() => {
                    match result {
                        Ok(()) => failures.recovered(),
                        Err(e) => {
                            if failures.failed() {
                                error!("Error consuming triggers: {}", e);
                            }
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        // Both loops watch the same signal; the poller also waits for its
        // running gate cycle so a held lease is released.
        info!("Waiting for in-flight tasks to complete...");
        let drained = async {
            let _ = reclaim_task.await;
            if let Some(task) = poll_task {
                let _ = task.await;
            }
            self.wait_for_tasks().await;
        };
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, drained)
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached with tasks still running");
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_batch(&self) -> PipelineResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let block_ms = self.ctx.config.consume_block.as_millis() as u64;
        let deliveries = self
            .queue
            .consume(&self.consumer_name, block_ms, available.min(5))
            .await?;

        if !deliveries.is_empty() {
            debug!("Consumed {} triggers", deliveries.len());
        }

        for delivery in deliveries {
            Self::spawn_delivery(&self.ctx, &self.queue, &self.semaphore, delivery).await?;
        }
        Ok(())
    }

    async fn spawn_delivery(
        ctx: &Arc<PipelineContext>,
        queue: &Arc<TriggerQueue>,
        semaphore: &Arc<Semaphore>,
        delivery: TriggerDelivery,
    ) -> PipelineResult<()> {
        let permit = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::config("task semaphore closed"))?;
        let ctx = Arc::clone(ctx);
        let queue = Arc::clone(queue);

        let span = tracing::info_span!(
            "trigger",
            stage = %delivery.event.stage,
            key = %delivery.event.key,
            message_id = %delivery.message_id
        );
        tokio::spawn(
            async move {
                let _permit = permit;
                Self::execute(&ctx, &queue, delivery).await;
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Run one delivery and settle it with the queue.
    ///
    /// While the stage runs the delivery is touched often enough that the
    /// reclaim loop of any worker never sees it idle.
    async fn execute(ctx: &PipelineContext, queue: &TriggerQueue, delivery: TriggerDelivery) {
        let source = delivery.event.stage.as_str();
        let consumer = ctx.instance_id();
        let message_id = delivery.message_id.as_str();

        let result = with_heartbeat(
            handle_event(ctx, &delivery.event),
            ctx.config.heartbeat_interval(),
            move || async move {
                match queue.touch(consumer, message_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Trigger {} is no longer pending for this worker", message_id),
                    Err(e) => warn!("Failed to refresh trigger {}: {}", message_id, e),
                }
            },
        )
        .await;

        match result {
            Ok(handled) => {
                debug!("Handled trigger {}: {:?}", delivery.message_id, handled);
                if let Err(e) = queue.ack(&delivery.message_id).await {
                    error!("Failed to ack trigger {}: {}", delivery.message_id, e);
                }
                metrics::record_trigger(source, "acked");
            }
            Err(e) if !e.is_retryable() || queue.is_exhausted(&delivery) => {
                error!(
                    "Trigger {} failed after {} deliveries, moving to DLQ: {}",
                    delivery.message_id, delivery.deliveries, e
                );
                if let Err(dlq_err) = queue.dead_letter(&delivery, &e.to_string()).await {
                    error!("Failed to move trigger {} to DLQ: {}", delivery.message_id, dlq_err);
                }
                metrics::record_trigger(source, "dead_lettered");
            }
            Err(e) => {
                warn!(
                    "Trigger {} failed (delivery {}/{}), left pending for redelivery: {}",
                    delivery.message_id,
                    delivery.deliveries,
                    queue.config().max_deliveries,
                    e
                );
                metrics::record_trigger(source, "pending");
            }
        }
    }

    async fn reclaim_loop(
        ctx: Arc<PipelineContext>,
        queue: Arc<TriggerQueue>,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(ctx.config.reclaim_interval);
        let mut failures = LogThrottle::new(3);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let reclaimed = queue
                        .reclaim_idle(&consumer_name, ctx.config.reclaim_min_idle, 5)
                        .await;
                    match reclaimed {
                        Ok(deliveries) => {
                            failures.recovered();
                            if !deliveries.is_empty() {
                                info!("Reclaimed {} idle triggers", deliveries.len());
                            }
                            for delivery in deliveries {
                                if Self::spawn_delivery(&ctx, &queue, &semaphore, delivery).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            if failures.failed() {
                                warn!("Failed to reclaim idle triggers: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_tasks(&self) {
        while self.semaphore.available_permits() < self.max_tasks {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Drive `work` to completion, running `beat` every `every` until it ends.
async fn with_heartbeat<W, B, Fut>(work: W, every: Duration, mut beat: B) -> W::Output
where
    W: Future,
    B: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = interval.tick() => beat().await,
        }
    }
}

/// Evaluates the gate on a timer so lost `normalized` triggers cannot
/// strand a full batch.
///
/// Each cycle runs as its own task holding a dispatcher permit. At most one
/// cycle is in flight; ticks that land while it runs are skipped.
pub struct GatePoller {
    ctx: Arc<PipelineContext>,
    semaphore: Arc<Semaphore>,
    every: Duration,
}

impl GatePoller {
    pub fn new(ctx: Arc<PipelineContext>, semaphore: Arc<Semaphore>, every: Duration) -> Self {
        Self { ctx, semaphore, every }
    }

    /// Poll until `shutdown_rx` flips, then wait for the running cycle.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.every);
        let mut cycle: Option<JoinHandle<()>> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if cycle.as_ref().is_some_and(|c| !c.is_finished()) {
                        debug!("Gate poll skipped, previous cycle still running");
                        continue;
                    }
                    // Busy workers skip the tick.
                    let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                        debug!("Gate poll skipped, no free task slot");
                        continue;
                    };
                    let ctx = Arc::clone(&self.ctx);
                    cycle = Some(tokio::spawn(
                        async move {
                            let _permit = permit;
                            match run_gate_cycle(&ctx).await {
                                Ok(Handled::Compiled(c)) => info!("Gate poll produced {}", c.name),
                                Ok(handled) => debug!("Gate poll: {:?}", handled),
                                Err(e) => warn!("Gate poll failed: {}", e),
                            }
                        }
                        .instrument(tracing::info_span!("gate_poll")),
                    ));
                }
            }
        }

        if let Some(cycle) = cycle {
            if let Err(e) = cycle.await {
                error!("Gate poll cycle panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_heartbeat_runs_while_work_is_pending() {
        let beats = AtomicUsize::new(0);
        let counter = &beats;
        let output = with_heartbeat(
            async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                "done"
            },
            Duration::from_millis(20),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(output, "done");
        assert!(beats.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_heartbeat_quiet_for_quick_work() {
        let beats = AtomicUsize::new(0);
        let counter = &beats;
        let output = with_heartbeat(async { 7 }, Duration::from_millis(50), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(output, 7);
        assert_eq!(beats.load(Ordering::SeqCst), 0);
    }
}
