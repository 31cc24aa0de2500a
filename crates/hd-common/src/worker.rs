use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Days, NaiveDate};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::DripConfig;
use crate::janitor::purge_stale_queues;
use crate::lead::LeadStatus;
use crate::queue::{MessageQueue, QueueMessage, day_queue_name};
use crate::store::{LeadAdvance, LeadStore, StoreError};
use crate::transport::{MessageTransport, TransportError};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How a single queue entry was resolved. Every variant except an error
/// means the entry must be archived by the caller; an error means the entry
/// is left leased and the visibility timeout will redeliver it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Counter matched; the send happened and the advance committed.
    Advanced { completed: bool },
    /// The lead's counter is already past this message number: a redundant
    /// redelivery or duplicate enqueue. No side effect.
    AlreadyProcessed,
    /// A message number beyond the expected next one arrived early. The
    /// worker never synthesizes the missing tail. No side effect.
    OutOfOrder,
    /// The referenced lead no longer exists (operator deletion).
    MissingLead,
    /// The lead left ACTIVE (operator marked it failed, or it completed
    /// through another path). No side effect.
    LeadInactive,
    /// The send happened but a concurrent worker committed the advance
    /// first; the counter is already past this message.
    LostRace,
}

/// Process one leased queue entry against the lead store.
///
/// The deciding comparison is the lead's durable `message_count` against
/// `message_number - 1`. Only the exact expected successor triggers the
/// send effect and the conditional advance; everything else resolves to an
/// archive with no side effect.
pub async fn process_entry<S, T>(
    store: &S,
    transport: &T,
    clock: &dyn Clock,
    entry: &QueueMessage,
) -> Result<ProcessOutcome, ProcessError>
where
    S: LeadStore + ?Sized,
    T: MessageTransport + ?Sized,
{
    let m = entry.message.message_number;

    let Some(lead) = store.get(&entry.message.lead_id).await? else {
        return Ok(ProcessOutcome::MissingLead);
    };

    if lead.status != LeadStatus::Active {
        return Ok(ProcessOutcome::LeadInactive);
    }

    let c = lead.message_count;
    if c >= m {
        return Ok(ProcessOutcome::AlreadyProcessed);
    }
    if c + 1 < m {
        return Ok(ProcessOutcome::OutOfOrder);
    }

    // c == m - 1: this is the expected next message.
    transport.deliver(&lead, m).await?;

    let now = clock.now();
    let completed = c + 1 == lead.max_messages;
    let patch = LeadAdvance {
        message_count: c + 1,
        last_sent_at: now,
        next_scheduled_for: if completed {
            None
        } else {
            Some(clock.today() + Days::new(1))
        },
        status: if completed {
            LeadStatus::Completed
        } else {
            LeadStatus::Active
        },
    };

    if store.advance(&lead.id, c, &patch).await? {
        Ok(ProcessOutcome::Advanced { completed })
    } else {
        Ok(ProcessOutcome::LostRace)
    }
}

enum Tick {
    Processed,
    Empty,
    Failed,
}

/// Long-running consumer of today's day-queue.
///
/// `start` spawns the poll loop on its own task and is a no-op when the
/// worker is already running; `stop` is idempotent and waits for the loop
/// to finish its current entry. Unarchived entries simply reappear after
/// their visibility lease.
pub struct Worker<Q, S, T> {
    queue: Arc<Q>,
    store: Arc<S>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    config: DripConfig,
    running: AtomicBool,
    stop_signal: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<Q, S, T> Worker<Q, S, T>
where
    Q: MessageQueue + 'static,
    S: LeadStore + 'static,
    T: MessageTransport + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        store: Arc<S>,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
        config: DripConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            transport,
            clock,
            config,
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
            handle: Mutex::new(None),
        })
    }

    /// Janitor sweep plus today's queue creation. Runs once per start.
    pub async fn bootstrap(&self) {
        let today = self.clock.today();
        purge_stale_queues(self.queue.as_ref(), today, &self.config).await;

        let queue_name = day_queue_name(today, self.config.test_mode);
        if let Err(err) = self.queue.create(&queue_name).await {
            warn!(queue = %queue_name, error = %err, "failed to ensure today's queue");
        }
    }

    /// Spawn the poll loop. Returns false (and does nothing) when the
    /// worker is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let worker = Arc::clone(self);
        let task = tokio::spawn(async move { worker.run().await });
        *self.handle.lock().await = Some(task);
        info!("drip worker started");
        true
    }

    /// Signal the poll loop to exit and wait for it. No-op when the worker
    /// is not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stop_signal.notify_waiters();
        if let Some(task) = self.handle.lock().await.take() {
            let _ = task.await;
        }
        info!("drip worker stopped");
    }

    /// Bounded drain of today's queue: process entries until the queue
    /// reads empty, an error occurs, or `max_entries` is reached. Returns
    /// the number of processed entries.
    pub async fn drain(&self, max_entries: Option<usize>) -> usize {
        self.bootstrap().await;

        let cap = max_entries.unwrap_or(usize::MAX);
        let mut processed = 0usize;

        while processed < cap {
            match self.tick(self.clock.today()).await {
                Tick::Processed => {
                    processed += 1;
                    self.pause(self.config.message_delay_ms).await;
                }
                Tick::Empty | Tick::Failed => break,
            }
        }

        processed
    }

    async fn run(self: Arc<Self>) {
        self.bootstrap().await;
        let mut ensured_day = Some(self.clock.today());

        while self.running.load(Ordering::SeqCst) {
            let today = self.clock.today();

            // Day rollover: make sure the new day's queue exists before
            // polling it.
            if ensured_day != Some(today) {
                let queue_name = day_queue_name(today, self.config.test_mode);
                match self.queue.create(&queue_name).await {
                    Ok(()) => ensured_day = Some(today),
                    Err(err) => {
                        warn!(queue = %queue_name, error = %err, "failed to ensure today's queue");
                    }
                }
            }

            match self.tick(today).await {
                Tick::Processed => self.pause(self.config.message_delay_ms).await,
                Tick::Empty | Tick::Failed => self.pause(self.config.poll_interval_ms).await,
            }
        }
    }

    /// One poll: lease at most one entry from today's queue and resolve it.
    async fn tick(&self, today: NaiveDate) -> Tick {
        let queue_name = day_queue_name(today, self.config.test_mode);

        let entries = match self
            .queue
            .read(&queue_name, self.config.visibility_timeout_secs, 1)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!(queue = %queue_name, error = %err, "queue read failed; retrying next poll");
                return Tick::Failed;
            }
        };

        let Some(entry) = entries.into_iter().next() else {
            return Tick::Empty;
        };

        self.handle_entry(&queue_name, &entry).await;
        Tick::Processed
    }

    async fn handle_entry(&self, queue_name: &str, entry: &QueueMessage) {
        let lead_id = entry.message.lead_id.as_str();
        let message_number = entry.message.message_number;

        let outcome = match process_entry(
            self.store.as_ref(),
            self.transport.as_ref(),
            self.clock.as_ref(),
            entry,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                // Not archived: the visibility lease expires and the entry
                // is redelivered, here or on another worker.
                warn!(
                    lead_id,
                    message_number,
                    error = %err,
                    "entry processing failed; leaving it for redelivery"
                );
                return;
            }
        };

        match outcome {
            ProcessOutcome::Advanced { completed } => {
                info!(lead_id, message_number, completed, "advanced lead");
            }
            ProcessOutcome::AlreadyProcessed => {
                debug!(lead_id, message_number, "redundant delivery; no effect");
            }
            ProcessOutcome::OutOfOrder => {
                warn!(lead_id, message_number, "out-of-order delivery; no effect");
            }
            ProcessOutcome::MissingLead => {
                warn!(lead_id, message_number, "orphaned entry; lead missing");
            }
            ProcessOutcome::LeadInactive => {
                info!(lead_id, message_number, "lead no longer active; skipping");
            }
            ProcessOutcome::LostRace => {
                debug!(lead_id, message_number, "advance lost to concurrent worker");
            }
        }

        // Archive only after durable state has been resolved. An archive
        // failure is harmless: redelivery lands in the c >= m case.
        if let Err(err) = self.queue.archive(queue_name, entry.msg_id).await {
            warn!(
                lead_id,
                message_number,
                error = %err,
                "archive failed; entry will be redelivered"
            );
        }
    }

    async fn pause(&self, ms: u64) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            _ = self.stop_signal.notified() => {}
        }
    }
}
