//! Request dispatch core: a bounded submission queue feeding a fixed pool
//! of worker tasks.
//!
//! Each accepted request carries a one-shot channel with an explicit tagged
//! result, and an activity guard that enforces at most one in-flight job
//! per requester.

use std::sync::Arc;

use log::debug;
use tokio::sync::{Mutex, mpsc, oneshot};

use super::activity::{ActivityGuard, ActivitySet};
use crate::common::errors::JobError;

/// Submissions beyond this block the submitting task (backpressure, not an
/// error).
const QUEUE_CAPACITY: usize = 50;
/// Pool size; also bounds the number of concurrent external encoder
/// processes, since workers block on them.
const WORKER_COUNT: usize = 3;

/// One accepted submission. Consumed by exactly one worker.
#[derive(Debug)]
pub struct UserRequest {
    pub chat_id: i64,
    pub reply_to_message_id: i64,
    pub emote_ids: Vec<String>,
    respond_to: oneshot::Sender<Result<(), JobError>>,
    activity: ActivityGuard,
}

/// Executes one accepted request end to end. The seam keeps the dispatcher
/// testable without the network or external encoders.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, request: &UserRequest) -> impl Future<Output = Result<(), JobError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The requester already has a job in flight.
    AlreadyActive,
    /// The worker side has shut down; no job was created.
    Closed,
}

pub struct Dispatcher {
    queue: mpsc::Sender<UserRequest>,
    activity: Arc<ActivitySet>,
}

impl Dispatcher {
    /// Spawns the worker pool and returns the submission handle.
    pub fn spawn<R: JobRunner>(runner: Arc<R>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..WORKER_COUNT {
            tokio::spawn(worker_loop(worker_id, Arc::clone(&rx), Arc::clone(&runner)));
        }

        Self {
            queue: tx,
            activity: ActivitySet::new(),
        }
    }

    /// Admission check plus enqueue. Blocks on a full queue by design.
    ///
    /// The returned receiver resolves exactly once with the job's tagged
    /// outcome. Validation failures never reach this point, so they never
    /// touch the activity set.
    pub async fn submit(
        &self,
        chat_id: i64,
        reply_to_message_id: i64,
        emote_ids: Vec<String>,
    ) -> Result<oneshot::Receiver<Result<(), JobError>>, SubmitError> {
        let Some(activity) = self.activity.try_acquire(chat_id) else {
            return Err(SubmitError::AlreadyActive);
        };

        let (respond_to, receiver) = oneshot::channel();
        let request = UserRequest {
            chat_id,
            reply_to_message_id,
            emote_ids,
            respond_to,
            activity,
        };
        // If the request is dropped unprocessed (shutdown), the guard and
        // the sender inside it still release and notify.
        self.queue
            .send(request)
            .await
            .map_err(|_| SubmitError::Closed)?;
        Ok(receiver)
    }
}

async fn worker_loop<R: JobRunner>(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<UserRequest>>>,
    runner: Arc<R>,
) {
    loop {
        // The lock is held only while waiting for the next request, never
        // while running a job.
        let request = { rx.lock().await.recv().await };
        let Some(request) = request else {
            debug!("worker {} shutting down: queue closed", worker_id);
            return;
        };

        debug!(
            "worker {} picked up job for chat {} ({} emotes)",
            worker_id,
            request.chat_id,
            request.emote_ids.len()
        );

        let outcome = runner.run(&request).await;

        let UserRequest {
            chat_id,
            respond_to,
            activity,
            ..
        } = request;

        // Release before signaling, so a submitter reacting to the result
        // can immediately submit again.
        drop(activity);
        if respond_to.send(outcome).is_err() {
            debug!("worker {}: submitter for chat {} went away", worker_id, chat_id);
        }
    }
}
