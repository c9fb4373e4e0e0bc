use std::{
    sync::{
        mpsc::{self, Receiver, SyncSender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context as _, Result};
use tracing::{debug, warn};

use crate::context::Context;
use crate::lifecycle::start_and_record;

/// Bounded set of threads starting executions off the request path.
///
/// [`StartPool::submit`] blocks once `capacity` ids are waiting. Dropping the
/// pool lets the workers finish every queued id before joining them.
pub struct StartPool {
    sender: Option<SyncSender<String>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for StartPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl StartPool {
    pub fn new(ctx: Arc<Context>, workers: usize, capacity: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<String>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..workers.max(1))
            .map(|index| {
                let ctx = Arc::clone(&ctx);
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("skiff-start-{index}"))
                    .spawn(move || run_worker(&ctx, &receiver))
                    .context("failed to spawn start worker")
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    /// Queue an execution id, blocking while the queue is full.
    pub fn submit(&self, execution_id: &str) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("start pool is shut down"))?;
        sender
            .send(execution_id.to_string())
            .map_err(|_| anyhow!("start workers have exited"))?;
        debug!(execution = %execution_id, "start queued");
        Ok(())
    }

    /// Drain queued work and join every worker.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("start worker panicked");
            }
        }
    }
}

impl Drop for StartPool {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker(ctx: &Context, receiver: &Mutex<Receiver<String>>) {
    loop {
        let next = {
            let guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };
        let Ok(execution_id) = next else {
            break;
        };
        let outcome = ctx
            .executions()
            .load(&execution_id)
            .map_err(anyhow::Error::from)
            .and_then(|execution| start_and_record(ctx, &execution));
        if let Err(err) = outcome {
            warn!(execution = %execution_id, error = %format!("{err:#}"), "queued start failed");
        }
    }
}
