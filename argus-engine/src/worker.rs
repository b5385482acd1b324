//! Single-owner model worker
//!
//! The detector is moved onto one dedicated thread and fed through a channel,
//! so model calls never overlap no matter how many requests are in flight.

use crate::error::ModelError;
use crate::models::{Detector, ModelInput, RawDetection};
use argus_core::ArgusError;
use crossbeam::channel::{self, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

type Reply = oneshot::Sender<Result<Vec<RawDetection>, ModelError>>;

struct Job {
    input: ModelInput,
    reply: Reply,
}

pub struct ModelWorker {
    sender: Sender<Job>,
    alive: Arc<AtomicBool>,
    name: String,
    input_size: (u32, u32),
    gpu_available: bool,
}

impl ModelWorker {
    /// Move `detector` onto its own thread.
    pub fn spawn(detector: Box<dyn Detector>) -> Result<Self, ModelError> {
        let name = detector.name().to_string();
        let input_size = detector.input_size();
        let gpu_available = detector.gpu_available();
        let (sender, receiver) = channel::unbounded::<Job>();
        let alive = Arc::new(AtomicBool::new(true));

        let thread_alive = alive.clone();
        let thread_name = name.clone();
        thread::Builder::new()
            .name("argus-model".to_string())
            .spawn(move || {
                let mut detector = detector;
                info!("Model worker started for {}", thread_name);
                while let Ok(job) = receiver.recv() {
                    if job.reply.is_closed() {
                        debug!("Skipping inference job abandoned by its caller");
                        continue;
                    }
                    match catch_unwind(AssertUnwindSafe(|| detector.detect(&job.input))) {
                        Ok(result) => {
                            // caller may have timed out in the meantime
                            let _ = job.reply.send(result);
                        }
                        Err(_) => {
                            error!("Model {} panicked during inference; worker stopped", thread_name);
                            thread_alive.store(false, Ordering::SeqCst);
                            let _ = job
                                .reply
                                .send(Err(ModelError::WorkerStopped("detector panicked".to_string())));
                            break;
                        }
                    }
                }
                info!("Model worker for {} exiting", thread_name);
            })?;

        Ok(Self {
            sender,
            alive,
            name,
            input_size,
            gpu_available,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    pub fn gpu_available(&self) -> bool {
        self.gpu_available
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Queue one inference and wait for it, bounded by `timeout` when given.
    ///
    /// On timeout the job still runs to completion; its result is discarded.
    pub async fn infer(
        &self,
        input: ModelInput,
        timeout: Option<Duration>,
    ) -> Result<Vec<RawDetection>, ArgusError> {
        if !self.is_alive() {
            return Err(ArgusError::ModelUnavailable(format!(
                "model {} worker is not running",
                self.name
            )));
        }

        let (reply, receiver) = oneshot::channel();
        self.sender.send(Job { input, reply }).map_err(|_| {
            ArgusError::ModelUnavailable(format!("model {} worker is not running", self.name))
        })?;

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, receiver)
                .await
                .map_err(|_| ArgusError::InferenceTimeout(limit))?,
            None => receiver.await,
        };

        match outcome {
            Ok(result) => result.map_err(ArgusError::from),
            Err(_) => Err(ArgusError::ModelUnavailable(format!(
                "model {} worker stopped",
                self.name
            ))),
        }
    }
}
