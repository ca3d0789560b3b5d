use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::{invocation_failure_output, panic_message, RawCompileReply};
use crate::compiler::output::{CompilationResult, CompilerDiagnostic, SourceWithTarget};
use crate::engine::{CompilerEngine, CompilerLoader, ImportResolution};
use crate::internal::errors::{Error, Result};

/// Messages sent into the isolated context.
#[derive(Debug)]
pub enum WorkerRequest {
  LoadVersion { locator: String },
  Compile { job: u64, input: String },
}

/// Messages sent back by the isolated context.
#[derive(Debug)]
pub enum WorkerReply {
  VersionLoaded {
    version: String,
  },
  Compiled {
    job: u64,
    output: String,
    missing_inputs: Vec<String>,
  },
  Error {
    message: String,
  },
}

/// One in-flight compile dispatch awaiting its correlated completion.
struct PendingJob {
  source: SourceWithTarget,
  reply: oneshot::Sender<Result<RawCompileReply>>,
}

/// Drives a compiler on a spawned task reachable only through message
/// passing. Jobs are correlated strictly by id; replies may arrive out of
/// dispatch order when several jobs are in flight.
pub struct WorkerBridge {
  request_tx: mpsc::UnboundedSender<WorkerRequest>,
  jobs: Arc<DashMap<u64, PendingJob>>,
  next_job: AtomicU64,
  worker: JoinHandle<()>,
  pump: JoinHandle<()>,
}

impl std::fmt::Debug for WorkerBridge {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerBridge")
      .field("next_job", &self.next_job)
      .finish_non_exhaustive()
  }
}

impl WorkerBridge {
  /// Spawn the isolated context and run the `loadVersion` handshake,
  /// returning the bridge together with the compiler's self-reported
  /// version. A load failure inside the context surfaces as
  /// [`Error::Worker`].
  pub async fn spawn(loader: Arc<dyn CompilerLoader>, locator: &str) -> Result<(Self, String)> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let jobs: Arc<DashMap<u64, PendingJob>> = Arc::new(DashMap::new());
    let (version_tx, version_rx) = oneshot::channel();

    let worker = tokio::spawn(run_worker(loader, request_rx, reply_tx));
    let pump = tokio::spawn(pump_replies(reply_rx, Arc::clone(&jobs), version_tx));

    let bridge = Self {
      request_tx,
      jobs,
      next_job: AtomicU64::new(0),
      worker,
      pump,
    };
    bridge
      .request_tx
      .send(WorkerRequest::LoadVersion {
        locator: locator.to_string(),
      })
      .map_err(|_| Error::Worker("isolated context is gone".to_string()))?;
    let version = version_rx
      .await
      .map_err(|_| Error::Worker("isolated context exited before reporting a version".to_string()))??;
    Ok((bridge, version))
  }

  pub async fn compile_json(
    &self,
    source: SourceWithTarget,
    input: String,
  ) -> Result<RawCompileReply> {
    let job = self.next_job.fetch_add(1, Ordering::Relaxed);
    let (reply_tx, reply_rx) = oneshot::channel();
    self.jobs.insert(
      job,
      PendingJob {
        source,
        reply: reply_tx,
      },
    );

    if self
      .request_tx
      .send(WorkerRequest::Compile { job, input })
      .is_err()
    {
      self.jobs.remove(&job);
      return Err(Error::Worker("isolated context is gone".to_string()));
    }

    reply_rx
      .await
      .map_err(|_| Error::Worker("isolated context dropped the job".to_string()))?
  }

  /// Tear down the isolated context. In-flight jobs are orphaned; their
  /// callers observe a worker error.
  pub fn shutdown(&self) {
    self.worker.abort();
    self.pump.abort();
  }
}

impl Drop for WorkerBridge {
  fn drop(&mut self) {
    self.shutdown();
  }
}

/// Reply pump: matches `Compiled` replies against the job table by id,
/// recovers the dispatched source set, and completes the job. A worker
/// `Error` fails the version handshake and every pending job.
async fn pump_replies(
  mut reply_rx: mpsc::UnboundedReceiver<WorkerReply>,
  jobs: Arc<DashMap<u64, PendingJob>>,
  version_tx: oneshot::Sender<Result<String>>,
) {
  let mut version_tx = Some(version_tx);
  while let Some(reply) = reply_rx.recv().await {
    match reply {
      WorkerReply::VersionLoaded { version } => {
        if let Some(tx) = version_tx.take() {
          let _ = tx.send(Ok(version));
        }
      }
      WorkerReply::Compiled {
        job,
        output,
        missing_inputs,
      } => {
        if let Some((_, pending)) = jobs.remove(&job) {
          let PendingJob { source, reply } = pending;
          let _ = reply.send(Ok(RawCompileReply {
            output,
            missing_inputs,
            source,
          }));
        }
      }
      WorkerReply::Error { message } => {
        if let Some(tx) = version_tx.take() {
          let _ = tx.send(Err(Error::Worker(message.clone())));
        }
        let ids: Vec<u64> = jobs.iter().map(|entry| *entry.key()).collect();
        for id in ids {
          if let Some((_, pending)) = jobs.remove(&id) {
            let _ = pending.reply.send(Err(Error::Worker(message.clone())));
          }
        }
      }
    }
  }
}

/// Body of the isolated context: owns the engine, answers requests over the
/// channel, and never lets an engine failure escape as a task panic.
async fn run_worker(
  loader: Arc<dyn CompilerLoader>,
  mut request_rx: mpsc::UnboundedReceiver<WorkerRequest>,
  reply_tx: mpsc::UnboundedSender<WorkerReply>,
) {
  let mut engine: Option<Box<dyn CompilerEngine>> = None;

  while let Some(request) = request_rx.recv().await {
    match request {
      WorkerRequest::LoadVersion { locator } => {
        engine = None;
        match loader.load(&locator) {
          Ok(loaded) => {
            let version = loaded.version();
            engine = Some(loaded);
            let _ = reply_tx.send(WorkerReply::VersionLoaded { version });
          }
          Err(err) => {
            let _ = reply_tx.send(WorkerReply::Error {
              message: err.to_string(),
            });
          }
        }
      }
      WorkerRequest::Compile { job, input } => {
        let mut missing_inputs = Vec::new();
        let output = match engine.as_mut() {
          Some(engine) => {
            let mut import = |path: &str| {
              missing_inputs.push(path.to_string());
              ImportResolution::deferred()
            };
            match catch_unwind(AssertUnwindSafe(|| engine.compile(&input, &mut import))) {
              Ok(Ok(output)) => output,
              Ok(Err(err)) => invocation_failure_output(&err.to_string()),
              Err(panic) => invocation_failure_output(&panic_message(panic)),
            }
          }
          None => not_loaded_output(),
        };
        let _ = reply_tx.send(WorkerReply::Compiled {
          job,
          output,
          missing_inputs,
        });
      }
    }
  }
}

fn not_loaded_output() -> String {
  let data = CompilationResult::from_error(CompilerDiagnostic::fatal(Error::NotLoaded.to_string()));
  serde_json::to_string(&data)
    .unwrap_or_else(|_| r#"{"error":{"message":"Compiler not yet loaded.","severity":"error"}}"#.to_string())
}
