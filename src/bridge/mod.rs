use std::any::Any;

use crate::compiler::output::{CompilationResult, CompilerDiagnostic, SourceWithTarget};
use crate::internal::errors::{Error, Result};

pub mod direct;
pub mod worker;

pub use direct::DirectBridge;
pub use worker::{WorkerBridge, WorkerReply, WorkerRequest};


/// Raw compiler output for one attempt, together with the import paths the
/// compiler could not resolve and the source set the attempt was built
/// from.
#[derive(Debug)]
pub struct RawCompileReply {
  pub output: String,
  pub missing_inputs: Vec<String>,
  pub source: SourceWithTarget,
}

/// The two interchangeable execution contexts for running a compiler. Both
/// expose the same asynchronous compile-and-reply contract; the caller
/// never blocks on the compiler.
pub enum Bridge {
  Direct(DirectBridge),
  Worker(WorkerBridge),
}

impl Bridge {
  pub async fn compile_json(
    &mut self,
    source: SourceWithTarget,
    input: String,
  ) -> Result<RawCompileReply> {
    match self {
      Bridge::Direct(bridge) => bridge.compile_json(source, input),
      Bridge::Worker(bridge) => bridge.compile_json(source, input).await,
    }
  }
}

/// Serialize an invocation failure into an output payload carrying a single
/// error-severity diagnostic. Compilation must never crash the caller, so
/// engine errors and panics both funnel through here.
pub(crate) fn invocation_failure_output(message: &str) -> String {
  let data = CompilationResult::from_error(CompilerDiagnostic::fatal(
    Error::Invocation(message.to_string()).to_string(),
  ));
  serde_json::to_string(&data).unwrap_or_else(|_| {
    r#"{"error":{"message":"Uncaught compiler exception","severity":"error"}}"#.to_string()
  })
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "compiler panicked".to_string()
  }
}
