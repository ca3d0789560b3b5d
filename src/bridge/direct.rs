use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::bridge::{invocation_failure_output, panic_message, RawCompileReply};
use crate::compiler::output::SourceWithTarget;
use crate::engine::{CompilerEngine, ImportResolution};
use crate::internal::errors::Result;

/// Runs the compiler synchronously in the calling context. Engine errors
/// and panics are converted into error payloads at the invocation boundary
/// rather than propagated.
pub struct DirectBridge {
  engine: Box<dyn CompilerEngine>,
}

impl DirectBridge {
  pub fn new(engine: Box<dyn CompilerEngine>) -> Self {
    Self { engine }
  }

  pub fn version(&self) -> String {
    self.engine.version()
  }

  pub fn compile_json(
    &mut self,
    source: SourceWithTarget,
    input: String,
  ) -> Result<RawCompileReply> {
    let mut missing_inputs = Vec::new();
    let output = {
      let engine = &mut self.engine;
      let mut import = |path: &str| {
        missing_inputs.push(path.to_string());
        ImportResolution::deferred()
      };
      match catch_unwind(AssertUnwindSafe(|| engine.compile(&input, &mut import))) {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => invocation_failure_output(&err.to_string()),
        Err(panic) => invocation_failure_output(&panic_message(panic)),
      }
    };

    Ok(RawCompileReply {
      output,
      missing_inputs,
      source,
    })
  }
}
