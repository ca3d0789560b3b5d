use crate::internal::errors::Result;

/// Sentinel answer handed to the compiler for imports the orchestrator has
/// not yet fetched. The compiler echoes it back as an import error; the
/// classifier recognizes the message and drives the retry loop instead of
/// treating it as a genuine failure.
pub const DEFERRED_IMPORT: &str = "Deferred import";

/// Answer produced by the import callback passed to [`CompilerEngine::compile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportResolution {
  Content(String),
  Error(String),
}

impl ImportResolution {
  /// The deferred-import sentinel answer.
  pub fn deferred() -> Self {
    ImportResolution::Error(DEFERRED_IMPORT.to_string())
  }
}

/// Black-box contract over a loaded compiler implementation.
///
/// `compile` receives serialized standard-JSON input and an import callback
/// that the compiler invokes for every source file missing from its input.
/// The returned string is the compiler's serialized standard-JSON output.
pub trait CompilerEngine: Send {
  fn compile(
    &mut self,
    input: &str,
    import: &mut dyn FnMut(&str) -> ImportResolution,
  ) -> Result<String>;

  fn version(&self) -> String;
}

/// Constructs a fresh [`CompilerEngine`] from an opaque resource locator
/// (a URL, a filesystem path, a version tag). Supplied by the host; invoked
/// once per `loadVersion` call, in-process or on the isolated worker task.
pub trait CompilerLoader: Send + Sync {
  fn load(&self, locator: &str) -> Result<Box<dyn CompilerEngine>>;
}
