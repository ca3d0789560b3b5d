use thiserror::Error;

/// Canonical error type used by the orchestration crate. Every variant is
/// resolved locally into a fatal compilation payload before it reaches the
/// host; nothing here escapes `Compiler::compile` as an unhandled fault.
#[derive(Debug, Error)]
pub enum Error {
  /// The host's import fetcher could not supply a requested path. Aborts
  /// resolution before any compile attempt.
  #[error("failed to resolve import \"{path}\": {reason}")]
  Resolution { path: String, reason: String },

  /// The compiler implementation itself failed or panicked. Caught at the
  /// invocation boundary and converted into an error payload.
  #[error("Uncaught compiler exception:\n{0}")]
  Invocation(String),

  /// The loader could not construct a compiler from the given locator.
  #[error("failed to load compiler from \"{locator}\": {reason}")]
  Load { locator: String, reason: String },

  /// The compiler returned output that does not parse as standard JSON.
  #[error("Invalid JSON output from the compiler: {0}")]
  MalformedOutput(String),

  /// The isolated context reported a failure or went away with jobs in
  /// flight.
  #[error("Worker error: {0}")]
  Worker(String),

  /// A compile was dispatched before any compiler implementation was
  /// loaded.
  #[error("Compiler not yet loaded.")]
  NotLoaded,
}

/// Result alias bound to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
