//! Orchestration layer for solc-style source-to-bytecode compilers.
//!
//! The compiler itself is a black box supplied by the host through the
//! [`CompilerEngine`] and [`CompilerLoader`] traits; import contents come
//! from an [`ImportFetcher`]. On top of those collaborators the
//! [`Compiler`] resolves transitive imports on demand, runs the compiler
//! either in-process or on an isolated worker task, retries when the
//! compiler defers imports it was not given, and normalizes the raw output
//! before publishing it through its event surface.

mod bridge;
mod compiler;
mod engine;
mod internal;
mod resolver;

pub use bridge::{Bridge, DirectBridge, RawCompileReply, WorkerBridge, WorkerReply, WorkerRequest};
pub use compiler::{
  input::build_input, lookup_contract, normalize_abi, visit_contracts, CompilationOutcome,
  CompilationResult, Compiler, CompilerConfig, CompilerDiagnostic, CompilerEvent, ContractHit,
  ContractMap, ContractVisit, SolcLanguage, SourceWithTarget,
};
pub use compiler::output::{ContractObject, Severity};
pub use engine::{CompilerEngine, CompilerLoader, ImportResolution, DEFERRED_IMPORT};
pub use internal::errors::{Error, Result};
pub use internal::version::truncate_version;
pub use resolver::{resolve_imports, ImportFetcher, SourceContent, SourceMap};
