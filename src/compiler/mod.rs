use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::bridge::{Bridge, DirectBridge, RawCompileReply, WorkerBridge};
use crate::engine::CompilerLoader;
use crate::internal::errors::{Error, Result};
use crate::resolver::{resolve_imports, ImportFetcher, SourceContent, SourceMap};

pub use input::{CompilerConfig, SolcLanguage};
pub use output::{
  lookup_contract, normalize_abi, visit_contracts, CompilationResult, CompilerDiagnostic,
  ContractHit, ContractMap, ContractVisit, SourceWithTarget,
};

mod abi;
pub mod input;
pub mod output;

#[cfg(test)]
mod compiler_tests;

/// Events published on the orchestrator's broadcast channel, in the order
/// the protocol guarantees: within one attempt `CompilationStarted`
/// precedes any `CompilationFinished`.
#[derive(Clone, Debug)]
pub enum CompilerEvent {
  LoadingCompiler {
    locator: String,
    use_worker: bool,
  },
  CompilerLoaded {
    version: String,
  },
  CompilationStarted,
  CompilationFinished {
    success: bool,
    data: CompilationResult,
    source: SourceWithTarget,
  },
  CompilationDuration {
    ms: u128,
  },
}

/// Outcome returned by [`Compiler::compile`]; the same payload is delivered
/// through [`CompilerEvent::CompilationFinished`].
#[derive(Clone, Debug)]
pub struct CompilationOutcome {
  pub success: bool,
  pub data: CompilationResult,
  pub source: SourceWithTarget,
}

struct LastCompilation {
  data: CompilationResult,
  source: SourceWithTarget,
}

/// Compilation orchestrator: resolves imports on demand, drives the active
/// execution context, retries on deferred imports, and publishes normalized
/// results.
///
/// One instance owns one current-compilation state. `compile` takes
/// `&mut self`, so overlapping top-level calls against the same instance
/// are serialized by the borrow rules; there is no cancellation primitive,
/// a dispatched attempt can only be superseded by the next one.
pub struct Compiler {
  config: CompilerConfig,
  fetcher: Arc<dyn ImportFetcher>,
  loader: Arc<dyn CompilerLoader>,
  bridge: Option<Bridge>,
  current_version: Option<String>,
  last_compilation: Option<LastCompilation>,
  compilation_start: Option<Instant>,
  target: Option<String>,
  events: broadcast::Sender<CompilerEvent>,
}

impl Compiler {
  pub fn new(fetcher: Arc<dyn ImportFetcher>, loader: Arc<dyn CompilerLoader>) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      config: CompilerConfig::default(),
      fetcher,
      loader,
      bridge: None,
      current_version: None,
      last_compilation: None,
      compilation_start: None,
      target: None,
      events,
    }
  }

  /// Subscribe to the event surface. Receivers created after an event was
  /// published do not see it.
  pub fn subscribe(&self) -> broadcast::Receiver<CompilerEvent> {
    self.events.subscribe()
  }

  pub fn set_optimize(&mut self, optimize: bool) {
    self.config.optimize = optimize;
  }

  pub fn set_evm_version(&mut self, evm_version: Option<String>) {
    self.config.evm_version = evm_version;
  }

  pub fn set_language(&mut self, language: SolcLanguage) {
    self.config.language = language;
  }

  /// Version string self-reported by the currently loaded compiler.
  pub fn current_version(&self) -> Option<&str> {
    self.current_version.as_deref()
  }

  /// Load a compiler implementation from `locator`, either in-process or on
  /// an isolated worker task. Any existing worker is torn down first,
  /// orphaning its in-flight jobs.
  pub async fn load_version(&mut self, use_worker: bool, locator: &str) -> Result<()> {
    self.emit(CompilerEvent::LoadingCompiler {
      locator: locator.to_string(),
      use_worker,
    });

    if let Some(Bridge::Worker(worker)) = self.bridge.take() {
      worker.shutdown();
    }
    self.bridge = None;

    if use_worker {
      let (bridge, version) = WorkerBridge::spawn(Arc::clone(&self.loader), locator).await?;
      self.bridge = Some(Bridge::Worker(bridge));
      self.on_compiler_loaded(version);
    } else {
      let engine = self.loader.load(locator)?;
      let bridge = DirectBridge::new(engine);
      let version = bridge.version();
      self.bridge = Some(Bridge::Direct(bridge));
      self.on_compiler_loaded(version);
    }
    Ok(())
  }

  /// Compile `files` after resolving their transitive imports, re-invoking
  /// the compiler whenever it reports inputs it could not resolve. The
  /// outcome is published as `CompilationFinished` and returned.
  ///
  /// There is no cap on retry iterations: termination relies on the
  /// compiler eventually reporting no missing inputs once every deferred
  /// import has been supplied, or on a fetch failure going fatal.
  pub async fn compile(&mut self, files: SourceMap, target: impl Into<String>) -> CompilationOutcome {
    self.target = Some(target.into());
    self.compilation_start = Some(Instant::now());
    self.emit(CompilerEvent::CompilationStarted);

    let mut sources = files;
    let mut hints: Vec<String> = Vec::new();

    loop {
      let pending_hints = std::mem::take(&mut hints);
      if let Err(err) = resolve_imports(&mut sources, pending_hints, self.fetcher.as_ref()).await {
        // The compiler is never invoked when resolution fails.
        self.last_compilation = None;
        let data = CompilationResult::from_error(CompilerDiagnostic::fatal(err.to_string()));
        return self.finish(false, data, SourceWithTarget::new(sources));
      }

      let input = input::build_input(&sources, &self.config);
      let dispatched = SourceWithTarget::new(sources.clone());
      let reply = match self.dispatch(dispatched, input).await {
        Ok(reply) => reply,
        Err(err) => {
          self.last_compilation = None;
          let data = CompilationResult::from_error(CompilerDiagnostic::fatal(err.to_string()));
          return self.finish(false, data, SourceWithTarget::new(sources));
        }
      };
      let RawCompileReply {
        output,
        missing_inputs,
        source,
      } = reply;

      let data = match serde_json::from_str::<CompilationResult>(&output) {
        Ok(data) => data,
        Err(err) => CompilationResult::from_error(CompilerDiagnostic::fatal(
          Error::MalformedOutput(err.to_string()).to_string(),
        )),
      };

      if data.has_fatal_errors() {
        self.last_compilation = None;
        return self.finish(false, data, source);
      }

      if !missing_inputs.is_empty() {
        // Deferred imports: feed them back through resolution and retry.
        sources = source.sources;
        hints = missing_inputs;
        continue;
      }

      let mut data = data;
      normalize_abi(&mut data, self.config.language, self.current_version.as_deref());
      let mut source = source;
      source.target = self.target.clone();
      self.last_compilation = Some(LastCompilation {
        data: data.clone(),
        source: source.clone(),
      });
      return self.finish(true, data, source);
    }
  }

  /// Return the contract with the given name from the last successful
  /// result, together with the file it was found in. First match in map
  /// iteration order wins when the name exists in multiple files.
  pub fn get_contract(&self, name: &str) -> Option<ContractHit> {
    lookup_contract(name, self.get_contracts()?)
  }

  /// Visit every `(file, name)` pair of the last successful result in
  /// deterministic order, stopping when `cb` returns `true`.
  pub fn visit_contracts<F>(&self, cb: F)
  where
    F: FnMut(ContractVisit<'_>) -> bool,
  {
    if let Some(contracts) = self.get_contracts() {
      visit_contracts(contracts, cb);
    }
  }

  /// The compiled contracts of the last successful result.
  pub fn get_contracts(&self) -> Option<&ContractMap> {
    self.last_compilation.as_ref()?.data.contracts.as_ref()
  }

  /// The source set the last successful result was compiled from.
  pub fn get_sources(&self) -> Option<&SourceMap> {
    Some(&self.last_compilation.as_ref()?.source.sources)
  }

  pub fn get_source(&self, file_name: &str) -> Option<&SourceContent> {
    self.get_sources()?.get(file_name)
  }

  /// The file name at `index` in the compiler's own source listing of the
  /// last successful result.
  pub fn get_source_name(&self, index: usize) -> Option<&str> {
    let sources = self.last_compilation.as_ref()?.data.sources.as_ref()?;
    sources.keys().nth(index).map(String::as_str)
  }

  async fn dispatch(&mut self, source: SourceWithTarget, input: String) -> Result<RawCompileReply> {
    match self.bridge.as_mut() {
      Some(bridge) => bridge.compile_json(source, input).await,
      None => Err(Error::NotLoaded),
    }
  }

  fn on_compiler_loaded(&mut self, version: String) {
    self.current_version = Some(version.clone());
    self.emit(CompilerEvent::CompilerLoaded { version });
  }

  fn finish(
    &mut self,
    success: bool,
    data: CompilationResult,
    source: SourceWithTarget,
  ) -> CompilationOutcome {
    self.emit(CompilerEvent::CompilationFinished {
      success,
      data: data.clone(),
      source: source.clone(),
    });
    if success {
      if let Some(start) = self.compilation_start {
        self.emit(CompilerEvent::CompilationDuration {
          ms: start.elapsed().as_millis(),
        });
      }
    }
    // The start timestamp is consumed whether the attempt succeeded or not.
    self.compilation_start = None;

    CompilationOutcome {
      success,
      data,
      source,
    }
  }

  fn emit(&self, event: CompilerEvent) {
    // Nobody listening is fine.
    let _ = self.events.send(event);
  }
}
