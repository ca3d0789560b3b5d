#[cfg(test)]
mod tests {
  use std::collections::{BTreeMap, VecDeque};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  use futures::future::BoxFuture;
  use tokio::sync::broadcast::error::TryRecvError;

  use crate::compiler::{Compiler, CompilerEvent, SolcLanguage};
  use crate::engine::{CompilerEngine, CompilerLoader, ImportResolution};
  use crate::internal::errors::{Error, Result};
  use crate::resolver::{ImportFetcher, SourceContent, SourceMap};

  const SOLC_VERSION: &str = "0.8.21+commit.d9974bed.Emscripten.clang";

  const CLEAN_OUTPUT: &str = r#"{
    "contracts": { "A.sol": { "A": { "abi": [] } } },
    "sources": { "A.sol": { "id": 0 }, "B.sol": { "id": 1 } }
  }"#;

  /// One scripted compile attempt: the output to return and the import
  /// paths to request through the callback.
  #[derive(Clone)]
  struct Attempt {
    output: String,
    missing: Vec<String>,
  }

  impl Attempt {
    fn clean(output: &str) -> Self {
      Self {
        output: output.to_string(),
        missing: Vec::new(),
      }
    }

    fn deferred(missing: &[&str]) -> Self {
      Self {
        output: r#"{"errors":[{"message":"Deferred import","severity":"error"}]}"#.to_string(),
        missing: missing.iter().map(|path| path.to_string()).collect(),
      }
    }
  }

  /// Shared between the loader and every engine it constructs, so tests can
  /// script attempts and observe dispatches across `loadVersion` calls.
  #[derive(Clone, Default)]
  struct Script {
    attempts: Arc<Mutex<VecDeque<Attempt>>>,
    inputs: Arc<Mutex<Vec<String>>>,
    dispatches: Arc<AtomicUsize>,
  }

  impl Script {
    fn push(&self, attempt: Attempt) {
      self.attempts.lock().expect("attempts lock").push_back(attempt);
    }

    fn dispatch_count(&self) -> usize {
      self.dispatches.load(Ordering::SeqCst)
    }

    fn inputs(&self) -> Vec<String> {
      self.inputs.lock().expect("inputs lock").clone()
    }
  }

  struct ScriptedEngine {
    script: Script,
    version: String,
  }

  impl CompilerEngine for ScriptedEngine {
    fn compile(
      &mut self,
      input: &str,
      import: &mut dyn FnMut(&str) -> ImportResolution,
    ) -> Result<String> {
      self.script.dispatches.fetch_add(1, Ordering::SeqCst);
      self
        .script
        .inputs
        .lock()
        .expect("inputs lock")
        .push(input.to_string());
      let attempt = self
        .script
        .attempts
        .lock()
        .expect("attempts lock")
        .pop_front()
        .expect("unexpected compile dispatch");
      for path in &attempt.missing {
        import(path);
      }
      Ok(attempt.output)
    }

    fn version(&self) -> String {
      self.version.clone()
    }
  }

  struct ScriptedLoader {
    script: Script,
    version: String,
  }

  impl CompilerLoader for ScriptedLoader {
    fn load(&self, _locator: &str) -> Result<Box<dyn CompilerEngine>> {
      Ok(Box::new(ScriptedEngine {
        script: self.script.clone(),
        version: self.version.clone(),
      }))
    }
  }

  struct MapFetcher {
    files: BTreeMap<String, String>,
    calls: Mutex<Vec<String>>,
  }

  impl MapFetcher {
    fn new(entries: &[(&str, &str)]) -> Self {
      Self {
        files: entries
          .iter()
          .map(|(path, content)| (path.to_string(), content.to_string()))
          .collect(),
        calls: Mutex::new(Vec::new()),
      }
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().expect("calls lock").clone()
    }
  }

  impl ImportFetcher for MapFetcher {
    fn fetch<'a>(&'a self, path: &'a str) -> BoxFuture<'a, std::result::Result<String, String>> {
      Box::pin(async move {
        self.calls.lock().expect("calls lock").push(path.to_string());
        self
          .files
          .get(path)
          .cloned()
          .ok_or_else(|| format!("not found: {path}"))
      })
    }
  }

  fn sources(entries: &[(&str, &str)]) -> SourceMap {
    entries
      .iter()
      .map(|(path, content)| (path.to_string(), SourceContent::new(*content)))
      .collect()
  }

  fn harness(fetcher_entries: &[(&str, &str)]) -> (Compiler, Script, Arc<MapFetcher>) {
    let script = Script::default();
    let fetcher = Arc::new(MapFetcher::new(fetcher_entries));
    let loader = Arc::new(ScriptedLoader {
      script: script.clone(),
      version: SOLC_VERSION.to_string(),
    });
    (Compiler::new(fetcher.clone(), loader), script, fetcher)
  }

  #[tokio::test]
  async fn compiling_without_a_loaded_compiler_publishes_a_fatal_result() {
    let (mut compiler, script, _fetcher) = harness(&[]);

    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    assert!(!outcome.success);
    let message = &outcome.data.error.expect("error payload").message;
    assert!(message.contains("Compiler not yet loaded."), "{message}");
    assert_eq!(script.dispatch_count(), 0);
  }

  #[tokio::test]
  async fn resolves_imports_and_publishes_the_normalized_result() {
    let (mut compiler, script, fetcher) = harness(&[("B.sol", "contract B {}")]);
    script.push(Attempt::clean(CLEAN_OUTPUT));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");
    let mut events = compiler.subscribe();

    let outcome = compiler
      .compile(
        sources(&[("A.sol", "import \"./B.sol\";\ncontract A {}")]),
        "t1",
      )
      .await;

    assert!(outcome.success);
    assert_eq!(
      outcome.source.sources.keys().map(String::as_str).collect::<Vec<_>>(),
      vec!["A.sol", "B.sol"]
    );
    assert_eq!(outcome.source.target.as_deref(), Some("t1"));
    assert_eq!(fetcher.calls(), vec!["B.sol"]);

    // The dispatched standard-JSON input carries the expanded source set.
    let inputs = script.inputs();
    assert_eq!(inputs.len(), 1);
    let input: serde_json::Value = serde_json::from_str(&inputs[0]).expect("input parses");
    assert!(input["sources"].get("B.sol").is_some());

    // Started precedes Finished; a successful attempt also reports its
    // duration.
    assert!(matches!(events.try_recv(), Ok(CompilerEvent::CompilationStarted)));
    match events.try_recv() {
      Ok(CompilerEvent::CompilationFinished { success, source, .. }) => {
        assert!(success);
        assert_eq!(source.target.as_deref(), Some("t1"));
      }
      other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
      events.try_recv(),
      Ok(CompilerEvent::CompilationDuration { .. })
    ));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
  }

  #[tokio::test]
  async fn deferred_imports_trigger_exactly_one_retry_dispatch() {
    let (mut compiler, script, fetcher) = harness(&[("Lib.sol", "library Lib {}")]);
    script.push(Attempt::deferred(&["Lib.sol"]));
    script.push(Attempt::clean(CLEAN_OUTPUT));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    assert!(outcome.success, "second attempt's data must be published");
    assert_eq!(script.dispatch_count(), 2);
    assert_eq!(fetcher.calls(), vec!["Lib.sol"]);
    assert!(outcome.source.sources.contains_key("Lib.sol"));
    assert!(outcome.data.contracts.is_some());
  }

  #[tokio::test]
  async fn resolution_failure_skips_the_compiler_entirely() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    let outcome = compiler
      .compile(
        sources(&[("A.sol", "import \"Missing.sol\";\ncontract A {}")]),
        "t1",
      )
      .await;

    assert!(!outcome.success);
    assert_eq!(script.dispatch_count(), 0);
    let message = &outcome.data.error.expect("error payload").message;
    assert!(message.contains("Missing.sol"), "{message}");
  }

  #[tokio::test]
  async fn warning_only_results_are_published_as_success() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    script.push(Attempt::clean(
      r#"{
        "errors": [{ "message": "unused variable", "severity": "warning" }],
        "contracts": { "A.sol": { "A": { "abi": [] } } }
      }"#,
    ));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    assert!(outcome.success);
    assert!(compiler.get_contracts().is_some());
  }

  #[tokio::test]
  async fn a_single_error_severity_entry_fails_the_attempt() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    // Populate a previous successful result first.
    script.push(Attempt::clean(CLEAN_OUTPUT));
    script.push(Attempt::clean(
      r#"{"errors":[
        { "message": "unused variable", "severity": "warning" },
        { "message": "ParserError: expected ';'", "severity": "error" }
      ]}"#,
    ));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    let first = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;
    assert!(first.success);
    assert!(compiler.get_contracts().is_some());

    let second = compiler
      .compile(sources(&[("A.sol", "contract A {")]), "t2")
      .await;
    assert!(!second.success);
    // A fatal attempt clears the previous result wholesale.
    assert!(compiler.get_contracts().is_none());
  }

  #[tokio::test]
  async fn malformed_compiler_output_is_published_as_a_fatal_result() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    script.push(Attempt::clean("this is not JSON"));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    assert!(!outcome.success);
    let message = &outcome.data.error.expect("error payload").message;
    assert!(message.contains("Invalid JSON output"), "{message}");
  }

  #[tokio::test]
  async fn config_mutators_shape_the_next_dispatched_input() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    script.push(Attempt::clean(CLEAN_OUTPUT));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    compiler.set_optimize(true);
    compiler.set_evm_version(Some("istanbul".to_string()));
    compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    let inputs = script.inputs();
    let input: serde_json::Value = serde_json::from_str(&inputs[0]).expect("input parses");
    assert_eq!(input["settings"]["optimizer"]["enabled"], true);
    assert_eq!(input["settings"]["evmVersion"], "istanbul");
  }

  #[tokio::test]
  async fn yul_mode_results_gain_a_payable_fallback_abi() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    script.push(Attempt::clean(
      r#"{"contracts":{"Mini.yul":{"Mini":{"abi":[]}}}}"#,
    ));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");
    compiler.set_language(SolcLanguage::Yul);

    let outcome = compiler
      .compile(sources(&[("Mini.yul", "{ }")]), "t1")
      .await;

    assert!(outcome.success);
    let abi = outcome.data.contracts.as_ref().unwrap()["Mini.yul"]["Mini"]
      .abi
      .as_ref()
      .unwrap();
    assert_eq!(abi.len(), 1);
    assert_eq!(abi[0]["type"], "fallback");
    assert_eq!(abi[0]["stateMutability"], "payable");
  }

  #[tokio::test]
  async fn query_surface_reads_the_last_successful_result() {
    let (mut compiler, script, _fetcher) = harness(&[("B.sol", "contract B {}")]);
    script.push(Attempt::clean(CLEAN_OUTPUT));
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    compiler
      .compile(
        sources(&[("A.sol", "import \"./B.sol\";\ncontract A {}")]),
        "t1",
      )
      .await;

    let hit = compiler.get_contract("A").expect("contract A");
    assert_eq!(hit.file, "A.sol");
    assert!(compiler.get_contract("Missing").is_none());

    assert_eq!(compiler.get_sources().expect("sources").len(), 2);
    assert_eq!(
      compiler.get_source("B.sol").expect("B.sol").content,
      "contract B {}"
    );
    assert_eq!(compiler.get_source_name(0), Some("A.sol"));
    assert_eq!(compiler.get_source_name(1), Some("B.sol"));
    assert_eq!(compiler.get_source_name(2), None);

    let mut visited = 0;
    compiler.visit_contracts(|_visit| {
      visited += 1;
      true
    });
    assert_eq!(visited, 1);
  }

  #[tokio::test]
  async fn loading_a_compiler_reports_its_version() {
    let (mut compiler, _script, _fetcher) = harness(&[]);
    let mut events = compiler.subscribe();

    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load");

    assert_eq!(compiler.current_version(), Some(SOLC_VERSION));
    match events.try_recv() {
      Ok(CompilerEvent::LoadingCompiler { locator, use_worker }) => {
        assert_eq!(locator, "soljson-v0.8.21.js");
        assert!(!use_worker);
      }
      other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
      events.try_recv(),
      Ok(CompilerEvent::CompilerLoaded { .. })
    ));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn worker_mode_compiles_through_the_isolated_context() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    script.push(Attempt::clean(CLEAN_OUTPUT));

    compiler
      .load_version(true, "soljson-v0.8.21.js")
      .await
      .expect("load");
    assert_eq!(compiler.current_version(), Some(SOLC_VERSION));

    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    assert!(outcome.success);
    assert_eq!(script.dispatch_count(), 1);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn worker_mode_retries_deferred_imports_like_direct_mode() {
    let (mut compiler, script, fetcher) = harness(&[("Lib.sol", "library Lib {}")]);
    script.push(Attempt::deferred(&["Lib.sol"]));
    script.push(Attempt::clean(CLEAN_OUTPUT));

    compiler
      .load_version(true, "soljson-v0.8.21.js")
      .await
      .expect("load");
    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;

    assert!(outcome.success);
    assert_eq!(script.dispatch_count(), 2);
    assert_eq!(fetcher.calls(), vec!["Lib.sol"]);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn switching_versions_replaces_the_active_context() {
    let (mut compiler, script, _fetcher) = harness(&[]);
    script.push(Attempt::clean(CLEAN_OUTPUT));

    compiler
      .load_version(true, "soljson-v0.8.20.js")
      .await
      .expect("load worker");
    compiler
      .load_version(false, "soljson-v0.8.21.js")
      .await
      .expect("load direct");

    let outcome = compiler
      .compile(sources(&[("A.sol", "contract A {}")]), "t1")
      .await;
    assert!(outcome.success);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn worker_load_failure_is_returned_to_the_caller() {
    struct FailingLoader;
    impl CompilerLoader for FailingLoader {
      fn load(&self, locator: &str) -> Result<Box<dyn CompilerEngine>> {
        Err(Error::Load {
          locator: locator.to_string(),
          reason: "no such bundle".to_string(),
        })
      }
    }

    let fetcher = Arc::new(MapFetcher::new(&[]));
    let mut compiler = Compiler::new(fetcher, Arc::new(FailingLoader));

    let err = compiler
      .load_version(true, "soljson-missing.js")
      .await
      .expect_err("load must fail");
    assert!(matches!(err, Error::Worker(_)));
  }
}
