use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::compiler::abi;
use crate::compiler::input::SolcLanguage;
use crate::engine::DEFERRED_IMPORT;
use crate::resolver::SourceMap;

// -----------------------------------------------------------------------------
// Compiler output model
// -----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  #[default]
  Error,
  Warning,
}

/// One diagnostic reported by the compiler. Unknown fields are preserved
/// through `extra` so the raw output survives normalization untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerDiagnostic {
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub severity: Severity,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub formatted_message: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl CompilerDiagnostic {
  /// A synthesized error-severity diagnostic carrying `message` in both the
  /// plain and formatted slots, matching what the compiler itself emits.
  pub fn fatal(message: impl Into<String>) -> Self {
    let message = message.into();
    Self {
      formatted_message: Some(message.clone()),
      message,
      severity: Severity::Error,
      extra: Map::new(),
    }
  }

  /// Whether this diagnostic blocks success. Warnings never do, and neither
  /// does the deferred-import sentinel produced by our own import callback.
  pub fn is_fatal(&self) -> bool {
    if self.message.contains(DEFERRED_IMPORT) {
      return false;
    }
    self.severity != Severity::Warning
  }
}

/// One compiled contract. Only the ABI is modeled; everything else the
/// compiler emitted rides along in `extra`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractObject {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub abi: Option<Vec<Value>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Per-file, per-contract-name output mapping.
pub type ContractMap = BTreeMap<String, BTreeMap<String, ContractObject>>;

/// Parsed standard-JSON compiler output, patched in place by
/// [`normalize_abi`] before publication.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompilationResult {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<CompilerDiagnostic>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub errors: Option<Vec<CompilerDiagnostic>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contracts: Option<ContractMap>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sources: Option<BTreeMap<String, Value>>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl CompilationResult {
  /// A result consisting of a single synthesized fatal diagnostic.
  pub fn from_error(diagnostic: CompilerDiagnostic) -> Self {
    Self {
      error: Some(diagnostic),
      ..Default::default()
    }
  }

  /// A result is fatal if the top-level `error` or any entry in `errors`
  /// is a genuine non-warning diagnostic.
  pub fn has_fatal_errors(&self) -> bool {
    if self.error.as_ref().is_some_and(CompilerDiagnostic::is_fatal) {
      return true;
    }
    self
      .errors
      .as_ref()
      .is_some_and(|errors| errors.iter().any(CompilerDiagnostic::is_fatal))
  }
}

/// The source set an attempt was compiled from, stamped with the caller's
/// opaque target identifier once the attempt succeeds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SourceWithTarget {
  pub sources: SourceMap,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
}

impl SourceWithTarget {
  pub fn new(sources: SourceMap) -> Self {
    Self {
      sources,
      target: None,
    }
  }
}

// -----------------------------------------------------------------------------
// Lookup and iteration over the contract mapping
// -----------------------------------------------------------------------------

/// A contract found by [`lookup_contract`], together with its file.
#[derive(Clone, Debug)]
pub struct ContractHit {
  pub object: ContractObject,
  pub file: String,
}

/// One `(file, name)` pair handed to the [`visit_contracts`] callback.
#[derive(Clone, Copy, Debug)]
pub struct ContractVisit<'a> {
  pub name: &'a str,
  pub file: &'a str,
  pub object: &'a ContractObject,
}

/// Linear scan over the per-file mapping; the first match in map iteration
/// order wins. When the same contract name exists in multiple files the
/// first-encountered one is returned, which for the underlying `BTreeMap`
/// means the lexicographically smallest file path.
pub fn lookup_contract(name: &str, contracts: &ContractMap) -> Option<ContractHit> {
  for (file, entries) in contracts {
    if let Some(object) = entries.get(name) {
      return Some(ContractHit {
        object: object.clone(),
        file: file.clone(),
      });
    }
  }
  None
}

/// Invoke `cb` for every `(file, name)` pair in deterministic map order,
/// stopping early the first time it returns `true`.
pub fn visit_contracts<F>(contracts: &ContractMap, mut cb: F)
where
  F: FnMut(ContractVisit<'_>) -> bool,
{
  for (file, entries) in contracts {
    for (name, object) in entries {
      if cb(ContractVisit { name, file, object }) {
        return;
      }
    }
  }
}

// -----------------------------------------------------------------------------
// ABI normalization
// -----------------------------------------------------------------------------

/// Ensure every contract carries an ABI and patch it for known
/// compiler-version quirks.
///
/// The Yul pipeline never emits an ABI; empty ones get a single payable
/// fallback entry so raw-calldata calls have an entry point. Every ABI is
/// then rewritten through the version-keyed compatibility table in
/// [`abi::update`].
pub fn normalize_abi(data: &mut CompilationResult, language: SolcLanguage, version: Option<&str>) {
  let Some(contracts) = data.contracts.as_mut() else {
    return;
  };
  for file_contracts in contracts.values_mut() {
    for object in file_contracts.values_mut() {
      let abi_entries = object.abi.get_or_insert_with(Vec::new);
      if language == SolcLanguage::Yul && abi_entries.is_empty() {
        abi_entries.push(json!({
          "payable": true,
          "stateMutability": "payable",
          "type": "fallback",
        }));
      }
      if let Some(version) = version {
        abi::update(version, abi_entries);
      }
    }
  }
}
