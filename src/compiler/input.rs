use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::resolver::SourceMap;

/// Source language accepted by the compiler. `Yul` is the intermediate
/// low-level mode; its pipeline never emits an ABI (see output
/// normalization).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolcLanguage {
  #[default]
  Solidity,
  Yul,
}

/// Compiler configuration read at compile-input-build time. Mutations only
/// affect subsequently dispatched attempts; an attempt already in flight
/// keeps the settings it was built with.
#[derive(Clone, Debug)]
pub struct CompilerConfig {
  pub optimize: bool,
  pub runs: u32,
  pub evm_version: Option<String>,
  pub language: SolcLanguage,
}

impl Default for CompilerConfig {
  fn default() -> Self {
    Self {
      optimize: false,
      runs: 200,
      evm_version: None,
      language: SolcLanguage::Solidity,
    }
  }
}

/// Build the serialized standard-JSON input for one compile attempt.
pub fn build_input(sources: &SourceMap, config: &CompilerConfig) -> String {
  let mut settings = json!({
    "optimizer": {
      "enabled": config.optimize,
      "runs": config.runs,
    },
    "outputSelection": {
      "*": {
        "": ["ast"],
        "*": [
          "abi",
          "metadata",
          "evm.legacyAssembly",
          "evm.bytecode",
          "evm.deployedBytecode",
          "evm.methodIdentifiers",
          "evm.gasEstimates",
        ],
      },
    },
  });
  if let Some(evm_version) = &config.evm_version {
    settings["evmVersion"] = json!(evm_version);
  }

  json!({
    "language": config.language,
    "sources": sources,
    "settings": settings,
  })
  .to_string()
}
