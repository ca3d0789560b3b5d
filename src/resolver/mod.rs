use std::collections::BTreeMap;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::internal::errors::{Error, Result};


/// One source file as handed to the compiler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContent {
  pub content: String,
}

impl SourceContent {
  pub fn new(content: impl Into<String>) -> Self {
    Self {
      content: content.into(),
    }
  }
}

/// File-path keyed set of sources. Mutable while imports are being
/// resolved, treated as immutable once handed to the compiler.
pub type SourceMap = BTreeMap<String, SourceContent>;

/// Asynchronous collaborator that supplies the content of a named import.
/// Single-shot per call; failures carry a host-provided reason.
pub trait ImportFetcher: Send + Sync {
  fn fetch<'a>(&'a self, path: &'a str) -> BoxFuture<'a, std::result::Result<String, String>>;
}

static IMPORT_LINE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"^\s*import\s*['"]([^'"]+)['"]\s*;"#).expect("import pattern"));

/// Scan one file line by line for import declarations, rewriting
/// `./`-relative paths against the declaring file's directory and
/// deduplicating discovered paths into `hints`.
fn scan_file(file_name: &str, content: &str, hints: &mut Vec<String>) {
  for line in content.lines() {
    let Some(captures) = IMPORT_LINE.captures(line) else {
      continue;
    };
    let mut import_path = captures[1].to_string();
    if let Some(relative) = import_path.strip_prefix("./") {
      // Longest prefix up to the final slash; a file with no directory
      // component just drops the leading `./`.
      import_path = match file_name.rfind('/') {
        Some(slash) => format!("{}{}", &file_name[..=slash], relative),
        None => relative.to_string(),
      };
    }
    if !hints.iter().any(|known| known == &import_path) {
      hints.push(import_path);
    }
  }
}

/// Expand `sources` into a closed set by fetching every transitive import.
///
/// Discovered import paths are drained through an explicit work queue:
/// paths already present are skipped, anything else is fetched and the
/// whole set is re-scanned, since the new file may itself import further
/// files. Resolution succeeds once a full re-scan adds nothing new and
/// fails wholesale on the first fetch error (no partial success).
///
/// Each resolved path is fetched at most once, so the loop is finite for
/// any finite dependency graph. A pathological fetcher that keeps minting
/// new paths can still loop forever; that risk is accepted here.
pub async fn resolve_imports(
  sources: &mut SourceMap,
  mut hints: Vec<String>,
  fetcher: &dyn ImportFetcher,
) -> Result<()> {
  'rescan: loop {
    for (file_name, source) in sources.iter() {
      scan_file(file_name, &source.content, &mut hints);
    }

    while let Some(path) = hints.pop() {
      if sources.contains_key(&path) {
        continue;
      }
      match fetcher.fetch(&path).await {
        Ok(content) => {
          sources.insert(path, SourceContent::new(content));
          continue 'rescan;
        }
        Err(reason) => return Err(Error::Resolution { path, reason }),
      }
    }

    return Ok(());
  }
}
