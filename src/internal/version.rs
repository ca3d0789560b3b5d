use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

static NUMERIC_PREFIX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(\d+\.\d+\.\d+)").expect("version pattern"));

/// Truncate a compiler version string to its `MAJOR.MINOR.PATCH` numeric
/// prefix, discarding any pre-release or build suffix.
///
/// `0.8.21+commit.d9974bed.Emscripten.clang` becomes `0.8.21`. Strings with
/// no recognizable prefix are returned unchanged.
pub fn truncate_version(version: &str) -> &str {
  match NUMERIC_PREFIX.find(version) {
    Some(prefix) => prefix.as_str(),
    None => version,
  }
}

/// Parse the truncated numeric prefix of a compiler version string.
pub fn parse_truncated(version: &str) -> Option<Version> {
  Version::parse(truncate_version(version)).ok()
}
