use semver::Version;
use serde_json::Value;

use crate::internal::version::parse_truncated;

/// Rewrite an ABI through the version-keyed backward-compatibility table.
///
/// Two quirks of older compilers are patched here, keyed by the version's
/// truncated `MAJOR.MINOR.PATCH` prefix:
/// - before 0.4.5 every constructor was implicitly payable;
/// - before 0.4.16 entries carried `payable`/`constant` flags but no
///   `stateMutability`, which downstream tooling now expects.
///
/// Versions without a recognizable numeric prefix leave the ABI untouched.
pub fn update(version: &str, abi: &mut [Value]) {
  let Some(parsed) = parse_truncated(version) else {
    return;
  };
  let implicit_payable_constructors = parsed < Version::new(0, 4, 5);
  let missing_state_mutability = parsed < Version::new(0, 4, 16);

  for entry in abi.iter_mut() {
    let Some(object) = entry.as_object_mut() else {
      continue;
    };
    let entry_type = object
      .get("type")
      .and_then(Value::as_str)
      .unwrap_or("function")
      .to_string();

    if entry_type == "constructor" && implicit_payable_constructors {
      object.insert("payable".to_string(), Value::Bool(true));
      object.insert(
        "stateMutability".to_string(),
        Value::String("payable".to_string()),
      );
    }

    if entry_type != "event" && missing_state_mutability && !object.contains_key("stateMutability")
    {
      let payable = object
        .get("payable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
      let constant = object
        .get("constant")
        .and_then(Value::as_bool)
        .unwrap_or(false);
      let mutability = if payable {
        "payable"
      } else if constant {
        "view"
      } else {
        "nonpayable"
      };
      object.insert(
        "stateMutability".to_string(),
        Value::String(mutability.to_string()),
      );
    }
  }
}
