//! Argument handling for generated scripts.
//!
//! Arguments travel as shell-style `--name=value` tokens. Order matters:
//! later occurrences of a flag win, which is how parent defaults are
//! overridden by child-specific values.

use std::collections::HashMap;

use crate::core::errors::{AlmanacError, Result};
use crate::solution::{ArgBinding, ArgumentSpec, Coordinates};

/// Encode bindings as `--name=value` tokens, preserving declaration order.
pub fn encode_args(bindings: &[ArgBinding]) -> Vec<String> {
    bindings
        .iter()
        .map(|binding| format!("--{}={}", binding.name, binding.value))
        .collect()
}

/// Parse provided tokens against the declared arguments of a solution.
///
/// Every token must have the `--name=value` shape and name a declared
/// argument; missing values fall back to declared defaults; a required
/// argument without a value is an error. Duplicate tokens are legal and the
/// last occurrence wins.
pub fn parse_arguments(
    declared: &[ArgumentSpec],
    provided: &[String],
    coordinates: &Coordinates,
) -> Result<HashMap<String, String>> {
    let mut values: HashMap<String, String> = HashMap::new();
    for token in provided {
        let (name, value) = split_token(token)
            .ok_or_else(|| {
                AlmanacError::argument(
                    coordinates.to_string(),
                    format!("malformed argument token '{}', expected --name=value", token),
                )
            })?;
        if !declared.iter().any(|spec| spec.name == name) {
            return Err(AlmanacError::argument(
                coordinates.to_string(),
                format!("unknown argument '--{}'", name),
            ));
        }
        values.insert(name.to_string(), value.to_string());
    }
    for spec in declared {
        if values.contains_key(&spec.name) {
            continue;
        }
        if let Some(default) = &spec.default {
            values.insert(spec.name.clone(), default.clone());
        } else if spec.required {
            return Err(AlmanacError::argument(
                coordinates.to_string(),
                format!("missing required argument '--{}'", spec.name),
            ));
        }
    }
    Ok(values)
}

/// Expand the `${...}` placeholders of step bindings against the declaring
/// solution's parsed arguments and encode the result as tokens.
pub fn render_bindings(
    bindings: &[ArgBinding],
    parsed: &HashMap<String, String>,
    coordinates: &Coordinates,
) -> Result<Vec<String>> {
    let mut tokens = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let value = expand_placeholders(&binding.value, parsed).map_err(|missing| {
            AlmanacError::argument(
                coordinates.to_string(),
                format!(
                    "binding '{}' references '{}' which the declaring solution does not provide",
                    binding.name, missing
                ),
            )
        })?;
        tokens.push(format!("--{}={}", binding.name, value));
    }
    Ok(tokens)
}

fn split_token(token: &str) -> Option<(&str, &str)> {
    let rest = token.strip_prefix("--")?;
    let (name, value) = rest.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Replace every `${name}` in `template` with its value; the error carries
/// the first name without a value. An unterminated `${` is reported as a
/// missing empty binding.
fn expand_placeholders(
    template: &str,
    values: &HashMap<String, String>,
) -> std::result::Result<String, String> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(String::new());
        };
        let name = &after[..end];
        match values.get(name) {
            Some(value) => output.push_str(value),
            None => return Err(name.to_string()),
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(name: &str, default: Option<&str>, required: bool) -> ArgumentSpec {
        ArgumentSpec {
            name: name.to_string(),
            description: None,
            default: default.map(str::to_string),
            required,
        }
    }

    fn coords() -> Coordinates {
        Coordinates::new("grp", "sol", "1.0.0")
    }

    #[test]
    fn test_parse_applies_defaults_and_overrides() {
        let declared = vec![spec("input", None, true), spec("mode", Some("fast"), false)];
        let provided = vec!["--input=/data".to_string()];
        let parsed = parse_arguments(&declared, &provided, &coords()).unwrap();
        assert_eq!(parsed["input"], "/data");
        assert_eq!(parsed["mode"], "fast");
    }

    #[test]
    fn test_parse_last_duplicate_wins() {
        let declared = vec![spec("mode", None, false)];
        let provided = vec!["--mode=a".to_string(), "--mode=b".to_string()];
        let parsed = parse_arguments(&declared, &provided, &coords()).unwrap();
        assert_eq!(parsed["mode"], "b");
    }

    #[test]
    fn test_parse_rejects_unknown_and_missing() {
        let declared = vec![spec("input", None, true)];
        let err = parse_arguments(
            &declared,
            &["--nope=1".to_string()],
            &coords(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown argument"));

        let err = parse_arguments(&declared, &[], &coords()).unwrap_err();
        assert!(err.to_string().contains("missing required"));
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        let declared = vec![spec("input", None, false)];
        for bad in ["input=1", "--input", "--=x"] {
            let err =
                parse_arguments(&declared, &[bad.to_string()], &coords()).unwrap_err();
            assert!(err.to_string().contains("malformed"), "{}", bad);
        }
    }

    #[test]
    fn test_render_bindings_expands_placeholders() {
        let parsed = HashMap::from([
            ("dataset".to_string(), "/data/in".to_string()),
            ("mode".to_string(), "fast".to_string()),
        ]);
        let bindings = vec![
            ArgBinding {
                name: "input".to_string(),
                value: "${dataset}/raw".to_string(),
            },
            ArgBinding {
                name: "flags".to_string(),
                value: "literal".to_string(),
            },
        ];
        let tokens = render_bindings(&bindings, &parsed, &coords()).unwrap();
        assert_eq!(tokens, vec!["--input=/data/in/raw", "--flags=literal"]);
    }

    #[test]
    fn test_render_bindings_reports_missing_placeholder() {
        let bindings = vec![ArgBinding {
            name: "input".to_string(),
            value: "${absent}".to_string(),
        }];
        let err = render_bindings(&bindings, &HashMap::new(), &coords()).unwrap_err();
        assert!(err.to_string().contains("'absent'"));
    }

    #[test]
    fn test_encode_args_keeps_order() {
        let bindings = vec![
            ArgBinding {
                name: "b".to_string(),
                value: "2".to_string(),
            },
            ArgBinding {
                name: "a".to_string(),
                value: "1".to_string(),
            },
        ];
        assert_eq!(encode_args(&bindings), vec!["--b=2", "--a=1"]);
    }
}
