//! Loading of solution documents from disk.
//!
//! A load is parse + schema validation + normalization. The schema catches
//! structural mistakes with a readable message before serde gets involved;
//! normalization (see `model`) enforces the rules the schema cannot express,
//! like the one-dependency-shape requirement.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::errors::{AlmanacError, Result};
use crate::solution::model::{Solution, SolutionDoc};

/// File name of a solution document inside its package directory.
pub const SOLUTION_FILE_NAME: &str = "solution.yaml";

lazy_static::lazy_static! {
    static ref SOLUTION_SCHEMA: jsonschema::Validator =
        jsonschema::validator_for(&solution_schema()).expect("embedded solution schema is valid");
}

/// Load a solution from `path`, which may be the document itself or a
/// directory containing a `solution.yaml`.
pub fn load_solution(path: &Path) -> Result<Solution> {
    let file = resolve_solution_file(path)?;
    debug!("loading solution document from {}", file.display());
    let contents = std::fs::read_to_string(&file)
        .map_err(|e| AlmanacError::solution_load_with_source(&file, "cannot read document", e))?;
    parse_solution(&contents, &file)
}

/// Parse and validate document text; `origin` is used for error context only.
pub fn parse_solution(contents: &str, origin: &Path) -> Result<Solution> {
    let value: Value = serde_yaml::from_str(contents).map_err(|e| {
        AlmanacError::solution_load_with_source(origin, "document is not valid YAML", e)
    })?;
    if let Err(error) = SOLUTION_SCHEMA.validate(&value) {
        return Err(AlmanacError::solution_load(
            origin,
            format!("schema violation at {}: {}", error.instance_path, error),
        ));
    }
    let doc: SolutionDoc = serde_json::from_value(value).map_err(|e| {
        AlmanacError::solution_load_with_source(origin, "document does not deserialize", e)
    })?;
    doc.into_solution(origin)
}

/// Locate the document file for `path`.
pub fn resolve_solution_file(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        let candidate = path.join(SOLUTION_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(AlmanacError::solution_load(
            path,
            format!("directory contains no {}", SOLUTION_FILE_NAME),
        ));
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    Err(AlmanacError::solution_load(
        path,
        "no such file or directory",
    ))
}

fn solution_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["setup"],
        "properties": {
            "setup": {
                "type": "object",
                "required": ["group", "name", "version"],
                "properties": {
                    "group": { "type": "string", "minLength": 1 },
                    "name": { "type": "string", "minLength": 1 },
                    "version": { "type": "string", "minLength": 1 },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "license": { "type": "string" },
                    "doi": { "type": "string" },
                    "changelog": { "type": "string" },
                    "solution_creators": { "type": "array", "items": { "type": "string" } },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "documentation": { "type": "array", "items": { "type": "string" } },
                    "cite": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["text"],
                            "properties": {
                                "text": { "type": "string" },
                                "doi": { "type": "string" },
                                "url": { "type": "string" }
                            }
                        }
                    },
                    "args": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name"],
                            "properties": {
                                "name": { "type": "string", "minLength": 1 },
                                "description": { "type": "string" },
                                "default": { "type": "string" },
                                "required": { "type": "boolean" }
                            }
                        }
                    },
                    "dependencies": {
                        "type": "object",
                        "properties": {
                            "parent": { "$ref": "#/definitions/childRef" },
                            "steps": {
                                "type": "array",
                                "items": {
                                    "anyOf": [
                                        { "$ref": "#/definitions/childRef" },
                                        {
                                            "type": "array",
                                            "items": { "$ref": "#/definitions/childRef" }
                                        }
                                    ]
                                }
                            }
                        }
                    }
                }
            },
            "run": { "type": "string" },
            "install": { "type": "string" },
            "test": { "type": "string" },
            "uninstall": { "type": "string" }
        },
        "definitions": {
            "childRef": {
                "type": "object",
                "required": ["group", "name", "version"],
                "properties": {
                    "group": { "type": "string", "minLength": 1 },
                    "name": { "type": "string", "minLength": 1 },
                    "version": { "type": "string", "minLength": 1 },
                    "args": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name", "value"],
                            "properties": {
                                "name": { "type": "string", "minLength": 1 },
                                "value": { "type": "string" }
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_document() {
        let solution = parse_solution(
            r#"
setup:
  group: grp
  name: sol
  version: 1.0.0
  title: A solution
  args:
    - name: input
      required: true
run: |
  echo run
"#,
            Path::new("solution.yaml"),
        )
        .unwrap();
        assert_eq!(solution.setup.title.as_deref(), Some("A solution"));
        assert!(solution.setup.args[0].required);
    }

    #[test]
    fn test_schema_rejects_missing_version() {
        let err = parse_solution(
            "setup:\n  group: grp\n  name: sol\n",
            Path::new("solution.yaml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("schema violation"), "{}", err);
    }

    #[test]
    fn test_schema_rejects_non_string_script() {
        let err = parse_solution(
            "setup:\n  group: grp\n  name: sol\n  version: 1.0.0\nrun: 42\n",
            Path::new("solution.yaml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("schema violation"), "{}", err);
    }

    #[test]
    fn test_invalid_yaml_is_a_load_error() {
        let err = parse_solution("setup: [unclosed", Path::new("solution.yaml")).unwrap_err();
        assert!(err.to_string().contains("not valid YAML"), "{}", err);
    }
}
