//! Classification of user-supplied reference strings.
//!
//! The five cases are tried in fixed precedence, first match wins: an
//! existing filesystem path, a URL, a DOI (`doi:` prefix or a bare
//! `10.<registrant>/<suffix>` pattern), `group:name:version`, and
//! `catalog:group:name:version`.

use std::path::{Path, PathBuf};

use crate::core::errors::{AlmanacError, Result};
use crate::solution::Coordinates;

#[derive(Debug, Clone, PartialEq)]
pub enum SolutionRef {
    Path(PathBuf),
    Url(String),
    Doi(String),
    Coordinates(Coordinates),
    CatalogCoordinates {
        catalog: String,
        coordinates: Coordinates,
    },
}

pub fn parse_reference(input: &str) -> Result<SolutionRef> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AlmanacError::unresolved(input));
    }

    if Path::new(trimmed).exists() {
        return Ok(SolutionRef::Path(PathBuf::from(trimmed)));
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(SolutionRef::Url(trimmed.to_string()));
    }

    if let Some(doi) = trimmed.strip_prefix("doi:") {
        if doi.is_empty() {
            return Err(AlmanacError::unresolved(input));
        }
        return Ok(SolutionRef::Doi(doi.to_string()));
    }
    if looks_like_doi(trimmed) {
        return Ok(SolutionRef::Doi(trimmed.to_string()));
    }

    let segments: Vec<&str> = trimmed.split(':').collect();
    match segments.as_slice() {
        [group, name, version] if no_empty(&[group, name, version]) => Ok(
            SolutionRef::Coordinates(Coordinates::new(*group, *name, *version)),
        ),
        [catalog, group, name, version] if no_empty(&[catalog, group, name, version]) => {
            Ok(SolutionRef::CatalogCoordinates {
                catalog: (*catalog).to_string(),
                coordinates: Coordinates::new(*group, *name, *version),
            })
        }
        _ => Err(AlmanacError::unresolved(input)),
    }
}

/// Bare DOIs look like `10.<registrant>/<suffix>`.
fn looks_like_doi(s: &str) -> bool {
    let Some((prefix, suffix)) = s.split_once('/') else {
        return false;
    };
    let Some(registrant) = prefix.strip_prefix("10.") else {
        return false;
    };
    !registrant.is_empty()
        && registrant.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !suffix.is_empty()
}

fn no_empty(parts: &[&&str]) -> bool {
    parts.iter().all(|part| !part.is_empty())
}
