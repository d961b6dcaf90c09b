use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::errors::AlmanacError;

/// The immutable (group, name, version) identity of a solution.
///
/// Equality, ordering, and hashing all key on the full tuple; the string
/// form is `group:name:version` and is used as the lookup key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinates {
    group: String,
    name: String,
    version: String,
}

impl Coordinates {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// True when every segment is non-empty. Index entries failing this are
    /// treated as corruption, not as resolvable solutions.
    pub fn is_complete(&self) -> bool {
        !self.group.is_empty() && !self.name.is_empty() && !self.version.is_empty()
    }

    /// Relative cache path of this solution below a catalog's `solutions/`
    /// directory.
    pub fn as_relative_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.group)
            .join(&self.name)
            .join(&self.version)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

impl FromStr for Coordinates {
    type Err = AlmanacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split(':').collect();
        if segments.len() != 3 || segments.iter().any(|part| part.is_empty()) {
            return Err(AlmanacError::unresolved(s));
        }
        Ok(Self::new(segments[0], segments[1], segments[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let coords = Coordinates::new("grp", "sol", "1.0.0");
        assert_eq!(coords.to_string(), "grp:sol:1.0.0");
        let parsed: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        assert_eq!(parsed, coords);
    }

    #[test]
    fn test_rejects_wrong_segment_counts() {
        assert!("grp:sol".parse::<Coordinates>().is_err());
        assert!("grp:sol:1.0.0:extra".parse::<Coordinates>().is_err());
        assert!("grp::1.0.0".parse::<Coordinates>().is_err());
        assert!("".parse::<Coordinates>().is_err());
    }

    #[test]
    fn test_ordering_is_tuple_ordering() {
        let a = Coordinates::new("a", "z", "2.0.0");
        let b = Coordinates::new("b", "a", "1.0.0");
        assert!(a < b);
        let v1 = Coordinates::new("a", "s", "1.0.0");
        let v2 = Coordinates::new("a", "s", "2.0.0");
        assert!(v1 < v2);
    }

    #[test]
    fn test_relative_path_layout() {
        let coords = Coordinates::new("grp", "sol", "1.0.0");
        assert_eq!(
            coords.as_relative_path(),
            std::path::PathBuf::from("grp/sol/1.0.0")
        );
    }
}
