use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the almanac library.
#[derive(Debug, Error)]
pub enum AlmanacError {
    /// The input string could not be mapped to any solution through the
    /// path / url / doi / coordinates cases.
    #[error("cannot resolve '{reference}': not an existing path, url, doi, or coordinate reference")]
    UnresolvedReference { reference: String },

    /// A `catalog:group:name:version` reference named a catalog that is not
    /// configured in the collection.
    #[error("catalog '{name}' is not configured in this collection")]
    UnknownCatalog { name: String },

    /// A lookup that must have exactly one winner found several.
    #[error("ambiguous result for '{subject}': {candidates:?}")]
    AmbiguousResult {
        subject: String,
        candidates: Vec<String>,
    },

    /// A DOI match points at a structurally incomplete index entry. The
    /// index invariants make this impossible unless the file was hand-edited.
    #[error("index entry for doi '{doi}' is not a complete solution record ({detail})")]
    NotALeaf { doi: String, detail: String },

    /// Coordinates or DOI already present in the target catalog.
    #[error("solution '{coordinates}' already exists in catalog '{catalog}'")]
    DuplicateSolution {
        catalog: String,
        coordinates: String,
    },

    /// The cache catalog cannot be removed from the collection.
    #[error("catalog '{name}' is protected and cannot be removed")]
    ProtectedCatalog { name: String },

    /// run/test require a prior install.
    #[error("solution '{coordinates}' is not installed; install it first")]
    NotInstalled { coordinates: String },

    /// A solution document could not be loaded into a solution object.
    #[error("failed to load solution document {path:?}: {reason}")]
    SolutionLoad {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The parent/step graph of a solution references itself.
    #[error("dependency cycle while expanding '{chain}'")]
    DependencyCycle { chain: String },

    /// Declared-argument violations: missing required, unknown name, or an
    /// unresolvable `${...}` binding.
    #[error("argument error for '{coordinates}': {message}")]
    Argument {
        coordinates: String,
        message: String,
    },

    /// A queued script exited non-zero.
    #[error("'{action}' script of '{coordinates}' failed with exit status {exit_status}")]
    ScriptFailure {
        coordinates: String,
        action: String,
        exit_status: i32,
    },

    /// Content download failed. Unlike an index refresh there is no stale
    /// fallback for solution content, so this is fatal to the resolution.
    #[error("download of '{url}' failed")]
    Download {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Catalog transport (clone/update of a remote catalog) failed.
    #[error("transport failure for catalog '{catalog}'")]
    Transport {
        catalog: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The environment collaborator refused to create or run in an
    /// environment.
    #[error("environment '{name}' failed")]
    Environment {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Collection database failure.
    #[error("collection database operation '{operation}' failed")]
    Database {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Filesystem failure outside the collection database.
    #[error("io failure during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding failure for a persisted format.
    #[error("{format} serialization failed")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid configuration value.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl AlmanacError {
    pub fn unresolved<S: Into<String>>(reference: S) -> Self {
        Self::UnresolvedReference {
            reference: reference.into(),
        }
    }

    pub fn unknown_catalog<S: Into<String>>(name: S) -> Self {
        Self::UnknownCatalog { name: name.into() }
    }

    pub fn ambiguous<S: Into<String>>(subject: S, candidates: Vec<String>) -> Self {
        Self::AmbiguousResult {
            subject: subject.into(),
            candidates,
        }
    }

    pub fn not_a_leaf<S: Into<String>, D: Into<String>>(doi: S, detail: D) -> Self {
        Self::NotALeaf {
            doi: doi.into(),
            detail: detail.into(),
        }
    }

    pub fn duplicate<S: Into<String>, C: Into<String>>(catalog: S, coordinates: C) -> Self {
        Self::DuplicateSolution {
            catalog: catalog.into(),
            coordinates: coordinates.into(),
        }
    }

    pub fn protected_catalog<S: Into<String>>(name: S) -> Self {
        Self::ProtectedCatalog { name: name.into() }
    }

    pub fn not_installed<S: Into<String>>(coordinates: S) -> Self {
        Self::NotInstalled {
            coordinates: coordinates.into(),
        }
    }

    pub fn solution_load<S: Into<String>>(path: impl Into<PathBuf>, reason: S) -> Self {
        Self::SolutionLoad {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn solution_load_with_source<S, E>(path: impl Into<PathBuf>, reason: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::SolutionLoad {
            path: path.into(),
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn solution_load_cause<S: Into<String>>(
        path: impl Into<PathBuf>,
        reason: S,
        source: anyhow::Error,
    ) -> Self {
        Self::SolutionLoad {
            path: path.into(),
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn cycle<S: Into<String>>(chain: S) -> Self {
        Self::DependencyCycle {
            chain: chain.into(),
        }
    }

    pub fn argument<C: Into<String>, M: Into<String>>(coordinates: C, message: M) -> Self {
        Self::Argument {
            coordinates: coordinates.into(),
            message: message.into(),
        }
    }

    pub fn script_failure<C: Into<String>, A: Into<String>>(
        coordinates: C,
        action: A,
        exit_status: i32,
    ) -> Self {
        Self::ScriptFailure {
            coordinates: coordinates.into(),
            action: action.into(),
            exit_status,
        }
    }

    pub fn download<S: Into<String>>(url: S, source: anyhow::Error) -> Self {
        Self::Download {
            url: url.into(),
            source: source.into(),
        }
    }

    pub fn transport<S: Into<String>>(catalog: S, source: anyhow::Error) -> Self {
        Self::Transport {
            catalog: catalog.into(),
            source: source.into(),
        }
    }

    pub fn environment<S: Into<String>>(name: S, source: anyhow::Error) -> Self {
        Self::Environment {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn database<S: Into<String>, E>(operation: S, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Database {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Coarse category for logging and task reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::UnresolvedReference { .. } | Self::UnknownCatalog { .. } => "reference",
            Self::AmbiguousResult { .. }
            | Self::NotALeaf { .. }
            | Self::DuplicateSolution { .. } => "index",
            Self::ProtectedCatalog { .. } => "catalog",
            Self::NotInstalled { .. } => "install-state",
            Self::SolutionLoad { .. } => "load",
            Self::DependencyCycle { .. } | Self::Argument { .. } => "queue",
            Self::ScriptFailure { .. } => "execution",
            Self::Download { .. } | Self::Transport { .. } | Self::Environment { .. } => {
                "collaborator"
            }
            Self::Database { .. } | Self::Io { .. } | Self::Serialization { .. } => "storage",
            Self::Configuration { .. } => "configuration",
        }
    }

    /// True for errors that describe the caller's input rather than system
    /// state; these are surfaced verbatim and never retried.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedReference { .. }
                | Self::UnknownCatalog { .. }
                | Self::NotInstalled { .. }
                | Self::Argument { .. }
        )
    }
}

/// Result type alias for the almanac library.
pub type Result<T> = std::result::Result<T, AlmanacError>;

impl From<std::io::Error> for AlmanacError {
    fn from(err: std::io::Error) -> Self {
        Self::io("filesystem access", err)
    }
}

impl From<serde_json::Error> for AlmanacError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "json".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_yaml::Error> for AlmanacError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            format: "yaml".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<sled::Error> for AlmanacError {
    fn from(err: sled::Error) -> Self {
        Self::database("sled", err)
    }
}

impl From<bincode::Error> for AlmanacError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization {
            format: "bincode".to_string(),
            source: err,
        }
    }
}
