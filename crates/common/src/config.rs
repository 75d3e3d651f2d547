//! Config file and secret loading

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::secret::Secret;

/// Read and deserialize a TOML file.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Resolve a secret from an environment variable, falling back to a file.
///
/// Values are trimmed; an empty value counts as absent. A configured file
/// that cannot be read is an error, while an unset variable is not.
pub fn resolve_secret(env_var: &str, file: Option<&Path>) -> Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(Secret::non_blank(&value));
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(file).map_err(|source| Error::Io {
        path: file.to_path_buf(),
        source,
    })?;
    Ok(Secret::non_blank(&value))
}
