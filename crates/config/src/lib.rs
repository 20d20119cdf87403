//! Provides Gatehouse's configuration and configuration management functionality.

mod config;
pub mod directive;
mod duration;
mod errors;
pub mod toml;

pub use crate::config::*;
pub use crate::duration::*;
pub use crate::errors::*;

use std::path::Path;

/// Loads an `extauth` directive file.
///
/// See [`directive::parse`] for the accepted syntax.
pub fn load_directive<'a, P>(path: &'a P) -> Result<ExtAuth, ConfigFileError>
where
    P: 'a + ?Sized + AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigFileError::NotFound(path.to_path_buf()));
    }
    tracing::debug!(message = "load directive", path = %path.display());
    let text = std::fs::read_to_string(path)?;
    Ok(directive::parse(&text)?)
}
