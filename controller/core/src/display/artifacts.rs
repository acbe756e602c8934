//! Pre-rendered artifact loading
//!
//! The renderer (a separate process) drops two PNGs per state into the data
//! directory, one per ink layer: `<state>_b.png` for black and
//! `<state>_r.png` for red. The controller only moves these bytes to the
//! panel, so validation stops at the file signature.

use std::path::{Path, PathBuf};

use crate::engine::table::StateId;
use crate::error::ArtifactError;

/// Leading bytes of every PNG file
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// The two ink-layer images for one state
#[derive(Debug, Clone)]
pub struct StateArtifacts {
    /// Black layer image, PNG-encoded
    pub black: Vec<u8>,
    /// Red layer image, PNG-encoded
    pub red: Vec<u8>,
}

/// Path of the black-layer artifact for `state`
#[must_use]
pub fn black_path(dir: &Path, state: &StateId) -> PathBuf {
    dir.join(format!("{state}_b.png"))
}

/// Path of the red-layer artifact for `state`
#[must_use]
pub fn red_path(dir: &Path, state: &StateId) -> PathBuf {
    dir.join(format!("{state}_r.png"))
}

/// Load both layer images for `state` from `dir`.
///
/// # Errors
///
/// [`ArtifactError::Missing`] when a file is absent or unreadable,
/// [`ArtifactError::Corrupt`] when it does not start with a PNG signature.
pub async fn load(dir: &Path, state: &StateId) -> Result<StateArtifacts, ArtifactError> {
    let black = read_layer(black_path(dir, state)).await?;
    let red = read_layer(red_path(dir, state)).await?;
    Ok(StateArtifacts { black, red })
}

async fn read_layer(path: PathBuf) -> Result<Vec<u8>, ArtifactError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| ArtifactError::Missing {
            path: path.clone(),
            source,
        })?;
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(ArtifactError::Corrupt { path });
    }
    Ok(bytes)
}
