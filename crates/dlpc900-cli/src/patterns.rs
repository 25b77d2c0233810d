//! Pattern image loading.

use anyhow::{bail, Context, Result};
use dlpc900_hw::{BitPlane, DMD_HEIGHT, DMD_WIDTH};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads one pattern image; any non-black pixel turns its mirror on.
pub fn load_plane(path: &Path) -> Result<BitPlane> {
    let image = image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_luma8();

    if image.width() != DMD_WIDTH as u32 || image.height() != DMD_HEIGHT as u32 {
        bail!(
            "{} is {}x{}, patterns must be {}x{}",
            path.display(),
            image.width(),
            image.height(),
            DMD_WIDTH,
            DMD_HEIGHT
        );
    }

    BitPlane::from_luma8(image.as_raw())
        .with_context(|| format!("Failed to convert {}", path.display()))
}

/// Expands directories into their files, sorted by name.
pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut expanded = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.retain(|p| p.is_file());
            entries.sort();
            expanded.extend(entries);
        } else {
            expanded.push(path.clone());
        }
    }
    Ok(expanded)
}

/// Loads pattern images in display order.
pub fn load_planes(paths: &[PathBuf]) -> Result<Vec<BitPlane>> {
    let files = expand_paths(paths)?;
    if files.is_empty() {
        bail!("No pattern images given");
    }
    files
        .iter()
        .map(|path| {
            debug!("Loading pattern {}", path.display());
            load_plane(path)
        })
        .collect()
}
