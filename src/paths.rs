//! Path helpers for editable files and batch output locations
//!
//! Texture extensions are matched case-insensitively (`.DDS` and `.dds`
//! are the same container), and side-car lookups follow suit since mod
//! trees often mix case.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::textures::{ContainerKind, EditableAsset};

/// Lowercased extension of a path, if any
pub fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// True if the path has a texture container extension
pub fn is_texture_path(path: &Path) -> bool {
    extension(path).is_some_and(|ext| ContainerKind::from_extension(&ext).is_some())
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "texture".to_string())
}

/// Editable PNG and side-car for a source texture.
///
/// Without a `root` both land flat in `work_dir` as `<stem>.png` and
/// `<stem>.json`. With one, the source's folders under `root` are mirrored
/// into `work_dir` so same-named textures in different folders stay apart.
pub fn editable_paths(source: &Path, root: Option<&Path>, work_dir: &Path) -> EditableAsset {
    let image_path = match root {
        Some(root) => mirrored_output(source, root, work_dir, "png"),
        None => work_dir.join(format!("{}.png", stem(source))),
    };
    EditableAsset {
        metadata_path: sidecar_for(&image_path),
        image_path,
    }
}

/// Paths that appear more than once, compared case-insensitively.
///
/// Two sources sharing an output would overwrite each other's files.
pub fn colliding_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut collisions = Vec::new();
    for path in paths {
        let count = seen.entry(path.to_string_lossy().to_lowercase()).or_default();
        *count += 1;
        if *count == 2 {
            collisions.push(path.to_path_buf());
        }
    }
    collisions
}

/// Side-car path that pairs with an edited image
pub fn sidecar_for(image: &Path) -> PathBuf {
    image.with_extension("json")
}

/// Existing side-car for an edited image, matching the stem case-insensitively
pub fn find_sidecar(image: &Path) -> Option<PathBuf> {
    let exact = sidecar_for(image);
    if exact.is_file() {
        return Some(exact);
    }

    let dir = image.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let target = format!("{}.json", stem(image)).to_lowercase();
    std::fs::read_dir(dir).ok()?.find_map(|entry| {
        let entry = entry.ok()?;
        let name = entry.file_name();
        (name.to_string_lossy().to_lowercase() == target).then(|| entry.path())
    })
}

/// Output location for `input` when mirroring `root` into `out_dir`.
///
/// Inputs outside `root` land directly in `out_dir`.
pub fn mirrored_output(input: &Path, root: &Path, out_dir: &Path, extension: &str) -> PathBuf {
    let relative = input
        .strip_prefix(root)
        .ok()
        .filter(|r| !r.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(input.file_name().unwrap_or(input.as_os_str())));
    out_dir.join(relative).with_extension(extension)
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
