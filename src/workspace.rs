//! Artifact file names and read/write helpers shared by the stage commands.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const PROCESSED_FILE: &str = "processed.json";
pub const CODE_FILE: &str = "code.json";
pub const TOC_FILE: &str = "toc.yaml";
pub const POST_FILE: &str = "post.md";
pub const SECTIONS_FILE: &str = "sections.json";

/// Writes `contents` to `path`, creating parent directories.
///
/// Fails when the file exists unless `force` is set.
pub fn write_artifact(path: &Path, contents: &[u8], force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("output already exists: {}", path.display());
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut out = options
        .open(path)
        .with_context(|| format!("open output: {}", path.display()))?;
    out.write_all(contents)
        .with_context(|| format!("write: {}", path.display()))?;
    out.flush()
        .with_context(|| format!("flush: {}", path.display()))?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, force: bool) -> anyhow::Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize json: {}", path.display()))?;
    json.push('\n');
    write_artifact(path, json.as_bytes(), force)
}

pub fn write_yaml<T: Serialize + ?Sized>(path: &Path, value: &T, force: bool) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(value)
        .with_context(|| format!("serialize yaml: {}", path.display()))?;
    write_artifact(path, yaml.as_bytes(), force)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse json: {}", path.display()))
}

pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parse yaml: {}", path.display()))
}
