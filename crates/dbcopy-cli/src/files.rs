//! Output directories, JSON documents and ZIP archives of the file tree.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dbcopy_core::DbcopyError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn io_error(msg: String) -> anyhow::Error {
    DbcopyError::Io(msg).into()
}

/// # Errors
/// Returns `Io` when the document cannot be serialized or written.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|err| io_error(format!("failed to serialize {}: {err}", path.display())))?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

/// # Errors
/// Returns `Io` when the file cannot be read or is not valid JSON of `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&body).map_err(|err| io_error(format!("invalid json in {}: {err}", path.display())))
}

/// Like [`read_json`], `None` when the file does not exist.
///
/// # Errors
/// Returns `Io` when an existing file cannot be read or parsed.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if path.is_file() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

/// # Errors
/// Returns `Io` when the directory cannot be created.
pub fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create directory {}", dir.display()))
}

/// Create the output directory, removing previous content unless `keep`.
///
/// # Errors
/// Returns `Io` when the directory cannot be removed or created.
pub fn prepare_output_dir(dir: &Path, keep: bool) -> Result<()> {
    if !keep && dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("failed to remove output directory {}", dir.display()))?;
    }
    create_dir(dir)
}

fn zip_path_of(dir: &Path) -> PathBuf {
    let mut name = dir.components().as_path().as_os_str().to_owned();
    name.push(".zip");
    PathBuf::from(name)
}

fn entry_name(base: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| io_error(format!("{} is outside of {}", path.display(), base.display())))?;
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Ok(parts.join("/"))
}

/// Pack `dir` into `{dir}.zip`, entries named relative to the parent of
/// `dir`. Returns the archive path.
///
/// # Errors
/// Returns `Io` when a file cannot be read or the archive cannot be written.
pub fn pack_dir(dir: &Path) -> Result<PathBuf> {
    let dir = dir.components().as_path().to_path_buf();
    let zip_path = zip_path_of(&dir);
    let base = dir.parent().map(Path::to_path_buf).unwrap_or_default();
    let zip_err = |err: zip::result::ZipError| io_error(format!("failed to write {}: {err}", zip_path.display()));

    let file = File::create(&zip_path).with_context(|| format!("failed to create {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut pending = vec![dir.clone()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current)
            .with_context(|| format!("failed to list {}", current.display()))?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .with_context(|| format!("failed to list {}", current.display()))?;
        entries.sort();
        for path in entries {
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            zip.start_file(entry_name(&base, &path)?, options).map_err(zip_err)?;
            let mut src = File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            io::copy(&mut src, &mut zip).with_context(|| format!("failed to pack {}", path.display()))?;
        }
    }
    zip.finish().map_err(zip_err)?;
    Ok(zip_path)
}

/// Unpacked model archive; the scratch directory is removed on drop.
pub struct Unpacked {
    _scratch: TempDir,
    pub root: PathBuf,
}

/// Unpack `{inputDir}/{model}.zip`, or `{inputDir}.zip` when that is missing,
/// into a scratch directory. When the archive holds a single top directory
/// the tree root is that directory.
///
/// # Errors
/// Returns `NotFound` when there is no archive and `Io` when it cannot be unpacked.
pub fn unpack_model_zip(input_dir: &Path, model_name: &str) -> Result<Unpacked> {
    let candidates = [input_dir.join(format!("{model_name}.zip")), zip_path_of(input_dir)];
    let Some(zip_path) = candidates.iter().find(|p| p.is_file()) else {
        return Err(DbcopyError::not_found(format!("zip archive not found: {}", candidates[0].display())).into());
    };

    let file = File::open(zip_path).with_context(|| format!("failed to open {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| io_error(format!("failed to read {}: {err}", zip_path.display())))?;
    let scratch = tempfile::tempdir().context("failed to create scratch directory")?;
    archive
        .extract(scratch.path())
        .map_err(|err| io_error(format!("failed to unpack {}: {err}", zip_path.display())))?;
    tracing::debug!(zip = %zip_path.display(), dir = %scratch.path().display(), "unpacked archive");

    let top = fs::read_dir(scratch.path())
        .with_context(|| format!("failed to list {}", scratch.path().display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list {}", scratch.path().display()))?;
    let root = match top.as_slice() {
        [only] if only.is_dir() => only.clone(),
        _ => scratch.path().to_path_buf(),
    };
    Ok(Unpacked { _scratch: scratch, root })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_then_unpack_keeps_the_tree() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let out = tmp.path().join("modelOne");
        create_dir(&out.join("run.r1").join("parameters"))?;
        fs::write(out.join("modelOne.model.json"), "{}")?;
        fs::write(out.join("run.r1").join("parameters").join("ageSex.csv"), "sub_id,dim0,param_value\n")?;

        let zip = pack_dir(&out)?;
        assert_eq!(zip, tmp.path().join("modelOne.zip"));

        let unpacked = unpack_model_zip(&out, "other")?;
        assert!(unpacked.root.ends_with("modelOne"));
        assert!(unpacked.root.join("run.r1").join("parameters").join("ageSex.csv").is_file());
        assert_eq!(fs::read_to_string(unpacked.root.join("modelOne.model.json"))?, "{}");
        Ok(())
    }

    #[test]
    fn missing_archive_is_not_found() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let err = match unpack_model_zip(tmp.path(), "modelOne") {
            Ok(_) => panic!("archive found in an empty directory"),
            Err(err) => err,
        };
        assert_eq!(dbcopy_core::classify(err.as_ref()), dbcopy_core::ErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn output_dir_is_cleaned_unless_kept() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let out = tmp.path().join("o");
        create_dir(&out)?;
        fs::write(out.join("old.csv"), "x")?;

        prepare_output_dir(&out, true)?;
        assert!(out.join("old.csv").exists());
        prepare_output_dir(&out, false)?;
        assert!(out.is_dir());
        assert!(!out.join("old.csv").exists());
        Ok(())
    }
}
