//! Deterministic content digest over a file tree.
//!
//! Only regular files contribute. Each file is hashed on its own, the
//! `(relative path, file hash)` pairs are sorted by path, and the final digest
//! is sha256 over `"{path}\0{hash}\n"` records. Paths always use `/`.

use std::{
    collections::BTreeSet,
    ffi::OsStr,
    io::{self, Cursor},
    path::{Component, Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use ignore::{
    overrides::{Override, OverrideBuilder},
    WalkBuilder,
};
use lamb_domain::{ContentDigest, IgnoreRules};
use lamb_store::compute_sha256;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;
use zip::ZipArchive;

use crate::DeployError;

const DEFAULT_IGNORED_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".DS_Store",
    ".venv",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".lamb.lock",
];
const DEFAULT_IGNORED_SUFFIXES: &[&str] = &[".pyc", ".pyo"];

/// A regular file selected for hashing and archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// `/`-separated path inside the digest and the archive.
    pub relative: String,
    pub path: PathBuf,
}

/// Digest of every selected file under `root`, with paths relative to `root`.
pub fn digest_tree(root: &Path, rules: &IgnoreRules) -> Result<ContentDigest> {
    let entries = collect_files(root, rules)?;
    digest_entries(&entries)
}

/// Digest over several roots. Each entry is prefixed with its root's own name,
/// so `src/app` contributes `app/...`; a file root contributes its file name.
pub fn digest_paths(paths: &[PathBuf], rules: &IgnoreRules) -> Result<ContentDigest> {
    let entries = collect_roots(paths, rules)?;
    digest_entries(&entries)
}

/// Recomputes the tree digest from the file entries of a zip archive.
pub fn digest_archive(bytes: &[u8]) -> Result<ContentDigest> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("archive is not a valid zip")?;
    let mut records = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .with_context(|| format!("failed to read archive entry #{index}"))?;
        if file.is_dir() || file.name().ends_with('/') {
            continue;
        }
        let name = file.name().to_string();
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)
            .with_context(|| format!("failed to decompress archive entry {name}"))?;
        records.push((name, format!("{:x}", hasher.finalize())));
    }
    records.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(digest_records(&records))
}

/// Hashes the given entries (in parallel) and folds them into one digest.
pub fn digest_entries(entries: &[TreeEntry]) -> Result<ContentDigest> {
    let mut records: Vec<(String, String)> = entries
        .par_iter()
        .map(|entry| {
            compute_sha256(&entry.path)
                .with_context(|| format!("failed to hash {}", entry.path.display()))
                .map(|hash| (entry.relative.clone(), hash))
        })
        .collect::<Result<_>>()?;
    records.sort_by(|a, b| a.0.cmp(&b.0));
    let digest = digest_records(&records);
    debug!(files = records.len(), digest = digest.short(12), "digest computed");
    Ok(digest)
}

fn digest_records(records: &[(String, String)]) -> ContentDigest {
    let mut hasher = Sha256::new();
    for (path, hash) in records {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    ContentDigest::from_bytes(&hasher.finalize())
}

/// Selected regular files under `root`, sorted by relative path.
pub fn collect_files(root: &Path, rules: &IgnoreRules) -> Result<Vec<TreeEntry>> {
    collect_files_skipping(root, rules, None)
}

/// Like [`collect_files`], but never descends into `skip`.
pub(crate) fn collect_files_skipping(
    root: &Path,
    rules: &IgnoreRules,
    skip: Option<&Path>,
) -> Result<Vec<TreeEntry>> {
    let metadata = root.symlink_metadata().map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            anyhow!(DeployError::InvalidInput(format!(
                "path {} does not exist",
                root.display()
            )))
        } else {
            anyhow!(err).context(format!("failed to inspect {}", root.display()))
        }
    })?;
    if metadata.is_file() {
        return collect_single_file(root, rules);
    }
    if !metadata.is_dir() {
        bail!(DeployError::InvalidInput(format!(
            "{} is neither a regular file nor a directory",
            root.display()
        )));
    }

    let overrides = build_overrides(root, rules)?;
    let mut walker = WalkBuilder::new(root);
    walker
        .standard_filters(false)
        .follow_links(false)
        .overrides(overrides)
        .sort_by_file_name(|a, b| a.cmp(b));
    let default_ignores = rules.default_ignores;
    let skip = skip.map(Path::to_path_buf);
    walker.filter_entry(move |entry| {
        if default_ignores && is_default_ignored(entry.file_name()) {
            return false;
        }
        !matches!(&skip, Some(skip) if entry.path() == skip.as_path())
    });

    let mut entries = Vec::new();
    for entry in walker.build() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escaped {}", entry.path().display(), root.display()))?;
        entries.push(TreeEntry {
            relative: normalize_relative(rel)?,
            path: entry.path().to_path_buf(),
        });
    }
    entries.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(entries)
}

/// Entries of several roots, each prefixed with its root's name.
pub(crate) fn collect_roots(paths: &[PathBuf], rules: &IgnoreRules) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut seen = BTreeSet::new();
    for root in paths {
        let name = root_name(root)?;
        let is_file = root.is_file();
        for entry in collect_files(root, rules)? {
            let relative = if is_file {
                entry.relative
            } else {
                format!("{name}/{}", entry.relative)
            };
            if !seen.insert(relative.clone()) {
                bail!(DeployError::InvalidInput(format!(
                    "more than one source provides {relative}"
                )));
            }
            entries.push(TreeEntry {
                relative,
                path: entry.path,
            });
        }
    }
    entries.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(entries)
}

fn collect_single_file(path: &Path, rules: &IgnoreRules) -> Result<Vec<TreeEntry>> {
    let name = root_name(path)?;
    if rules.default_ignores && is_default_ignored(OsStr::new(&name)) {
        return Ok(Vec::new());
    }
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let overrides = build_overrides(parent, rules)?;
    if overrides.matched(path, false).is_ignore() {
        return Ok(Vec::new());
    }
    Ok(vec![TreeEntry {
        relative: name,
        path: path.to_path_buf(),
    }])
}

fn build_overrides(root: &Path, rules: &IgnoreRules) -> Result<Override> {
    let mut builder = OverrideBuilder::new(root);
    for glob in &rules.include {
        builder
            .add(glob)
            .with_context(|| format!("invalid include pattern {glob:?}"))?;
    }
    // Added last so an exclude always wins over an include.
    for glob in &rules.exclude {
        builder
            .add(&format!("!{glob}"))
            .with_context(|| format!("invalid exclude pattern {glob:?}"))?;
    }
    builder.build().context("failed to compile ignore rules")
}

fn is_default_ignored(name: &OsStr) -> bool {
    let Some(name) = name.to_str() else {
        return false;
    };
    DEFAULT_IGNORED_NAMES.contains(&name)
        || DEFAULT_IGNORED_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
}

fn root_name(path: &Path) -> Result<String> {
    let canonical;
    let name = match path.file_name() {
        Some(name) => name,
        None => {
            canonical = path
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", path.display()))?;
            canonical
                .file_name()
                .ok_or_else(|| anyhow!("{} has no file name", path.display()))?
        }
    };
    name.to_str()
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("{} is not valid UTF-8", path.display()))
}

pub(crate) fn normalize_relative(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| anyhow!("{} is not valid UTF-8", rel.display()))?,
            ),
            Component::CurDir => {}
            _ => bail!("unexpected path component in {}", rel.display()),
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write");
    }

    #[test]
    fn digest_ignores_creation_order() -> Result<()> {
        let a = tempfile::tempdir()?;
        let b = tempfile::tempdir()?;
        write(a.path(), "pkg/x.py", "x");
        write(a.path(), "pkg/y.py", "y");
        write(a.path(), "top.txt", "t");
        write(b.path(), "top.txt", "t");
        write(b.path(), "pkg/y.py", "y");
        write(b.path(), "pkg/x.py", "x");
        assert_eq!(
            digest_tree(a.path(), &IgnoreRules::default())?,
            digest_tree(b.path(), &IgnoreRules::default())?
        );
        Ok(())
    }

    #[test]
    fn empty_directories_do_not_contribute() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "a.py", "a");
        let before = digest_tree(temp.path(), &IgnoreRules::default())?;
        fs::create_dir_all(temp.path().join("empty/nested"))?;
        assert_eq!(before, digest_tree(temp.path(), &IgnoreRules::default())?);
        Ok(())
    }

    #[test]
    fn one_byte_change_changes_digest() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "a.py", "print(1)");
        let before = digest_tree(temp.path(), &IgnoreRules::default())?;
        write(temp.path(), "a.py", "print(2)");
        assert_ne!(before, digest_tree(temp.path(), &IgnoreRules::default())?);
        Ok(())
    }

    #[test]
    fn renaming_a_file_changes_digest() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "a.py", "same");
        let before = digest_tree(temp.path(), &IgnoreRules::default())?;
        fs::rename(temp.path().join("a.py"), temp.path().join("b.py"))?;
        assert_ne!(before, digest_tree(temp.path(), &IgnoreRules::default())?);
        Ok(())
    }

    #[test]
    fn default_ignores_skip_caches() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "a.py", "a");
        let before = digest_tree(temp.path(), &IgnoreRules::default())?;
        write(temp.path(), "__pycache__/a.cpython-311.pyc", "junk");
        write(temp.path(), "pkg.pyc", "junk");
        write(temp.path(), ".git/HEAD", "ref");
        assert_eq!(before, digest_tree(temp.path(), &IgnoreRules::default())?);

        let keep_all = IgnoreRules {
            default_ignores: false,
            ..IgnoreRules::default()
        };
        assert_ne!(before, digest_tree(temp.path(), &keep_all)?);
        Ok(())
    }

    #[test]
    fn excludes_win_over_includes() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "app/main.py", "m");
        write(temp.path(), "app/test_main.py", "t");
        write(temp.path(), "README.md", "r");
        let rules = IgnoreRules::default()
            .with_include(["*.py"])
            .with_exclude(["test_*.py"]);
        let files: Vec<String> = collect_files(temp.path(), &rules)?
            .into_iter()
            .map(|entry| entry.relative)
            .collect();
        assert_eq!(files, vec!["app/main.py"]);
        Ok(())
    }

    #[test]
    fn anchored_excludes_prune_directories() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "python/boto3/__init__.py", "b");
        write(temp.path(), "python/boto3-1.34.0.dist-info/RECORD", "r");
        write(temp.path(), "python/requests/__init__.py", "q");
        write(temp.path(), "python/vendor/boto3/__init__.py", "nested");
        let rules = IgnoreRules::default().with_exclude(["/python/boto3*"]);
        let files: Vec<String> = collect_files(temp.path(), &rules)?
            .into_iter()
            .map(|entry| entry.relative)
            .collect();
        assert_eq!(
            files,
            vec!["python/requests/__init__.py", "python/vendor/boto3/__init__.py"]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_do_not_contribute() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "a.py", "a");
        let before = digest_tree(temp.path(), &IgnoreRules::default())?;
        std::os::unix::fs::symlink(temp.path().join("a.py"), temp.path().join("link.py"))?;
        assert_eq!(before, digest_tree(temp.path(), &IgnoreRules::default())?);
        Ok(())
    }

    #[test]
    fn digest_paths_prefixes_root_names() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "app/main.py", "m");
        write(temp.path(), "lambda_function.py", "h");
        let roots = vec![temp.path().join("app"), temp.path().join("lambda_function.py")];
        let entries = collect_roots(&roots, &IgnoreRules::default())?;
        let names: Vec<&str> = entries.iter().map(|e| e.relative.as_str()).collect();
        assert_eq!(names, vec!["app/main.py", "lambda_function.py"]);

        let staged = tempfile::tempdir()?;
        write(staged.path(), "app/main.py", "m");
        write(staged.path(), "lambda_function.py", "h");
        assert_eq!(
            digest_paths(&roots, &IgnoreRules::default())?,
            digest_tree(staged.path(), &IgnoreRules::default())?
        );
        Ok(())
    }

    #[test]
    fn duplicate_entries_across_roots_are_rejected() -> Result<()> {
        let temp = tempfile::tempdir()?;
        write(temp.path(), "one/app/x.py", "1");
        write(temp.path(), "two/app/x.py", "2");
        let roots = vec![temp.path().join("one/app"), temp.path().join("two/app")];
        assert!(digest_paths(&roots, &IgnoreRules::default()).is_err());
        Ok(())
    }

    #[test]
    fn missing_root_is_an_input_error() {
        let err = digest_tree(Path::new("/definitely/not/here"), &IgnoreRules::default())
            .unwrap_err();
        assert!(matches!(
            crate::error::deploy_error(&err),
            Some(DeployError::InvalidInput(_))
        ));
    }
}
