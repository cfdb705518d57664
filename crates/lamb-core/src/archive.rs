use std::{
    fs::{self, File},
    io::{self, BufWriter},
    path::Path,
};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use zip::{write::FileOptions, CompressionMethod, DateTime, ZipWriter};

use crate::hasher::TreeEntry;

const FILE_MODE: u32 = 0o644;

/// Writes `entries` into a zip at `dest`, in relative-path order, with a fixed
/// timestamp (1980-01-01) and fixed permissions. The same entries always
/// produce the same bytes. Returns the archive size.
pub fn write_archive(entries: &[TreeEntry], dest: &Path) -> Result<u64> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create a temporary archive in {}", parent.display()))?;

    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.relative.cmp(&b.relative));

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(FILE_MODE);
    let mut zip = ZipWriter::new(BufWriter::new(tmp.reopen()?));
    for entry in sorted {
        zip.start_file(entry.relative.as_str(), options)
            .with_context(|| format!("failed to add {} to archive", entry.relative))?;
        let mut file = File::open(&entry.path)
            .with_context(|| format!("failed to open {}", entry.path.display()))?;
        io::copy(&mut file, &mut zip)
            .with_context(|| format!("failed to compress {}", entry.path.display()))?;
    }
    let mut writer = zip.finish().context("failed to finalize archive")?;
    io::Write::flush(&mut writer)?;
    drop(writer);

    tmp.persist(dest)
        .with_context(|| format!("failed to write {}", dest.display()))?;
    let size = fs::metadata(dest)?.len();
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{collect_files, digest_archive, digest_entries};
    use lamb_domain::IgnoreRules;

    #[test]
    fn archives_are_byte_identical_across_runs() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("pkg"))?;
        fs::write(src.join("pkg/a.py"), "a = 1\n")?;
        fs::write(src.join("b.txt"), "bee")?;
        let entries = collect_files(&src, &IgnoreRules::default())?;

        let first = temp.path().join("one.zip");
        let second = temp.path().join("two.zip");
        write_archive(&entries, &first)?;
        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(src.join("b.txt"), "bee")?;
        write_archive(&entries, &second)?;
        assert_eq!(fs::read(&first)?, fs::read(&second)?);
        Ok(())
    }

    #[test]
    fn archive_digest_matches_tree_digest() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("python/lib"))?;
        fs::write(src.join("python/lib/__init__.py"), "")?;
        fs::write(src.join("python/lib/core.py"), "def f():\n    return 1\n")?;
        let entries = collect_files(&src, &IgnoreRules::default())?;
        let dest = temp.path().join("layer.zip");
        let size = write_archive(&entries, &dest)?;
        assert!(size > 0);
        assert_eq!(digest_archive(&fs::read(&dest)?)?, digest_entries(&entries)?);
        Ok(())
    }
}
