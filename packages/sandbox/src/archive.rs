// ABOUTME: In-memory tar helpers for single-file transfer into and out of containers
// ABOUTME: Packs one file into an archive and extracts a single-file archive's content

use std::io::Read;
use tar::{Archive, Builder, EntryType, Header};

/// Pack `content` as a single regular file named `file_name`
pub fn pack_file(file_name: &str, content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(EntryType::Regular);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();

    let mut archive = Builder::new(Vec::new());
    archive.append_data(&mut header, file_name, content)?;
    archive.into_inner()
}

/// Extract the content of the archive's first entry when it is a regular file
///
/// Returns `Ok(None)` for an empty archive or when the first entry is anything else. Archiving
/// a directory yields the directory entry first, followed by everything nested under it.
pub fn unpack_first_file(data: &[u8]) -> std::io::Result<Option<Vec<u8>>> {
    let mut archive = Archive::new(data);

    let Some(entry) = archive.entries()?.next() else {
        return Ok(None);
    };
    let mut entry = entry?;
    if !entry.header().entry_type().is_file() {
        return Ok(None);
    }

    let mut content = Vec::with_capacity(entry.header().size().unwrap_or(0) as usize);
    entry.read_to_end(&mut content)?;
    Ok(Some(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_then_unpack_preserves_bytes() {
        let content = b"{\n  \"name\": \"demo\"\n}\n\x00\xff";
        let tar = pack_file("package.json", content).unwrap();
        let unpacked = unpack_first_file(&tar).unwrap();
        assert_eq!(unpacked.as_deref(), Some(&content[..]));
    }

    #[test]
    fn test_unpack_directory_only_archive_returns_none() {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();

        let mut builder = Builder::new(Vec::new());
        builder
            .append_data(&mut header, "src/", std::io::empty())
            .unwrap();
        let tar = builder.into_inner().unwrap();

        assert_eq!(unpack_first_file(&tar).unwrap(), None);
    }

    #[test]
    fn test_unpack_ignores_files_nested_under_a_directory() {
        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();

        let secret = b"SECRET=1\n";
        let mut file = Header::new_gnu();
        file.set_entry_type(EntryType::Regular);
        file.set_size(secret.len() as u64);
        file.set_mode(0o644);
        file.set_cksum();

        let mut builder = Builder::new(Vec::new());
        builder
            .append_data(&mut dir, "repo/", std::io::empty())
            .unwrap();
        builder
            .append_data(&mut file, "repo/.env", &secret[..])
            .unwrap();
        let tar = builder.into_inner().unwrap();

        assert_eq!(unpack_first_file(&tar).unwrap(), None);
    }
}
