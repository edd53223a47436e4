//! Reading target bytes and text
//!
//! Targets are local files, remote files fetched into the cache, or members of a zip
//! archive. Text is decoded with `encoding_rs`; plain UTF-8 files are streamed straight
//! from disk instead of being read into memory.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, warn};

use super::GeneratorContext;
use super::error::GeneratorError;
use crate::location::{AppUrl, extension_of};

/// Local path of the file a URL points at, downloading it if needed
///
/// For archive targets this is the archive itself.
pub fn local_path(url: &AppUrl, ctx: &GeneratorContext) -> Result<PathBuf, GeneratorError> {
    Ok(ctx.downloader().resolve(&url.without_fragment())?)
}

/// Raw bytes of the target, extracting archive members
pub fn read_bytes(url: &AppUrl, ctx: &GeneratorContext) -> Result<Vec<u8>, GeneratorError> {
    let path = local_path(url, ctx)?;
    if url.is_archive() {
        let format = url.target_format();
        read_archive_member(&path, url.target_member(), format.as_deref())
    } else {
        std::fs::read(&path).map_err(|e| GeneratorError::io(&path, e))
    }
}

/// Decoded text of the target
pub fn read_text(url: &AppUrl, ctx: &GeneratorContext) -> Result<String, GeneratorError> {
    let bytes = read_bytes(url, ctx)?;
    decode(&bytes, &ctx.encoding_for(url))
}

/// A UTF-8 reader over the target's text
pub fn open_text(url: &AppUrl, ctx: &GeneratorContext) -> Result<Box<dyn Read>, GeneratorError> {
    let label = ctx.encoding_for(url);
    let encoding = lookup_encoding(&label)?;

    if encoding == UTF_8 && !url.is_archive() {
        let path = local_path(url, ctx)?;
        let file = File::open(&path).map_err(|e| GeneratorError::io(&path, e))?;
        return Ok(Box::new(BufReader::new(file)));
    }

    let text = decode(&read_bytes(url, ctx)?, &label)?;
    Ok(Box::new(Cursor::new(text.into_bytes())))
}

/// Read one member of a zip archive
///
/// Without a member name, the first file with the wanted extension is used, or the
/// first file at all.
pub fn read_archive_member(
    archive_path: &Path,
    member: Option<&str>,
    format: Option<&str>,
) -> Result<Vec<u8>, GeneratorError> {
    let file = File::open(archive_path).map_err(|e| GeneratorError::io(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let name = match member {
        Some(member) => member.to_string(),
        None => {
            let files: Vec<&str> = archive.file_names().filter(|n| !n.ends_with('/')).collect();
            let chosen = format
                .and_then(|f| {
                    files
                        .iter()
                        .copied()
                        .find(|n| extension_of(n).as_deref() == Some(f))
                })
                .or_else(|| files.first().copied());
            chosen
                .map(str::to_string)
                .ok_or_else(|| GeneratorError::ArchiveMember {
                    archive: archive_path.to_path_buf(),
                    member: "*".to_string(),
                })?
        }
    };
    debug!("Reading {} from {}", name, archive_path.display());

    let mut entry = archive.by_name(&name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => GeneratorError::ArchiveMember {
            archive: archive_path.to_path_buf(),
            member: name.clone(),
        },
        other => GeneratorError::Zip(other),
    })?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| GeneratorError::io(archive_path, e))?;
    Ok(bytes)
}

/// Decode bytes with an encoding label; a byte order mark takes precedence
pub fn decode(bytes: &[u8], label: &str) -> Result<String, GeneratorError> {
    let encoding = lookup_encoding(label)?;
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("Malformed {} input replaced while decoding", used.name());
    }
    Ok(text.into_owned())
}

fn lookup_encoding(label: &str) -> Result<&'static Encoding, GeneratorError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| GeneratorError::Encoding(label.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in members {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_decode_latin1() {
        let text = decode(&[0x63, 0x61, 0x66, 0xe9], "latin1").unwrap();
        assert_eq!(text, "café");
        assert!(matches!(decode(b"x", "klingon"), Err(GeneratorError::Encoding(_))));
    }

    #[test]
    fn test_decode_strips_bom() {
        assert_eq!(decode(b"\xEF\xBB\xBFa,b", "utf-8").unwrap(), "a,b");
    }

    #[test]
    fn test_archive_member_selection() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pkg.zip");
        write_zip(
            &path,
            &[("README.txt", "hello"), ("data/a.csv", "a\n1\n"), ("data/b.csv", "b\n2\n")],
        );

        assert_eq!(read_archive_member(&path, Some("data/b.csv"), None).unwrap(), b"b\n2\n");
        assert_eq!(read_archive_member(&path, None, Some("csv")).unwrap(), b"a\n1\n");
        assert_eq!(read_archive_member(&path, None, None).unwrap(), b"hello");
        assert!(matches!(
            read_archive_member(&path, Some("missing.csv"), None),
            Err(GeneratorError::ArchiveMember { .. })
        ));
    }
}
