use std::io::{Cursor, Write};
use std::sync::OnceLock;

use bytes::Bytes;
use regex::Regex;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::File;

const MAX_FILENAME_LEN: usize = 64;

fn hostile_characters() -> &'static Regex {
    static HOSTILE: OnceLock<Regex> = OnceLock::new();
    HOSTILE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"))
}

/// Hex encoding of the file's UTF-8 bytes.
pub fn hex(raw: &str) -> String {
    hex::encode(raw.as_bytes())
}

/// Reduce a user supplied filename to something safe inside a
/// `Content-Disposition` header and on any file system.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };

    let cleaned = hostile_characters().replace_all(stem, "_");
    let cleaned: String = cleaned
        .trim_matches('_')
        .chars()
        .take(MAX_FILENAME_LEN)
        .collect();

    (!cleaned.is_empty()).then_some(cleaned)
}

/// Name suggested when downloading a single file.
pub fn download_name(file: &File) -> String {
    match file.filename.as_deref().and_then(sanitize_filename) {
        Some(name) => format!("{name}-{slug}.txt", slug = file.slug),
        None => format!("{slug}.txt", slug = file.slug),
    }
}

/// Name suggested when downloading a whole paste.
pub fn archive_name(paste_slug: &str) -> String {
    format!("{paste_slug}.zip")
}

/// Build a zip archive in memory with one entry per file, in paste order.
pub fn archive(files: &[File]) -> crate::AppResult<Bytes> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        zip.start_file(download_name(file), options)?;
        zip.write_all(file.raw.as_bytes())?;
    }

    Ok(zip.finish()?.into_inner().into())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use zip::ZipArchive;

    use super::*;

    fn file(slug: &str, raw: &str, filename: Option<&str>) -> File {
        File {
            slug: slug.to_owned(),
            paste_slug: "PASTE".to_owned(),
            position: 0,
            lexer: "text".to_owned(),
            raw: raw.to_owned(),
            filename: filename.map(str::to_owned),
        }
    }

    #[test]
    fn hex_encodes_utf8_bytes() {
        assert_eq!(hex("print(1)"), "7072696e74283129");
        assert_eq!(hex("é"), "c3a9");
        assert_eq!(hex(""), "");
    }

    #[test]
    fn filename_extension_is_dropped() {
        assert_eq!(sanitize_filename("y.txt").as_deref(), Some("y"));
        assert_eq!(sanitize_filename("archive.tar.gz").as_deref(), Some("archive_tar"));
        assert_eq!(sanitize_filename(".bashrc").as_deref(), Some("bashrc"));
    }

    #[test]
    fn path_traversal_is_stripped() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("..\\..\\boot.ini").as_deref(), Some("boot"));
        assert_eq!(sanitize_filename("../"), None);
        assert_eq!(sanitize_filename(".."), None);
    }

    #[test]
    fn header_injection_is_neutralized() {
        let name = sanitize_filename("a\r\nSet-Cookie: x=1; \"b\".txt").unwrap();
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        assert_eq!(name, "a_Set-Cookie_x_1_b");
    }

    #[test]
    fn long_filenames_are_capped() {
        let name = sanitize_filename(&"a".repeat(500)).unwrap();
        assert_eq!(name.len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn download_name_uses_the_files_own_slug() {
        assert_eq!(download_name(&file("B2C3", "b", Some("y.txt"))), "y-B2C3.txt");
        assert_eq!(download_name(&file("B2C3", "b", None)), "B2C3.txt");
        assert_eq!(download_name(&file("B2C3", "b", Some("///"))), "B2C3.txt");
    }

    #[test]
    fn archive_contains_every_file_in_order() {
        let files = vec![
            file("AAAA", "a", Some("x.txt")),
            file("BBBB", "b", Some("y.txt")),
            file("CCCC", "c", None),
        ];

        let data = archive(&files).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(data.to_vec())).unwrap();
        assert_eq!(zip.len(), 3);

        let expected = [("x-AAAA.txt", "a"), ("y-BBBB.txt", "b"), ("CCCC.txt", "c")];
        for (index, (name, contents)) in expected.iter().enumerate() {
            let mut entry = zip.by_index(index).unwrap();
            assert_eq!(entry.name(), *name);
            let mut buf = String::new();
            entry.read_to_string(&mut buf).unwrap();
            assert_eq!(buf, *contents);
        }
    }
}
