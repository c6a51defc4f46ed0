//! Structural validation of uploaded module archives
//!
//! A module archive is a zip container whose entries all live under a single
//! `<module>@<version>/` prefix, with the module descriptor stored at
//! `<module>@<version>/go.mod`.

use std::io::{self, Read, Seek};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{RegistryError, Result};
use crate::types::{ModuleName, VersionString};

/// File name of the module descriptor inside the declared prefix
pub const DESCRIPTOR_FILE: &str = "go.mod";

/// Descriptors larger than this are not read; a minimal one is substituted
pub const MAX_DESCRIPTOR_SIZE: u64 = 16 * 1024 * 1024;

/// The identity and descriptor extracted from a valid module archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArchive {
    pub module: ModuleName,
    pub version: VersionString,
    pub descriptor: String,
}

/// `<module>@<version>` prefix declared by an entry path
#[derive(Debug, PartialEq, Eq)]
struct Declaration<'a> {
    module: &'a str,
    version: &'a str,
    rest: &'a str,
}

impl Declaration<'_> {
    fn matches(&self, other: &Declaration<'_>) -> bool {
        self.module == other.module && self.version == other.version
    }

    fn label(&self) -> String {
        format!("{}@{}", self.module, self.version)
    }
}

fn split_declaration(path: &str) -> Option<Declaration<'_>> {
    let (module, tail) = path.split_once('@')?;
    let (version, rest) = tail.split_once('/')?;
    if module.is_empty() || version.is_empty() {
        return None;
    }
    Some(Declaration {
        module,
        version,
        rest,
    })
}

fn is_unsafe_path(path: &str) -> bool {
    path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|component| component == "..")
}

fn map_zip_error(err: ZipError) -> RegistryError {
    match err {
        ZipError::Io(e) => map_read_error(e),
        other => RegistryError::InvalidArchive(other.to_string()),
    }
}

fn map_read_error(err: io::Error) -> RegistryError {
    match err.kind() {
        // Corrupt compressed data surfaces as an I/O error from the decoder
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            RegistryError::InvalidArchive(err.to_string())
        }
        _ => RegistryError::Io(err.to_string()),
    }
}

impl ModuleArchive {
    /// Parse and validate a module archive.
    ///
    /// The reader is borrowed for the duration of the call; callers keep
    /// ownership of the underlying buffer so it can be replayed afterwards.
    pub fn parse<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader).map_err(map_zip_error)?;

        let mut declared: Option<(String, String)> = None;
        let mut descriptor_index = None;
        let mut file_count = 0usize;

        for index in 0..zip.len() {
            let entry = zip.by_index_raw(index).map_err(map_zip_error)?;
            let path = entry.name().to_string();
            let is_dir = entry.is_dir();
            drop(entry);

            if is_unsafe_path(&path) {
                return Err(RegistryError::InvalidArchive(format!(
                    "unsafe entry path: {}",
                    path
                )));
            }

            let decl = split_declaration(&path).ok_or_else(|| {
                RegistryError::InvalidArchive(format!(
                    "entry {} is not under a module@version prefix",
                    path
                ))
            })?;

            match &declared {
                None => declared = Some((decl.module.to_string(), decl.version.to_string())),
                Some((module, version)) => {
                    let first = Declaration {
                        module: module.as_str(),
                        version: version.as_str(),
                        rest: "",
                    };
                    if !first.matches(&decl) {
                        return Err(RegistryError::MismatchedDeclaration {
                            expected: first.label(),
                            found: decl.label(),
                        });
                    }
                }
            }

            if !is_dir {
                file_count += 1;
                if decl.rest == DESCRIPTOR_FILE {
                    descriptor_index = Some(index);
                }
            }
        }

        let Some((module, version)) = declared.filter(|_| file_count > 0) else {
            return Err(RegistryError::InvalidArchive(
                "archive contains no files".to_string(),
            ));
        };

        let module = ModuleName::parse(module)?;
        let version = VersionString::parse(version)?;

        let Some(index) = descriptor_index else {
            return Err(RegistryError::MissingDescriptor(format!(
                "{}@{}/{}",
                module, version, DESCRIPTOR_FILE
            )));
        };

        let mut entry = zip.by_index(index).map_err(map_zip_error)?;
        let descriptor = if entry.size() > MAX_DESCRIPTOR_SIZE {
            debug!(
                module = %module,
                version = %version,
                size = entry.size(),
                "Descriptor too large, substituting minimal descriptor"
            );
            format!("module {}", module)
        } else {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .by_ref()
                .take(MAX_DESCRIPTOR_SIZE + 1)
                .read_to_end(&mut bytes)
                .map_err(map_read_error)?;
            String::from_utf8(bytes).map_err(|_| {
                RegistryError::InvalidArchive(format!("{} is not valid UTF-8", DESCRIPTOR_FILE))
            })?
        };

        Ok(Self {
            module,
            version,
            descriptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    #[test]
    fn test_parse_valid_archive() {
        let zip = build_zip(&[
            ("example.com/widget@v1.0.0/go.mod", b"module example.com/widget\n"),
            ("example.com/widget@v1.0.0/widget.go", b"package widget\n"),
        ]);

        let archive = ModuleArchive::parse(zip).unwrap();
        assert_eq!(archive.module.as_str(), "example.com/widget");
        assert_eq!(archive.version.as_str(), "v1.0.0");
        assert_eq!(archive.descriptor, "module example.com/widget\n");
    }

    #[test]
    fn test_parse_allows_directory_entries() {
        let zip = build_zip(&[
            ("widget@v1.0.0/", b""),
            ("widget@v1.0.0/go.mod", b"module widget\n"),
        ]);
        assert!(ModuleArchive::parse(zip).is_ok());
    }

    #[test]
    fn test_parse_rejects_non_zip() {
        let err = ModuleArchive::parse(Cursor::new(b"definitely not a zip".to_vec())).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArchive(_)));
        assert!(err.is_structural());
    }

    #[test]
    fn test_parse_rejects_empty_archive() {
        let err = ModuleArchive::parse(build_zip(&[])).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArchive(_)));
    }

    #[test]
    fn test_parse_rejects_missing_declaration() {
        let zip = build_zip(&[("go.mod", b"module widget\n")]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArchive(_)));
    }

    #[test]
    fn test_parse_rejects_mismatched_declarations() {
        let zip = build_zip(&[
            ("widget@v1.0.0/go.mod", b"module widget\n"),
            ("widget@v1.0.1/widget.go", b"package widget\n"),
        ]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::MismatchedDeclaration { .. }));

        let zip = build_zip(&[
            ("widget@v1.0.0/go.mod", b"module widget\n"),
            ("gadget@v1.0.0/gadget.go", b"package gadget\n"),
        ]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::MismatchedDeclaration { .. }));
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        let zip = build_zip(&[
            ("widget@v1.0.0/go.mod", b"module widget\n"),
            ("widget@v1.0.0/../escape.go", b"package escape\n"),
        ]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArchive(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_version() {
        let zip = build_zip(&[("widget@1.0.0/go.mod", b"module widget\n")]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidVersion(_)));
    }

    #[test]
    fn test_parse_requires_root_descriptor() {
        let zip = build_zip(&[
            ("widget@v1.0.0/widget.go", b"package widget\n"),
            ("widget@v1.0.0/nested/go.mod", b"module widget/nested\n"),
        ]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::MissingDescriptor(_)));
    }

    #[test]
    fn test_parse_rejects_non_utf8_descriptor() {
        let zip = build_zip(&[("widget@v1.0.0/go.mod", &[0xff, 0xfe, 0x00])]);
        let err = ModuleArchive::parse(zip).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArchive(_)));
    }

    #[test]
    fn test_split_declaration() {
        let decl = split_declaration("example.com/a/b@v1.0.0/sub/file.go").unwrap();
        assert_eq!(decl.module, "example.com/a/b");
        assert_eq!(decl.version, "v1.0.0");
        assert_eq!(decl.rest, "sub/file.go");

        assert!(split_declaration("no-version/file.go").is_none());
        assert!(split_declaration("widget@v1.0.0").is_none());
        assert!(split_declaration("@v1.0.0/go.mod").is_none());
    }
}
