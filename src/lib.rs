//! Shared fixtures for the module registry integration tests
//!
//! Builds module archives in the layout the registry accepts, plus a few
//! deliberately broken variants.

use modreg_core::DESCRIPTOR_FILE;
use std::io::{Cursor, Write};
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Builder for an in-memory module archive
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    /// Start an empty archive
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Start an archive for `module@version` with a descriptor naming the module
    pub fn module(module: &str, version: &str) -> Self {
        Self::new().entry(
            format!("{}@{}/{}", module, version, DESCRIPTOR_FILE),
            format!("module {}\n", module),
        )
    }

    /// Add an entry at an arbitrary path
    pub fn entry(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push((path.into(), data.into()));
        self
    }

    /// Replace the descriptor of `module@version`
    pub fn descriptor(self, module: &str, version: &str, text: &str) -> Self {
        let path = format!("{}@{}/{}", module, version, DESCRIPTOR_FILE);
        let mut builder = Self {
            entries: self
                .entries
                .into_iter()
                .filter(|(p, _)| *p != path)
                .collect(),
        };
        builder.entries.push((path, text.as_bytes().to_vec()));
        builder
    }

    /// Serialize the archive
    pub fn try_build(&self) -> ZipResult<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (path, data) in &self.entries {
            writer.start_file(path.as_str(), SimpleFileOptions::default())?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    /// Serialize the archive, panicking on writer errors
    pub fn build(&self) -> Vec<u8> {
        self.try_build().expect("Failed to build module archive")
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A valid archive for `module@version` with one source file
pub fn module_archive(module: &str, version: &str) -> Vec<u8> {
    let source = module.rsplit('/').next().unwrap_or(module);
    ArchiveBuilder::module(module, version)
        .entry(
            format!("{}@{}/{}.go", module, version, source),
            format!("package {}\n", source.replace(['-', '.'], "_")),
        )
        .build()
}

/// An archive whose entries declare two different versions
pub fn mismatched_archive(module: &str) -> Vec<u8> {
    ArchiveBuilder::module(module, "v1.0.0")
        .entry(format!("{}@v1.0.1/extra.go", module), "package extra\n")
        .build()
}
