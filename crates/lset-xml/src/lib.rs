//! Minimal XML document model for the settings storage format.
//!
//! The persisted format is a small tree of elements with attributes and no
//! text content, so this crate keeps a plain [`Element`] tree and converts it
//! to and from text with `quick-xml`. Attribute order is preserved: the
//! storage format is diffed byte-for-byte by round-trip tests.

mod element;

pub use element::Element;

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("I/O error accessing storage file")]
    Io(#[from] io::Error),
    #[error("malformed XML document")]
    Parse(#[from] quick_xml::Error),
    #[error("malformed XML attribute")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("element or attribute name is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("document contains no root element")]
    NoRootElement,
}

/// Load the root element of an XML file.
///
/// A missing file is not an error: stored settings are optional and absence
/// means "no data". A file that exists but cannot be parsed is an error the
/// caller may degrade from.
pub fn load_file(path: &Path) -> Result<Option<Element>, XmlError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Element::parse(&text).map(Some)
}

/// Write `root` as a complete XML document, replacing any previous content.
///
/// Parent directories are created as needed. The write is a full-document
/// replacement: the storage format has no incremental updates.
pub fn store_file(path: &Path, root: &Element) -> Result<(), XmlError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, root.to_xml())?;
    Ok(())
}

/// Remove a storage file if it exists. Used when serialized state collapses
/// back to all-default and absence-means-default applies.
pub fn remove_file(path: &Path) -> Result<(), XmlError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
