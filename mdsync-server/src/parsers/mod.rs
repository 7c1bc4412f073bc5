//! Import list decoders
//!
//! Each decoder turns an uploaded tracker export into a list of free-text
//! titles. The decoder is chosen from the upload's file extension.

pub mod comick;
pub mod mal;

use std::path::Path;
use thiserror::Error;

/// Import list decoding errors
#[derive(Debug, Error)]
pub enum ParseError {
    /// File extension not recognised
    #[error("Unsupported file format '{0}' (expected .csv or .xml)")]
    UnsupportedFormat(String),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid text encoding: {0}")]
    Encoding(String),
}

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    /// Comick CSV export
    ComickCsv,
    /// MyAnimeList XML export
    MalXml,
}

impl ListFormat {
    /// Format implied by `filename`'s extension (case-insensitive)
    pub fn from_filename(filename: &str) -> Result<Self, ParseError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(ListFormat::ComickCsv),
            "xml" => Ok(ListFormat::MalXml),
            other => Err(ParseError::UnsupportedFormat(format!(".{}", other))),
        }
    }
}

/// Decode the titles in `data`, choosing the decoder from `filename`
pub fn parse_titles(data: &[u8], filename: &str) -> Result<Vec<String>, ParseError> {
    match ListFormat::from_filename(filename)? {
        ListFormat::ComickCsv => comick::parse(data),
        ListFormat::MalXml => mal::parse(data),
    }
}
