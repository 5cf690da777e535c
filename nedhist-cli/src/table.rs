//! Plain-ASCII table files for pixel maps and transform coefficients.
//!
//! The format is one value per line, with the first line declaring how
//! many values follow. Blank lines and surrounding whitespace are
//! ignored; anything else is an error.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

/// Errors from reading an ASCII table file.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table file is empty")]
    Empty,

    #[error("bad entry count on line 1: {0:?}")]
    BadCount(String),

    #[error("bad value on line {line}: {text:?}")]
    BadValue { line: usize, text: String },

    #[error("table declares {declared} entries but contains {actual}")]
    CountMismatch { declared: usize, actual: usize },
}

/// Reads a table of values of type `T` from `path`.
///
/// # Errors
/// Fails on I/O errors, unparseable lines, or a declared entry count
/// that does not match the number of values present.
pub fn read_table<T: FromStr>(path: &Path) -> Result<Vec<T>, TableError> {
    let reader = BufReader::new(File::open(path)?);

    let mut declared: Option<usize> = None;
    let mut values = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match declared {
            None => {
                let count = text
                    .parse()
                    .map_err(|_| TableError::BadCount(text.to_owned()))?;
                declared = Some(count);
                values.reserve(count);
            }
            Some(_) => {
                let value = text.parse().map_err(|_| TableError::BadValue {
                    line: index + 1,
                    text: text.to_owned(),
                })?;
                values.push(value);
            }
        }
    }

    let declared = declared.ok_or(TableError::Empty)?;
    if values.len() != declared {
        return Err(TableError::CountMismatch {
            declared,
            actual: values.len(),
        });
    }
    Ok(values)
}
