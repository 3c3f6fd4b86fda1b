use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Highest column index a worksheet can address (`XFD`).
pub const MAX_COLUMNS: u32 = 16_384;

/// Highest row index a worksheet can address.
pub const TOTAL_ROWS: u32 = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellRefError {
    #[error("invalid cell reference {0:?}")]
    Malformed(String),
    #[error("cell coordinates ({col}, {row}) are out of range")]
    OutOfRange { col: u32, row: u32 },
}

/// A single worksheet cell, stored as 1-based column/row coordinates.
///
/// Formats as an A1-style reference (`B4`) and parses from one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    col: u32,
    row: u32,
}

impl CellRef {
    /// Builds a reference from 1-based coordinates.
    pub fn new(col: u32, row: u32) -> Result<Self, CellRefError> {
        if col == 0 || row == 0 || col > MAX_COLUMNS || row > TOTAL_ROWS {
            return Err(CellRefError::OutOfRange { col, row });
        }
        Ok(Self { col, row })
    }

    /// Compile-time constructor for fixed references.
    ///
    /// Only meant for `const` items, where an invalid coordinate fails the build.
    pub const fn at(col: u32, row: u32) -> Self {
        assert!(col >= 1 && col <= MAX_COLUMNS && row >= 1 && row <= TOTAL_ROWS);
        Self { col, row }
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    /// Column letters for this cell (`1` -> `A`, `27` -> `AA`).
    pub fn column_name(&self) -> String {
        column_number_to_name(self.col)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column_name(), self.row)
    }
}

impl FromStr for CellRef {
    type Err = CellRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CellRefError::Malformed(s.to_string());

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(malformed)?;
        let (letters, digits) = trimmed.split_at(split);

        if letters.is_empty()
            || letters.len() > 3
            || !letters.chars().all(|c| c.is_ascii_alphabetic())
            || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return Err(malformed());
        }

        let col = letters
            .bytes()
            .fold(0u32, |acc, b| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1));
        let row: u32 = digits.parse().map_err(|_| malformed())?;

        Self::new(col, row)
    }
}

fn column_number_to_name(mut col: u32) -> String {
    let mut name = Vec::with_capacity(3);
    while col > 0 {
        let rem = (col - 1) % 26;
        name.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}
