//! A1-notation cell and range addresses.
//!
//! Rows and columns are zero-based internally; `A1` is `(row 0, col 0)`.
//! Parsing is case-insensitive and ignores `$` absolute markers, so `$b$3`
//! and `B3` name the same cell.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest column index accepted by the parser (`XFD`, 16384 columns).
pub const MAX_COLS: u32 = 16_384;

/// Largest row count accepted by the parser.
pub const MAX_ROWS: u32 = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("empty address")]
    Empty,
    #[error("malformed address '{0}'")]
    Malformed(String),
    #[error("address '{0}' is outside the addressable grid")]
    OutOfGrid(String),
}

/// A single cell, zero-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

/// Convert a zero-based column index to letters (`0 → A`, `26 → AA`).
pub fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row + 1)
    }
}

impl FromStr for CellRef {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.trim().chars().filter(|c| *c != '$').collect();
        if cleaned.is_empty() {
            return Err(AddressError::Empty);
        }

        let split = cleaned
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let (letters, digits) = cleaned.split_at(split);

        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AddressError::Malformed(s.to_string()));
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(AddressError::Malformed(s.to_string()));
        }

        let mut col: u64 = 0;
        for c in letters.chars() {
            col = col * 26 + (c.to_ascii_uppercase() as u64 - 'A' as u64 + 1);
            if col > MAX_COLS as u64 {
                return Err(AddressError::OutOfGrid(s.to_string()));
            }
        }

        let row: u64 = digits
            .parse()
            .map_err(|_| AddressError::OutOfGrid(s.to_string()))?;
        if row == 0 {
            return Err(AddressError::Malformed(s.to_string()));
        }
        if row > MAX_ROWS as u64 {
            return Err(AddressError::OutOfGrid(s.to_string()));
        }

        Ok(CellRef::new((row - 1) as u32, (col - 1) as u32))
    }
}

impl Serialize for CellRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An inclusive rectangular range. Always normalized so `start <= end`
/// on both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl Range {
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn single(cell: CellRef) -> Self {
        Self { start: cell, end: cell }
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        (self.start.row..=self.end.row).contains(&cell.row)
            && (self.start.col..=self.end.col).contains(&cell.col)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for Range {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((a, b)) => Ok(Range::new(a.parse()?, b.parse()?)),
            None => Ok(Range::single(s.parse()?)),
        }
    }
}

impl Serialize for Range {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Range {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_cells() {
        assert_eq!("A1".parse::<CellRef>().unwrap(), CellRef::new(0, 0));
        assert_eq!("b3".parse::<CellRef>().unwrap(), CellRef::new(2, 1));
        assert_eq!("$AA$10".parse::<CellRef>().unwrap(), CellRef::new(9, 26));
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn test_display_matches_parse() {
        for addr in ["A1", "Z99", "AB12", "XFD1"] {
            assert_eq!(addr.parse::<CellRef>().unwrap().to_string(), addr);
        }
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!("".parse::<CellRef>(), Err(AddressError::Empty));
        assert!(matches!("A0".parse::<CellRef>(), Err(AddressError::Malformed(_))));
        assert!(matches!("12".parse::<CellRef>(), Err(AddressError::Malformed(_))));
        assert!(matches!("A1B".parse::<CellRef>(), Err(AddressError::Malformed(_))));
        assert!(matches!("XFE1".parse::<CellRef>(), Err(AddressError::OutOfGrid(_))));
    }

    #[test]
    fn test_range_is_normalized() {
        let r: Range = "C3:A1".parse().unwrap();
        assert_eq!(r.start, CellRef::new(0, 0));
        assert_eq!(r.end, CellRef::new(2, 2));
        assert_eq!(r.rows(), 3);
        assert_eq!(r.cols(), 3);
        assert_eq!(r.to_string(), "A1:C3");
    }

    #[test]
    fn test_single_cell_range() {
        let r: Range = "D4".parse().unwrap();
        assert_eq!(r.rows(), 1);
        assert!(r.contains(&CellRef::new(3, 3)));
        assert!(!r.contains(&CellRef::new(3, 4)));
        assert_eq!(r.to_string(), "D4");
    }
}
