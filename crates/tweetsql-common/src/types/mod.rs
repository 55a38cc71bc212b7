//! Row types shared between the mapper, the writer and storage backends

use serde::{Deserialize, Serialize};

/// A single typed scalar in a [`Row`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Borrow the text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the cell as an integer identifier.
    ///
    /// Twitter ships most identifiers as `*_str` fields, so text cells holding
    /// digits are accepted as well.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Null, Into::into)
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One storage-ready record.
///
/// Cell order always matches the column list of the schema that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Row(Vec<Cell>);

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self(cells)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every cell is `NULL` (an empty row counts as all-null).
    pub fn is_all_null(&self) -> bool {
        self.0.iter().all(Cell::is_null)
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.0
    }
}

impl From<Vec<Cell>> for Row {
    fn from(cells: Vec<Cell>) -> Self {
        Self(cells)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_all_null_detection() {
        assert!(Row::new(vec![Cell::Null, Cell::Null]).is_all_null());
        assert!(!Row::new(vec![Cell::Null, Cell::Int(0)]).is_all_null());
        assert!(Row::default().is_all_null());
    }

    #[test]
    fn test_text_ids_parse_as_integers() {
        assert_eq!(Cell::from("504710715954188288").as_i64(), Some(504710715954188288));
        assert_eq!(Cell::Int(7).as_i64(), Some(7));
        assert_eq!(Cell::from("web").as_i64(), None);
        assert_eq!(Cell::Null.as_i64(), None);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Cell::from(None::<String>), Cell::Null);
        assert_eq!(Cell::from(Some("en")), Cell::Text("en".to_string()));
    }
}
