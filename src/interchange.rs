use crate::model::CanonicalDataset;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ANCHOR: &str = "A1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetUpdate {
    pub range: String,
    pub values: Vec<Vec<String>>,
}

impl SheetUpdate {
    pub fn from_dataset(dataset: &CanonicalDataset, anchor: &str) -> Result<Self> {
        let anchor = anchor.trim().to_ascii_uppercase();
        if !is_cell_reference(&anchor) {
            bail!("invalid anchor cell {anchor:?}, expected something like A1");
        }
        Ok(Self {
            range: anchor,
            values: dataset.to_table(),
        })
    }

    pub fn row_count(&self) -> usize {
        self.values.len().saturating_sub(1)
    }
}

fn is_cell_reference(value: &str) -> bool {
    let split = value
        .find(|ch: char| !ch.is_ascii_uppercase())
        .unwrap_or(value.len());
    let (letters, digits) = value.split_at(split);
    !letters.is_empty()
        && !digits.is_empty()
        && digits.chars().all(|ch| ch.is_ascii_digit())
        && !digits.starts_with('0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlayEvent, Schema};
    use crate::normalize::normalize_timestamp;

    #[test]
    fn payload_starts_with_header_row() {
        let dataset = CanonicalDataset::new(
            Schema::default(),
            vec![
                PlayEvent::new(normalize_timestamp("2024-01-02"), "B", "T"),
                PlayEvent::new(None, "A", "S"),
            ],
        );

        let update = SheetUpdate::from_dataset(&dataset, "a1").expect("update");

        assert_eq!(update.range, "A1");
        assert_eq!(update.row_count(), 2);
        assert_eq!(update.values[0], vec!["Date/Time", "Artist", "Song Name"]);
        assert_eq!(update.values[1], vec!["2024-01-02T00:00:00Z", "B", "T"]);
        assert_eq!(update.values[2], vec!["", "A", "S"]);
    }

    #[test]
    fn rejects_malformed_anchor() {
        let dataset = CanonicalDataset::default();
        for anchor in ["", "1A", "A0", "A", "12", "A1:B2", "Ä1"] {
            assert!(
                SheetUpdate::from_dataset(&dataset, anchor).is_err(),
                "{anchor:?}"
            );
        }
        assert!(SheetUpdate::from_dataset(&dataset, "AB12").is_ok());
    }
}
