//! Built-in tabular bilingual format: one CSV row per segment with key,
//! source and target columns. Any spreadsheet tool can open it, which is
//! the lowest common denominator translators actually have.

use std::io::{Read, Write};

use super::{ExternalFormat, ExternalUnit, RoundTripError};

const HEADERS: [&str; 3] = ["key", "source", "target"];

#[derive(Debug, Default, Clone, Copy)]
pub struct TabularBilingual;

impl ExternalFormat for TabularBilingual {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn write_document(
        &self,
        units: &[ExternalUnit],
        out: &mut dyn Write,
    ) -> Result<(), RoundTripError> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(HEADERS)?;
        for unit in units {
            writer.write_record([&unit.key, &unit.source, &unit.target])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn read_document(&self, input: &mut dyn Read) -> Result<Vec<ExternalUnit>, RoundTripError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let mut units = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() < HEADERS.len() {
                return Err(RoundTripError::Malformed(format!(
                    "row {}: expected {} columns, found {}",
                    row + 2,
                    HEADERS.len(),
                    record.len()
                )));
            }
            // extra columns translators' tools tack on are ignored
            units.push(ExternalUnit {
                key: record[0].to_string(),
                source: record[1].to_string(),
                target: record[2].to_string(),
            });
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_units() -> Vec<ExternalUnit> {
        vec![
            ExternalUnit {
                key: "1".to_string(),
                source: "Click <<t:1>>here<<t:2>>.".to_string(),
                target: String::new(),
            },
            ExternalUnit {
                key: "2".to_string(),
                source: "Line with, comma and \"quotes\"".to_string(),
                target: "Ligne avec, virgule".to_string(),
            },
        ]
    }

    #[test]
    fn document_round_trips_through_csv() {
        let format = TabularBilingual;
        let units = sample_units();

        let mut buf = Vec::new();
        format.write_document(&units, &mut buf).unwrap();

        let parsed = format.read_document(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, units);
    }

    #[test]
    fn extra_columns_are_tolerated() {
        let doc = "key,source,target,comment\n1,Hello,Bonjour,reviewed\n";
        let parsed = TabularBilingual
            .read_document(&mut doc.as_bytes())
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].target, "Bonjour");
    }

    #[test]
    fn short_row_is_rejected_with_its_row_number() {
        let doc = "key,source,target\n1,Hello,Bonjour\n2,missing-target\n";
        let err = TabularBilingual
            .read_document(&mut doc.as_bytes())
            .unwrap_err();
        match err {
            RoundTripError::Malformed(msg) => assert!(msg.contains("row 3"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn multiline_target_cell_survives() {
        let format = TabularBilingual;
        let units = vec![ExternalUnit {
            key: "1".to_string(),
            source: "One".to_string(),
            target: "Line one\nLine two".to_string(),
        }];

        let mut buf = Vec::new();
        format.write_document(&units, &mut buf).unwrap();
        let parsed = format.read_document(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, units);
    }
}
