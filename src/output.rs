use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::Writer;
use tracing::info;

use crate::record::{Record, HEADERS};

/// Column holding target URLs in the input file.
const URL_COLUMN: &str = "Amazon_URL";

/// Read the full target list up front. Not streamed; batches are small
/// enough that failure-set bookkeeping over a Vec is the simpler contract.
pub fn read_targets(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening input {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let Some(col) = headers.iter().position(|h| h == URL_COLUMN) else {
        bail!("input {} has no {URL_COLUMN} column", path.display());
    };

    let mut targets = Vec::new();
    for row in reader.records() {
        let row = row?;
        if let Some(url) = row.get(col) {
            let url = url.trim();
            if !url.is_empty() {
                targets.push(url.to_string());
            }
        }
    }
    Ok(targets)
}

/// Append-only sink for accepted records. Creates the file with its header
/// row when absent; flushes after every append so a crash mid-batch keeps
/// everything written so far.
pub struct RecordSink {
    writer: Writer<std::fs::File>,
    appended: usize,
}

impl RecordSink {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening output {}", path.display()))?;
        let fresh = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(HEADERS)?;
            writer.flush()?;
        }

        Ok(Self {
            writer,
            appended: 0,
        })
    }

    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.writer.write_record(record.row())?;
        self.writer.flush()?;
        self.appended += 1;
        Ok(())
    }

    pub fn appended(&self) -> usize {
        self.appended
    }
}

/// Overwrite the failure list with the targets still failing after retries.
/// Callers skip this when the list is empty.
pub fn write_failures(path: &Path, urls: &[String]) -> Result<()> {
    let mut writer =
        Writer::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    writer.write_record(["Failed URLs"])?;
    for url in urls {
        writer.write_record([url])?;
    }
    writer.flush()?;
    info!("saved {} failed URLs to {}", urls.len(), path.display());
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Field;

    fn sample_record() -> Record {
        let p = |v: &str| Field::Present(v.to_string());
        Record {
            url: "https://www.amazon.com/dp/B0TEST/".into(),
            title: p("Book"),
            author: p("Author"),
            format: p("Kindle Edition"),
            summary: Field::Absent,
            print_length: p("100"),
            asin: p("B0TEST"),
            publisher: Field::Error("boom".into()),
            publication_date: p("05/06/2023"),
            best_sellers_rank: p("#3"),
            rating: p("4.0"),
            rating_count: p("52"),
            goodreads_rating: Field::Absent,
            goodreads_rating_count: Field::Absent,
        }
    }

    #[test]
    fn fresh_sink_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        {
            let mut sink = RecordSink::open(&path).unwrap();
            sink.append(&sample_record()).unwrap();
        }
        // Reopen: header must not repeat, prior rows must survive.
        {
            let mut sink = RecordSink::open(&path).unwrap();
            sink.append(&sample_record()).unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            HEADERS.to_vec()
        );
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "Book");
        assert_eq!(&rows[0][4], "NA");
        assert_eq!(&rows[0][7], "#ERROR");
    }

    #[test]
    fn read_targets_picks_url_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(
            &path,
            "Title,Amazon_URL\nA,https://www.amazon.com/dp/1/\nB,\nC,https://www.amazon.com/dp/2/\n",
        )
        .unwrap();
        let targets = read_targets(&path).unwrap();
        assert_eq!(
            targets,
            vec![
                "https://www.amazon.com/dp/1/".to_string(),
                "https://www.amazon.com/dp/2/".to_string()
            ]
        );
    }

    #[test]
    fn read_targets_requires_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "URL\nhttps://x/\n").unwrap();
        assert!(read_targets(&path).is_err());
    }

    #[test]
    fn failures_overwrite_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.csv");
        write_failures(&path, &["https://a/".into(), "https://b/".into()]).unwrap();
        write_failures(&path, &["https://c/".into()]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "https://c/");
    }
}
