//! Destinations for result rows.
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::evaluation::ResultRow;
use super::EvalError;

/// Receives result rows as they are produced.
///
/// The evaluator serializes access, so implementations never see concurrent
/// calls. Any error is fatal to the run.
pub trait ResultSink: Send {
    /// Write one row.
    fn write_row(&mut self, row: &ResultRow) -> Result<(), EvalError>;
    /// Flush everything written so far. Called once, after the last row.
    fn finish(&mut self) -> Result<(), EvalError>;
}

impl<'a, T: ResultSink + ?Sized> ResultSink for &'a mut T {
    fn write_row(&mut self, row: &ResultRow) -> Result<(), EvalError> {
        (**self).write_row(row)
    }

    fn finish(&mut self) -> Result<(), EvalError> {
        (**self).finish()
    }
}

/// Writes rows as CSV with a header line:
/// `fold_index,algorithm_id,user_id,item_id,actual_value,predicted_value`.
pub struct CsvResultSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvResultSink<W> {
    /// Wrap a writer.
    pub fn from_writer(writer: W) -> Self {
        CsvResultSink {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, EvalError> {
        self.writer
            .into_inner()
            .map_err(|err| EvalError::Io(err.into_error()))
    }
}

impl<W: Write + Send> ResultSink for CsvResultSink<W> {
    fn write_row(&mut self, row: &ResultRow) -> Result<(), EvalError> {
        self.writer.serialize(row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EvalError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes CSV results to a file, leaving any existing file untouched until
/// the run finishes.
///
/// Rows go to `<path>.part`, created on the first row (or on `finish` for a
/// run without rows) and renamed over `path` by `finish`. A run that fails
/// before writing anything creates no file. A run aborted mid-way leaves
/// only the `.part` file behind.
pub struct CsvFileSink {
    path: PathBuf,
    part_path: PathBuf,
    writer: Option<CsvResultSink<File>>,
    finished: bool,
}

impl CsvFileSink {
    /// Build a sink writing to `path`. Does not touch the filesystem.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mut part_name = path.file_name().unwrap_or_default().to_os_string();
        part_name.push(".part");
        let part_path = path.with_file_name(part_name);

        CsvFileSink {
            path,
            part_path,
            writer: None,
            finished: false,
        }
    }

    /// Final destination of the results.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File receiving rows until `finish`.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    fn writer(&mut self) -> Result<&mut CsvResultSink<File>, EvalError> {
        if self.finished {
            return Err(EvalError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("results already written to {}", self.path.display()),
            )));
        }

        if self.writer.is_none() {
            let file = File::create(&self.part_path).map_err(|err| {
                EvalError::Io(io::Error::new(
                    err.kind(),
                    format!("cannot open output file {}: {}", self.part_path.display(), err),
                ))
            })?;
            self.writer = Some(CsvResultSink::from_writer(file));
        }

        self.writer
            .as_mut()
            .ok_or_else(|| EvalError::Io(io::Error::new(io::ErrorKind::Other, "output file not open")))
    }
}

impl ResultSink for CsvFileSink {
    fn write_row(&mut self, row: &ResultRow) -> Result<(), EvalError> {
        self.writer()?.write_row(row)
    }

    fn finish(&mut self) -> Result<(), EvalError> {
        self.writer()?.finish()?;
        self.writer = None;
        self.finished = true;

        fs::rename(&self.part_path, &self.path).map_err(|err| {
            EvalError::Io(io::Error::new(
                err.kind(),
                format!("cannot move results to {}: {}", self.path.display(), err),
            ))
        })
    }
}

/// Collects rows in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    rows: Vec<ResultRow>,
    finished: bool,
}

impl MemorySink {
    /// Build an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows received so far, in arrival order.
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Whether `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the sink, returning its rows.
    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }
}

impl ResultSink for MemorySink {
    fn write_row(&mut self, row: &ResultRow) -> Result<(), EvalError> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EvalError> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::Prediction;

    fn rows() -> Vec<ResultRow> {
        vec![
            ResultRow {
                fold_index: 0,
                algorithm_id: "item_mean".to_owned(),
                user_id: 3,
                item_id: 17,
                actual_value: 4.0,
                predicted_value: Prediction::Value(3.25),
            },
            ResultRow {
                fold_index: 1,
                algorithm_id: "item_mean".to_owned(),
                user_id: 5,
                item_id: 2,
                actual_value: 1.5,
                predicted_value: Prediction::Unpredictable,
            },
        ]
    }

    #[test]
    fn csv_layout() {
        let mut sink = CsvResultSink::from_writer(Vec::new());

        for row in rows() {
            sink.write_row(&row).unwrap();
        }
        sink.finish().unwrap();

        let output = String::from_utf8(sink.into_inner().unwrap()).unwrap();

        assert_eq!(
            output,
            "fold_index,algorithm_id,user_id,item_id,actual_value,predicted_value\n\
             0,item_mean,3,17,4.0,3.25\n\
             1,item_mean,5,2,1.5,NA\n"
        );
    }

    #[test]
    fn file_sink_replaces_the_output_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "previous results\n").unwrap();

        let mut sink = CsvFileSink::new(&path);
        assert_eq!(sink.part_path(), dir.path().join("results.csv.part"));

        for row in rows() {
            sink.write_row(&row).unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "previous results\n");

        sink.finish().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.ends_with("NA\n"));
        assert!(!sink.part_path().exists());
    }

    #[test]
    fn file_sink_touches_nothing_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "previous results\n").unwrap();

        let sink = CsvFileSink::new(&path);
        drop(sink);

        assert_eq!(fs::read_to_string(&path).unwrap(), "previous results\n");
        assert!(!dir.path().join("results.csv.part").exists());
    }

    #[test]
    fn aborted_file_sink_keeps_the_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "previous results\n").unwrap();

        let mut sink = CsvFileSink::new(&path);
        sink.write_row(&rows()[0]).unwrap();
        drop(sink);

        assert_eq!(fs::read_to_string(&path).unwrap(), "previous results\n");
        assert!(dir.path().join("results.csv.part").exists());
    }

    #[test]
    fn finishing_without_rows_writes_an_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut sink = CsvFileSink::new(&path);
        sink.finish().unwrap();

        // csv writes the header with the first record, so a run without
        // rows yields an empty file.
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert!(sink.write_row(&rows()[0]).is_err());
    }

    #[test]
    fn unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("results.csv");
        let mut sink = CsvFileSink::new(&path);

        match sink.write_row(&rows()[0]) {
            Err(EvalError::Io(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn memory_sink() {
        let mut sink = MemorySink::new();
        for row in rows() {
            sink.write_row(&row).unwrap();
        }

        assert!(!sink.is_finished());
        sink.finish().unwrap();
        assert!(sink.is_finished());
        assert_eq!(sink.into_rows(), rows());
    }
}
