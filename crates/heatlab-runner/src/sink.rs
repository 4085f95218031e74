use crate::aggregate::AggregateResult;
use crate::error::HarnessError;
use crate::invoke::format_real;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

pub const COLUMNS: [&str; 5] = [
    "problem_size",
    "iteration_count",
    "worker_count",
    "mean_duration",
    "boundary_values",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub problem_size: u32,
    pub iteration_count: u32,
    pub worker_count: u32,
    pub mean_duration: f64,
    pub boundary_values: [f64; 4],
}

impl From<&AggregateResult> for ResultRow {
    fn from(result: &AggregateResult) -> Self {
        Self {
            problem_size: result.params.problem_size(),
            iteration_count: result.params.iteration_count(),
            worker_count: result.params.worker_count(),
            mean_duration: result.mean_duration,
            boundary_values: result.params.boundary_values(),
        }
    }
}

impl ResultRow {
    pub fn fields(&self) -> [String; 5] {
        let boundaries: Vec<String> = self.boundary_values.iter().map(format_real).collect();
        [
            self.problem_size.to_string(),
            self.iteration_count.to_string(),
            self.worker_count.to_string(),
            format!("{:.6}", self.mean_duration),
            format!("[{}]", boundaries.join(", ")),
        ]
    }
}

/// The header goes out before the first row, exactly once. Every row is
/// flushed as soon as it is written.
pub struct ResultSink<W: Write> {
    out: csv::Writer<W>,
    header_written: bool,
    rows: usize,
}

impl ResultSink<File> {
    /// Truncates `path` and starts a new table there.
    pub fn create(path: &Path) -> Result<Self, HarnessError> {
        let file = File::create(path)
            .map_err(|e| HarnessError::io(format!("failed to create {}", path.display()), e))?;
        let mut sink = ResultSink::new(file);
        sink.write_header()?;
        Ok(sink)
    }
}

impl<W: Write> ResultSink<W> {
    pub fn new(out: W) -> Self {
        let out = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(out);
        Self {
            out,
            header_written: false,
            rows: 0,
        }
    }

    pub fn write_header(&mut self) -> Result<(), HarnessError> {
        if self.header_written {
            return Ok(());
        }
        self.out.write_record(COLUMNS).map_err(write_error)?;
        self.flush()?;
        self.header_written = true;
        Ok(())
    }

    pub fn write_row(&mut self, row: &ResultRow) -> Result<(), HarnessError> {
        self.write_header()?;
        self.out.write_record(row.fields()).map_err(write_error)?;
        self.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Result<W, HarnessError> {
        self.write_header()?;
        self.out
            .into_inner()
            .map_err(|e| HarnessError::io("failed to flush results", e.into_error()))
    }

    fn flush(&mut self) -> Result<(), HarnessError> {
        self.out
            .flush()
            .map_err(|e| HarnessError::io("failed to write results", e))
    }
}

fn write_error(err: csv::Error) -> HarnessError {
    HarnessError::io("failed to write results", io::Error::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{read_table, scratch_dir};
    use std::fs;

    fn row(size: u32, workers: u32, mean: f64) -> ResultRow {
        ResultRow {
            problem_size: size,
            iteration_count: 500,
            worker_count: workers,
            mean_duration: mean,
            boundary_values: [50.0, 50.0, 50.0, 50.0],
        }
    }

    #[test]
    fn header_once_and_rows_match_its_width() {
        let mut sink = ResultSink::new(Vec::new());
        sink.write_header().expect("header");
        sink.write_row(&row(100, 1, 0.0123456789)).expect("row");
        sink.write_header().expect("header again");
        sink.write_row(&row(100, 2, 1.5)).expect("row");
        assert_eq!(sink.rows_written(), 2);
        let text = String::from_utf8(sink.finish().expect("finish")).expect("utf8");

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "problem_size,iteration_count,worker_count,mean_duration,boundary_values"
        );
        assert_eq!(text.matches("problem_size").count(), 1);
        assert_eq!(lines[1], "100,500,1,0.012346,\"[50.0, 50.0, 50.0, 50.0]\"");
        assert_eq!(lines[2], "100,500,2,1.500000,\"[50.0, 50.0, 50.0, 50.0]\"");
        assert!(!text.contains('\r'));
        for record in read_table(&text) {
            assert_eq!(record.len(), COLUMNS.len());
        }
    }

    #[test]
    fn first_row_writes_missing_header() {
        let mut sink = ResultSink::new(Vec::new());
        sink.write_row(&row(200, 4, 2.0)).expect("row");
        let text = String::from_utf8(sink.finish().expect("finish")).expect("utf8");
        assert!(text.starts_with("problem_size,"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn empty_table_still_has_header() {
        let sink = ResultSink::new(Vec::new());
        let text = String::from_utf8(sink.finish().expect("finish")).expect("utf8");
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn boundary_list_reads_back_as_one_field() {
        let mut r = row(100, 1, 0.5);
        r.boundary_values = [12.5, 0.0, 99.999, 1.0];
        let fields = r.fields();
        assert_eq!(fields[4], "[12.5, 0.0, 99.999, 1.0]");
        let mut sink = ResultSink::new(Vec::new());
        sink.write_row(&r).expect("row");
        let text = String::from_utf8(sink.finish().expect("finish")).expect("utf8");
        let table = read_table(&text);
        assert_eq!(table[1], fields.to_vec());
    }

    #[test]
    fn rows_are_on_disk_before_finish() {
        let dir = scratch_dir("sink_durable");
        let path = dir.join("results.csv");
        let mut sink = ResultSink::create(&path).expect("create");
        sink.write_row(&row(100, 1, 0.25)).expect("row");
        let on_disk = fs::read_to_string(&path).expect("read");
        assert_eq!(on_disk.lines().count(), 2);
        drop(sink);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn create_truncates_previous_results() {
        let dir = scratch_dir("sink_truncate");
        let path = dir.join("results.csv");
        fs::write(&path, "stale,data\n1,2\n").expect("seed");
        let sink = ResultSink::create(&path).expect("create");
        sink.finish().expect("finish");
        let on_disk = fs::read_to_string(&path).expect("read");
        assert_eq!(on_disk.lines().collect::<Vec<_>>(), vec![COLUMNS.join(",")]);
        let _ = fs::remove_dir_all(dir);
    }
}
