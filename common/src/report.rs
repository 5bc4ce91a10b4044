//! Per-directory results and the run summary derived from them

/// Outcome of replicating the files directly under one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DirectoryResult {
    pub path: String,
    /// Entries that turned out to be files, subdirectories excluded
    pub expected_file_count: usize,
    pub copied_count: usize,
    pub failed_count: usize,
    /// Source identifiers of the failed files, in the order they failed
    pub failed_entries: Vec<String>,
    pub bytes_copied: u64,
}

impl DirectoryResult {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn record_copied(&mut self, bytes: u64) {
        self.expected_file_count += 1;
        self.copied_count += 1;
        self.bytes_copied += bytes;
    }

    pub fn record_failed(&mut self, entry: impl Into<String>) {
        self.expected_file_count += 1;
        self.failed_count += 1;
        self.failed_entries.push(entry.into());
    }

    pub fn is_complete(&self) -> bool {
        self.failed_count == 0
    }
}

impl std::fmt::Display for DirectoryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}: {} of {} files copied ({}), {} failed",
            self.path,
            self.copied_count,
            self.expected_file_count,
            bytesize::ByteSize(self.bytes_copied),
            self.failed_count,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RunSummary {
    pub directories: usize,
    pub expected_files: usize,
    pub copied_files: usize,
    pub failed_files: usize,
    pub failed_entries: Vec<String>,
    pub bytes_copied: u64,
    /// Directories whose listing never succeeded
    pub skipped_directories: usize,
    pub elapsed: std::time::Duration,
    /// `None` when the run took less than a second
    pub files_per_second: Option<f64>,
}

impl RunSummary {
    pub fn from_results(
        results: &[DirectoryResult],
        elapsed: std::time::Duration,
        skipped_directories: usize,
    ) -> Self {
        let mut summary = results
            .iter()
            .fold(RunSummary::default(), |mut summary, result| {
                summary.directories += 1;
                summary.expected_files += result.expected_file_count;
                summary.copied_files += result.copied_count;
                summary.failed_files += result.failed_count;
                summary
                    .failed_entries
                    .extend(result.failed_entries.iter().cloned());
                summary.bytes_copied += result.bytes_copied;
                summary
            });
        summary.skipped_directories = skipped_directories;
        summary.elapsed = elapsed;
        summary.files_per_second =
            crate::progress::files_per_second(summary.copied_files as u64, elapsed);
        summary
    }

    /// True when every expected file was copied and no directory was skipped.
    pub fn is_success(&self) -> bool {
        self.failed_files == 0 && self.skipped_directories == 0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let rate = match self.files_per_second {
            Some(rate) => format!("{rate:.2} files/s"),
            None => "n/a".to_string(),
        };
        write!(
            f,
            "directories replicated: {}\n\
            directories skipped: {}\n\
            files expected: {}\n\
            files copied: {}\n\
            files failed: {}\n\
            bytes copied: {}\n\
            elapsed: {}\n\
            speed: {}",
            self.directories,
            self.skipped_directories,
            self.expected_files,
            self.copied_files,
            self.failed_files,
            bytesize::ByteSize(self.bytes_copied),
            humantime::format_duration(std::time::Duration::from_millis(
                self.elapsed.as_millis() as u64
            )),
            rate,
        )?;
        for entry in &self.failed_entries {
            write!(f, "\nfailed: {entry}")?;
        }
        Ok(())
    }
}

/// Collects directory results from concurrently running replications.
#[derive(Debug, Default)]
pub struct Report {
    results: std::sync::Mutex<Vec<DirectoryResult>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: DirectoryResult) {
        self.results.lock().unwrap().push(result);
    }

    /// Results pushed so far, in completion order.
    pub fn results(&self) -> Vec<DirectoryResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn summary(&self, elapsed: std::time::Duration, skipped_directories: usize) -> RunSummary {
        RunSummary::from_results(&self.results.lock().unwrap(), elapsed, skipped_directories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(path: &str, copied: &[u64], failed: &[&str]) -> DirectoryResult {
        let mut result = DirectoryResult::new(path);
        for bytes in copied {
            result.record_copied(*bytes);
        }
        for entry in failed {
            result.record_failed(*entry);
        }
        result
    }

    #[test]
    fn counts_add_up() {
        let result = result("/img", &[1, 2, 3], &["/img/x", "/img/y"]);
        assert_eq!(result.expected_file_count, 5);
        assert_eq!(
            result.expected_file_count,
            result.copied_count + result.failed_count
        );
        assert_eq!(result.bytes_copied, 6);
        assert_eq!(result.failed_entries, vec!["/img/x", "/img/y"]);
        assert!(!result.is_complete());
    }

    #[test]
    fn summary_sums_results() {
        let report = Report::new();
        report.push(result("/img/sub", &[10], &["/img/sub/b"]));
        report.push(result("/img", &[1, 1], &[]));
        report.push(DirectoryResult::new("/img/empty"));
        let summary = report.summary(Duration::from_secs(2), 1);
        assert_eq!(summary.directories, 3);
        assert_eq!(summary.expected_files, 4);
        assert_eq!(summary.copied_files, 3);
        assert_eq!(summary.failed_files, 1);
        assert_eq!(summary.failed_entries, vec!["/img/sub/b"]);
        assert_eq!(summary.bytes_copied, 12);
        assert_eq!(summary.skipped_directories, 1);
        assert_eq!(summary.files_per_second, Some(1.5));
        assert!(!summary.is_success());
        let results = report.results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].path, "/img/sub");
    }

    #[test]
    fn zero_elapsed_has_no_rate() {
        let report = Report::new();
        report.push(result("/", &[1], &[]));
        let summary = report.summary(Duration::from_millis(900), 0);
        assert_eq!(summary.files_per_second, None);
        assert!(summary.is_success());
        assert!(summary.to_string().contains("speed: n/a"));
    }

    #[test]
    fn empty_report() {
        let summary = Report::new().summary(Duration::ZERO, 0);
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn summary_lists_failures() {
        let report = Report::new();
        report.push(result("/", &[], &["/b.txt"]));
        let text = report.summary(Duration::from_secs(1), 0).to_string();
        assert!(text.contains("files failed: 1"));
        assert!(text.contains("failed: /b.txt"));
    }

    #[test]
    fn results_serialize_with_field_names() -> anyhow::Result<()> {
        let json = serde_json::to_value(result("/img", &[4], &["/img/b.txt"]))?;
        assert_eq!(json["path"], "/img");
        assert_eq!(json["expected_file_count"], 2);
        assert_eq!(json["failed_entries"][0], "/img/b.txt");
        let parsed: DirectoryResult = serde_json::from_value(json)?;
        assert_eq!(parsed.bytes_copied, 4);
        Ok(())
    }
}
