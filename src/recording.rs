use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::ecg::Sample;

pub const TSV_HEADER: &str = "t\tv";
pub const EXPORT_FILE_NAME: &str = "ecg.tsv";

/// Append-only log of decoded samples with its own start/stop lifecycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    samples: Vec<Sample>,
    active: bool,
}

impl Recording {
    /// Clear the last recording and start appending.
    pub fn start(&mut self) {
        self.samples.clear();
        self.active = true;
    }

    /// Stop appending. Contents are kept for export.
    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Append `sample` if recording is active.
    pub fn push(&mut self, sample: Sample) {
        if self.active {
            self.samples.push(sample);
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time between the first and last recorded sample, 0 when empty.
    pub fn duration(&self) -> i64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Tab separated `t`/`v` table, header first, one row per sample.
    pub fn to_tsv(&self) -> String {
        let rows: Vec<String> = self
            .samples
            .iter()
            .map(|s| format!("{}\t{}", s.timestamp, s.value))
            .collect();
        format!("{TSV_HEADER}\n{}", rows.join("\n"))
    }

    /// Write the table to `ecg.tsv` inside `dir`.
    pub fn save(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(EXPORT_FILE_NAME);
        fs::write(&path, self.to_tsv())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: i64, value: i16) -> Sample {
        Sample { timestamp, value }
    }

    #[test]
    fn test_push_only_while_active() {
        let mut recording = Recording::default();
        recording.push(sample(0, 1));
        assert!(recording.is_empty());

        recording.start();
        recording.push(sample(0, 1));
        recording.push(sample(5, 2));
        recording.stop();
        recording.push(sample(10, 3));

        assert_eq!(recording.samples(), &[sample(0, 1), sample(5, 2)]);
        assert!(!recording.is_active());
    }

    #[test]
    fn test_start_discards_previous_recording() {
        let mut recording = Recording::default();
        recording.start();
        recording.push(sample(0, 1));
        recording.stop();

        recording.start();
        assert!(recording.is_empty());
        assert!(recording.is_active());
    }

    #[test]
    fn test_duration() {
        let mut recording = Recording::default();
        assert_eq!(recording.duration(), 0);

        recording.start();
        recording.push(sample(990, 10));
        assert_eq!(recording.duration(), 0);
        recording.push(sample(995, -20));
        recording.push(sample(1000, 30));
        assert_eq!(recording.duration(), 10);
    }

    #[test]
    fn test_tsv_export() {
        let mut recording = Recording::default();
        recording.start();
        recording.push(sample(0, 1));
        recording.push(sample(5, 2));

        assert_eq!(recording.to_tsv(), "t\tv\n0\t1\n5\t2");
    }

    #[test]
    fn test_tsv_export_of_empty_recording_keeps_header() {
        assert_eq!(Recording::default().to_tsv(), "t\tv\n");
    }

    #[test]
    fn test_save_writes_tsv_file() {
        let dir = std::env::temp_dir().join(format!("btecg-export-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut recording = Recording::default();
        recording.start();
        recording.push(sample(-3, -7));

        let path = recording.save(&dir).unwrap();
        assert_eq!(path.file_name().unwrap(), EXPORT_FILE_NAME);
        assert_eq!(fs::read_to_string(&path).unwrap(), "t\tv\n-3\t-7");

        fs::remove_dir_all(&dir).unwrap();
    }
}
