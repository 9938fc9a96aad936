//! Per-packet and aggregate throughput CSV persistence (spec §6
//! "Persisted state"), grounded in
//! `original_source/tools/hci_throughput/throughput.py`'s
//! `append_to_csv_file`/`save_average`. Uses the `csv` crate rather than
//! hand-formatting rows, the way `hastur-dev`'s A2DP tooling reaches for
//! `csv` wherever the Python original used its stdlib counterpart.

use crate::error::{Error, Result};
use csv::Writer;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Appends `(elapsed_seconds, packet_number)` rows for one side of one
/// run, with a header row written once at creation (spec §4.7).
pub struct PacketLogWriter {
    writer: Writer<File>,
}

impl PacketLogWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut writer = Writer::from_path(path).map_err(csv_err)?;
        writer.write_record(["Time", "Packet"]).map_err(csv_err)?;
        writer.flush()?;
        Ok(PacketLogWriter { writer })
    }

    pub fn write_row(&mut self, elapsed: Duration, packet_number: i64) -> Result<()> {
        self.writer
            .write_record([elapsed.as_secs_f64().to_string(), packet_number.to_string()])
            .map_err(csv_err)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Throughput units the orchestrator can report in (spec §6 `data_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughputUnit {
    Kilobits,
    Kilobytes,
}

/// Read a per-packet CSV back and compute the run's average throughput,
/// then append it to the shared `average_rx_tp.csv` (spec §6, grounded
/// in `throughput.py`'s `get_average`/`save_average`).
pub fn compute_and_append_average(
    per_packet_csv: impl AsRef<Path>,
    average_csv: impl AsRef<Path>,
    bytes_per_packet: u16,
    unit: ThroughputUnit,
) -> Result<f64> {
    let mut reader = csv::Reader::from_path(per_packet_csv).map_err(csv_err)?;
    let mut timestamps = Vec::new();
    let mut packet_numbers = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let time: f64 = record
            .get(0)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::MalformedFrame("non-numeric Time column in CSV".into()))?;
        let packet: f64 = record
            .get(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::MalformedFrame("non-numeric Packet column in CSV".into()))?;
        timestamps.push(time);
        packet_numbers.push(packet);
    }
    if timestamps.len() < 2 {
        return Err(Error::Configuration("not enough rows to compute an average throughput".into()));
    }
    let elapsed = timestamps[timestamps.len() - 1] - timestamps[0];
    let packets = packet_numbers[packet_numbers.len() - 1];
    let average = match unit {
        ThroughputUnit::Kilobits => (packets * bytes_per_packet as f64 * 8.0) / elapsed / 1000.0,
        ThroughputUnit::Kilobytes => (packets * bytes_per_packet as f64) / elapsed / 1000.0,
    };

    let append_header = !average_csv.as_ref().exists();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(average_csv.as_ref())?,
        );
    if append_header {
        writer.write_record(["AverageThroughput"]).map_err(csv_err)?;
    }
    writer.write_record([average.to_string()]).map_err(csv_err)?;
    writer.flush()?;
    Ok(average)
}

fn csv_err(e: csv::Error) -> Error {
    Error::Io(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_dir() -> std::path::PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("ble-hci-throughput-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn packet_log_writes_header_then_rows() {
        let dir = scratch_dir();
        let path = dir.join("tp_receiver.csv");
        {
            let mut log = PacketLogWriter::create(&path).unwrap();
            log.write_row(Duration::from_millis(0), 0).unwrap();
            log.write_row(Duration::from_millis(500), 1).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "Time,Packet");
        assert_eq!(lines.next().unwrap(), "0,0");
    }

    #[test]
    fn average_throughput_matches_expected_kilobits() {
        let dir = scratch_dir();
        let per_packet = dir.join("tp_receiver.csv");
        {
            let mut log = PacketLogWriter::create(&per_packet).unwrap();
            log.write_row(Duration::from_secs(0), 0).unwrap();
            log.write_row(Duration::from_secs(1), 9).unwrap();
        }
        let average_csv = dir.join("average_rx_tp.csv");
        let average = compute_and_append_average(&per_packet, &average_csv, 27, ThroughputUnit::Kilobits).unwrap();
        // 9 packets * 27 bytes * 8 bits / 1s / 1000 = 1.944 kb/s
        assert!((average - 1.944).abs() < 1e-6);
        let appended = std::fs::read_to_string(&average_csv).unwrap();
        assert!(appended.contains("AverageThroughput"));
    }
}
