use std::io::{Read, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Machine;

/// One telemetry row as it appears in the export sheet. Every cell is read as
/// text; numeric conversion happens in [`MachineRow::into_machine`].
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MachineRow {
    #[serde(rename = "SERIAL", default)]
    pub serial: String,
    #[serde(rename = "IPADDRESS", default)]
    pub ip_address: String,
    #[serde(rename = "M1", default)]
    pub machine_number: String,
    #[serde(rename = "D1", default)]
    pub signal_status: String,
    #[serde(rename = "E1", default)]
    pub total_signals: String,
    #[serde(rename = "E3", default)]
    pub cycle_time: String,
    #[serde(rename = "C1", default)]
    pub production_count: String,
    #[serde(rename = "OT", default)]
    pub operating_time: String,
    #[serde(rename = "UT", default)]
    pub downtime: String,
    #[serde(rename = "TIMESTAMP", default)]
    pub timestamp: String,
}

fn number(cell: &str) -> f64 {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

impl MachineRow {
    /// `None` when the row has no serial.
    pub fn into_machine(self, imported_at: DateTime<Utc>) -> Option<Machine> {
        let serial = self.serial.trim().to_string();
        if serial.is_empty() {
            return None;
        }

        Some(Machine {
            serial,
            ip_address: self.ip_address.trim().to_string(),
            machine_number: self.machine_number.trim().to_string(),
            signal_status: number(&self.signal_status) as i64,
            total_signals: number(&self.total_signals) as i64,
            cycle_time: number(&self.cycle_time),
            production_count: number(&self.production_count) as i64,
            operating_time: number(&self.operating_time),
            downtime: number(&self.downtime),
            timestamp: self.timestamp.trim().to_string(),
            imported_at,
        })
    }

    fn from_machine(machine: &Machine) -> Self {
        Self {
            serial: machine.serial.clone(),
            ip_address: machine.ip_address.clone(),
            machine_number: machine.machine_number.clone(),
            signal_status: machine.signal_status.to_string(),
            total_signals: machine.total_signals.to_string(),
            cycle_time: machine.cycle_time.to_string(),
            production_count: machine.production_count.to_string(),
            operating_time: machine.operating_time.to_string(),
            downtime: machine.downtime.to_string(),
            timestamp: machine.timestamp.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub machines: Vec<Machine>,
    /// Rows dropped for lacking a serial.
    pub skipped: usize,
}

/// Parse a header-row CSV sheet. Blank lines are ignored; columns outside the
/// known set are ignored too.
pub fn parse_machines<R: Read>(reader: R, imported_at: DateTime<Utc>) -> Result<ParsedSheet> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut sheet = ParsedSheet::default();
    for (index, record) in csv_reader.deserialize::<MachineRow>().enumerate() {
        // Data rows start on line 2.
        let row = record.with_context(|| format!("failed to read CSV row {}", index + 2))?;
        match row.into_machine(imported_at) {
            Some(machine) => sheet.machines.push(machine),
            None => sheet.skipped += 1,
        }
    }
    Ok(sheet)
}

/// Write machines back out in the import column layout.
pub fn write_machines<W: Write>(writer: W, machines: &[Machine]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for machine in machines {
        csv_writer
            .serialize(MachineRow::from_machine(machine))
            .with_context(|| format!("failed to write machine {}", machine.serial))?;
    }
    csv_writer.flush().context("failed to flush CSV output")?;
    Ok(())
}
