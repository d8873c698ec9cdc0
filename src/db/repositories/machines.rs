use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{helpers::parse_datetime, Database};
use crate::models::Machine;

fn row_to_machine(row: &Row) -> Result<Machine, rusqlite::Error> {
    let imported_at: String = row.get("imported_at")?;

    Ok(Machine {
        serial: row.get("serial")?,
        ip_address: row.get("ip_address")?,
        machine_number: row.get("machine_number")?,
        signal_status: row.get("signal_status")?,
        total_signals: row.get("total_signals")?,
        cycle_time: row.get("cycle_time")?,
        production_count: row.get("production_count")?,
        operating_time: row.get("operating_time")?,
        downtime: row.get("downtime")?,
        timestamp: row.get("timestamp")?,
        imported_at: parse_datetime(&imported_at, "imported_at").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                )),
            )
        })?,
    })
}

impl Database {
    /// Insert or overwrite machines keyed by serial number.
    pub async fn upsert_machines(&self, machines: &[Machine]) -> Result<usize> {
        let machines = machines.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            for machine in &machines {
                tx.execute(
                    "INSERT INTO machines (
                        serial,
                        ip_address,
                        machine_number,
                        signal_status,
                        total_signals,
                        cycle_time,
                        production_count,
                        operating_time,
                        downtime,
                        timestamp,
                        imported_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(serial) DO UPDATE SET
                        ip_address = excluded.ip_address,
                        machine_number = excluded.machine_number,
                        signal_status = excluded.signal_status,
                        total_signals = excluded.total_signals,
                        cycle_time = excluded.cycle_time,
                        production_count = excluded.production_count,
                        operating_time = excluded.operating_time,
                        downtime = excluded.downtime,
                        timestamp = excluded.timestamp,
                        imported_at = excluded.imported_at",
                    params![
                        machine.serial,
                        machine.ip_address,
                        machine.machine_number,
                        machine.signal_status,
                        machine.total_signals,
                        machine.cycle_time,
                        machine.production_count,
                        machine.operating_time,
                        machine.downtime,
                        machine.timestamp,
                        machine.imported_at.to_rfc3339(),
                    ],
                )
                .with_context(|| format!("failed to upsert machine {}", machine.serial))?;
            }

            tx.commit()?;
            Ok(machines.len())
        })
        .await
    }

    pub async fn list_machines(&self) -> Result<Vec<Machine>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT serial, ip_address, machine_number, signal_status, total_signals,
                        cycle_time, production_count, operating_time, downtime, timestamp, imported_at
                 FROM machines
                 ORDER BY serial ASC",
            )?;
            let machines = stmt
                .query_map([], row_to_machine)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(machines)
        })
        .await
    }
}
