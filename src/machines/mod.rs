mod import;

use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::{db::Database, log_info, models::Machine};

pub use import::{parse_machines, write_machines, MachineRow, ParsedSheet};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Load a telemetry sheet into the machine registry. Serials already present
/// are overwritten.
pub async fn import_csv(db: &Database, path: &Path) -> Result<ImportReport> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let sheet = parse_machines(file, Utc::now())?;
    let imported = db.upsert_machines(&sheet.machines).await?;

    log_info!(
        "Imported {imported} machines from {} ({} rows skipped)",
        path.display(),
        sheet.skipped
    );
    Ok(ImportReport {
        imported,
        skipped: sheet.skipped,
    })
}

pub async fn export_csv(db: &Database, path: &Path) -> Result<Vec<Machine>> {
    let machines = db.list_machines().await?;
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_machines(file, &machines)?;
    Ok(machines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reimport_overwrites_by_serial() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("registry.sqlite3")).unwrap();
        let sheet = dir.path().join("machines.csv");

        std::fs::write(
            &sheet,
            "SERIAL,M1,UT\nSN-1,M-01,10\nSN-2,M-02,20\n",
        )
        .unwrap();
        let first = import_csv(&db, &sheet).await.unwrap();
        assert_eq!(first.imported, 2);

        std::fs::write(&sheet, "SERIAL,M1,UT\nSN-1,M-01,99\n,orphan,1\n").unwrap();
        let second = import_csv(&db, &sheet).await.unwrap();
        assert_eq!(second.imported, 1);
        assert_eq!(second.skipped, 1);

        let machines = db.list_machines().await.unwrap();
        let serials: Vec<_> = machines.iter().map(|m| m.serial.as_str()).collect();
        assert_eq!(serials, ["SN-1", "SN-2"]);
        assert_eq!(machines[0].downtime, 99.0);
        assert_eq!(machines[1].downtime, 20.0);
    }

    #[tokio::test]
    async fn export_writes_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let sheet = dir.path().join("in.csv");
        std::fs::write(&sheet, "SERIAL,IPADDRESS\nSN-7,10.1.1.1\n").unwrap();
        import_csv(&db, &sheet).await.unwrap();

        let out = dir.path().join("out.csv");
        let exported = export_csv(&db, &out).await.unwrap();

        assert_eq!(exported.len(), 1);
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("SN-7,10.1.1.1,"));
    }

    #[tokio::test]
    async fn missing_sheet_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let err = import_csv(&db, Path::new("/nonexistent/machines.csv"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to open"));
    }
}
