use std::time::SystemTime;

use anyhow::{Context, Result};
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use fleetpatch_core::models::{Machine, PackageState, ScanSnapshot, UpdateRecord};
use fleetpatch_core::orchestration::UpdateReport;

use crate::OutputFormat;

pub fn timestamp(at: SystemTime) -> Result<String> {
    OffsetDateTime::from(at)
        .format(&Rfc3339)
        .context("failed to format timestamp")
}

pub fn machines(machines: &[Machine], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(machines)?);
        return Ok(());
    }

    if machines.is_empty() {
        println!("No machines registered.");
        return Ok(());
    }

    println!("{:<6} {:<28} {:<18} {}", "ID", "HOSTNAME", "IP", "USER");
    for machine in machines {
        println!(
            "{:<6} {:<28} {:<18} {}",
            machine.id, machine.hostname, machine.ip, machine.username
        );
    }
    Ok(())
}

pub fn packages(packages: &[PackageState], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(packages)?);
        return Ok(());
    }

    if packages.is_empty() {
        println!("No upgradable packages.");
        return Ok(());
    }

    println!("{:<32} {:<28} {:<28} {}", "PACKAGE", "VERSION", "INSTALLED", "AVAILABLE");
    for package in packages {
        println!(
            "{:<32} {:<28} {:<28} {}",
            package.name,
            package.current_version,
            package.upgrade_from_version.as_deref().unwrap_or("-"),
            package.available_versions.join(", ")
        );
    }
    Ok(())
}

pub fn scans(scans: &[ScanSnapshot], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        let entries = scans
            .iter()
            .map(|scan| -> Result<serde_json::Value> {
                Ok(json!({
                    "id": scan.id.0,
                    "machine_id": scan.machine_id,
                    "created_at": timestamp(scan.created_at)?,
                    "upgradable": scan.decode().upgradable.len(),
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if scans.is_empty() {
        println!("No scans recorded.");
        return Ok(());
    }

    println!("{:<8} {:<26} {}", "SCAN", "TAKEN", "LINES");
    for scan in scans {
        println!(
            "{:<8} {:<26} {}",
            scan.id.0,
            timestamp(scan.created_at)?,
            scan.decode().upgradable.len()
        );
    }
    Ok(())
}

pub fn history(records: &[UpdateRecord], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        let entries = records
            .iter()
            .map(|record| -> Result<serde_json::Value> {
                Ok(json!({
                    "id": record.id.0,
                    "machine_id": record.machine_id,
                    "created_at": timestamp(record.created_at)?,
                    "package": record.package,
                    "version": record.version,
                    "status": record.status,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No updates recorded.");
        return Ok(());
    }

    println!(
        "{:<26} {:<32} {:<28} {}",
        "WHEN", "PACKAGE", "VERSION", "STATUS"
    );
    for record in records {
        println!(
            "{:<26} {:<32} {:<28} {}",
            timestamp(record.created_at)?,
            record.package,
            record.version,
            record.status.as_str()
        );
    }
    Ok(())
}

pub fn update_report(report: &UpdateReport) -> Result<()> {
    println!(
        "Update on {} finished: {:?}",
        report.machine.hostname, report.run.status
    );
    if let Some(recap) = &report.run.recap_line {
        println!("  {}", recap.trim());
    }
    if let Some(error) = &report.execution_error {
        eprintln!("Playbook failed: {:?}", error.kind);
    }
    history(&report.records, OutputFormat::Table)
}
