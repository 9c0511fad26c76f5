//! Provisioning report artifact.
//!
//! Every run leaves a JSON record of what was (or would have been) done, so
//! a card of unknown history can be compared against the run that produced
//! it. Default path: `/var/log/mkcard/report.json` (override via
//! `MKCARD_REPORT_PATH` for tests).

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::planner::ResolvedPartition;

const DEFAULT_REPORT_PATH: &str = "/var/log/mkcard/report.json";

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn report_path() -> PathBuf {
    std::env::var_os("MKCARD_REPORT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH))
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionRecord {
    pub number: u32,
    pub fs: String,
    pub start_sector: u64,
    pub end_sector: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub started_at_unix_ms: u64,
    pub device: String,
    pub dry_run: bool,
    /// Resolved layout, when this run (re)created the table.
    pub layout: Vec<PartitionRecord>,
    pub firmware_revision: Option<String>,
    pub os_revision: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl ProvisionReport {
    pub fn new(device: &str, dry_run: bool) -> Self {
        Self {
            started_at_unix_ms: now_unix_ms(),
            device: device.to_string(),
            dry_run,
            layout: Vec::new(),
            firmware_revision: None,
            os_revision: None,
            steps: Vec::new(),
        }
    }

    pub fn record_layout(&mut self, resolved: &[ResolvedPartition]) {
        self.layout = resolved
            .iter()
            .map(|p| PartitionRecord {
                number: p.number,
                fs: p.fs.name().to_string(),
                start_sector: p.start_sector,
                end_sector: p.end_sector,
            })
            .collect();
    }

    pub fn record_step(&mut self, step: &str, status: &str) {
        self.steps.push(StepRecord {
            step: step.to_string(),
            status: status.to_string(),
        });
    }

    pub fn write(&self) -> Result<PathBuf> {
        let path = report_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create report dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        Ok(path)
    }
}
