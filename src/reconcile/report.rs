//! Execution report for a finished run

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::PathBuf;

use super::workflow::WorkflowMetadata;
use crate::model::{Run, RunStatus, Transform};

/// The host's own report if it wrote one, else a minimal report generated
/// into the work directory.
pub fn locate_or_write(
    meta: &WorkflowMetadata,
    transform: &Transform,
    run: &Run,
    status: RunStatus,
    finished_at: DateTime<Utc>,
) -> io::Result<PathBuf> {
    if let Some(path) = &meta.report_path {
        if path.is_file() {
            return Ok(path.clone());
        }
    }

    let path = meta.work_dir.join(format!("lamin_run_report_{}.html", run.uid));
    fs::write(&path, render(meta, transform, run, status, finished_at))?;
    Ok(path)
}

fn render(
    meta: &WorkflowMetadata,
    transform: &Transform,
    run: &Run,
    status: RunStatus,
    finished_at: DateTime<Utc>,
) -> String {
    let mut rows = vec![
        ("Transform", format!("{} ({})", transform.key, transform.version_or_fallback())),
        ("Run", run.uid.clone()),
        ("Status", status.to_string()),
        ("Finished", finished_at.to_rfc3339()),
    ];
    if let Some(started) = run.started_at {
        rows.push(("Started", started.to_rfc3339()));
    }
    if let Some(name) = meta.run_name.as_ref().or(run.name.as_ref()) {
        rows.push(("Name", name.clone()));
    }
    if let Some(command) = &meta.command_line {
        rows.push(("Command", command.clone()));
    }

    let body: String = rows
        .iter()
        .map(|(k, v)| format!("<tr><th>{}</th><td>{}</td></tr>\n", k, escape(v)))
        .collect();
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Run {}</title></head>\n<body><table>\n{}</table></body></html>\n",
        escape(&run.uid),
        body
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
