use std::io::{self, Write};

use crate::import::{BatchReport, ImportSink, ProjectOutcome, QuietSink, TracingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    /// JSON mode keeps stdout for the report alone.
    pub fn sink(self) -> &'static dyn ImportSink {
        match self {
            Self::Human => &TracingSink,
            Self::Json => &QuietSink,
        }
    }

    pub fn write_report(self, report: &BatchReport, out: &mut impl Write) -> io::Result<()> {
        match self {
            Self::Human => report.write_summary(out),
            Self::Json => report.write_json(out),
        }
    }
}

impl BatchReport {
    pub fn write_json(&self, out: &mut impl Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, self)?;
        writeln!(out)
    }

    pub fn write_summary(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "seqrun-sync: {} project(s), {} imported, {} skipped",
            self.projects.len(),
            self.imported_count(),
            self.skipped_count()
        )?;
        for project in &self.projects {
            let name = project.project_name.as_deref().unwrap_or("");
            match &project.outcome {
                ProjectOutcome::Imported(summary) => writeln!(
                    out,
                    "  imported {} {name} -> run {} ({} created, {} already present)",
                    project.project_id,
                    summary.run_id,
                    summary.results_created,
                    summary.results_reused
                )?,
                ProjectOutcome::Skipped {
                    error_kind,
                    message,
                } => writeln!(
                    out,
                    "  skipped  {} {name} [{error_kind}] {message}",
                    project.project_id
                )?,
            }
        }
        Ok(())
    }
}
