use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dnanexus::{CloudPlatform, TransferRequest};
use crate::domain::{ProjectId, ResultLayout};
use crate::error::SyncError;
use crate::pulsar::LimsClient;
use crate::reconcile::{self, RunAction};
use crate::resolve;
use crate::results;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Name of the LIMS data storage provider new storages point at.
    pub storage_provider: String,
    pub result_layout: ResultLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Transfer,
    Describe,
    Resolve,
    PairedEnd,
    Run,
    Results,
    Done,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ImportEvent {
    pub project_id: Option<String>,
    pub phase: ImportPhase,
    pub message: String,
}

pub trait ImportSink {
    fn event(&self, event: ImportEvent);
}

/// Forwards import events to `tracing`.
pub struct TracingSink;

impl ImportSink for TracingSink {
    fn event(&self, event: ImportEvent) {
        tracing::debug!(
            project_id = event.project_id.as_deref().unwrap_or("-"),
            phase = ?event.phase,
            "{}",
            event.message
        );
    }
}

/// Drops every event.
pub struct QuietSink;

impl ImportSink for QuietSink {
    fn event(&self, _event: ImportEvent) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub request_id: i64,
    pub run_id: i64,
    pub run_action: RunAction,
    pub run_repaired: bool,
    pub paired_end_upgraded: bool,
    pub results_created: usize,
    pub results_reused: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProjectOutcome {
    Imported(ImportSummary),
    Skipped { error_kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectReport {
    pub project_id: String,
    pub project_name: Option<String>,
    pub outcome: ProjectOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects: Vec<ProjectReport>,
}

impl BatchReport {
    pub fn imported_count(&self) -> usize {
        self.projects
            .iter()
            .filter(|project| matches!(project.outcome, ProjectOutcome::Imported(_)))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.projects.len() - self.imported_count()
    }

    pub fn has_failures(&self) -> bool {
        self.skipped_count() > 0
    }
}

pub struct Importer<C: CloudPlatform, L: LimsClient> {
    cloud: C,
    lims: L,
    options: ImportOptions,
}

impl<C: CloudPlatform, L: LimsClient> Importer<C, L> {
    pub fn new(cloud: C, lims: L, options: ImportOptions) -> Self {
        Self {
            cloud,
            lims,
            options,
        }
    }

    /// Accepts pending DNAnexus transfers, then imports every accepted project.
    pub fn sync(
        &self,
        transfer: &TransferRequest,
        sink: &dyn ImportSink,
    ) -> Result<BatchReport, SyncError> {
        sink.event(ImportEvent {
            project_id: None,
            phase: ImportPhase::Transfer,
            message: format!("accepting pending transfers for {}", transfer.org),
        });
        let accepted = self.cloud.accept_pending_transfers(transfer)?;
        tracing::debug!(org = %transfer.org, count = accepted.len(), ?accepted, "accepted transfers");

        let projects = accepted
            .into_iter()
            .map(|(id, name)| (id, Some(name)))
            .collect::<Vec<_>>();
        self.run_batch(&projects, sink)
    }

    /// Imports projects one after the other.
    ///
    /// Project-scoped failures are recorded and the batch moves on; any other
    /// error stops the batch.
    pub fn run_batch(
        &self,
        projects: &[(ProjectId, Option<String>)],
        sink: &dyn ImportSink,
    ) -> Result<BatchReport, SyncError> {
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(projects.len());

        for (project_id, project_name) in projects {
            let outcome = match self.import_project(project_id, sink) {
                Ok(summary) => ProjectOutcome::Imported(summary),
                Err(err) if err.is_project_scoped() => {
                    tracing::error!(
                        project_id = %project_id,
                        project_name = project_name.as_deref().unwrap_or(""),
                        error_kind = err.kind(),
                        "project import aborted: {err}"
                    );
                    sink.event(ImportEvent {
                        project_id: Some(project_id.to_string()),
                        phase: ImportPhase::Skipped,
                        message: err.to_string(),
                    });
                    ProjectOutcome::Skipped {
                        error_kind: err.kind().to_string(),
                        message: err.to_string(),
                    }
                }
                Err(err) => {
                    tracing::error!(
                        project_id = %project_id,
                        error_kind = err.kind(),
                        "batch stopped: {err}"
                    );
                    return Err(err);
                }
            };
            reports.push(ProjectReport {
                project_id: project_id.to_string(),
                project_name: project_name.clone(),
                outcome,
            });
        }

        Ok(BatchReport {
            started_at,
            finished_at: Utc::now(),
            projects: reports,
        })
    }

    /// Imports one DNAnexus project into the LIMS.
    ///
    /// Safe to repeat: the request lookup, run reconciliation and result
    /// creation all find what a previous attempt wrote.
    pub fn import_project(
        &self,
        project_id: &ProjectId,
        sink: &dyn ImportSink,
    ) -> Result<ImportSummary, SyncError> {
        let start = Instant::now();
        let event = |phase: ImportPhase, message: String| {
            sink.event(ImportEvent {
                project_id: Some(project_id.to_string()),
                phase,
                message,
            })
        };

        event(ImportPhase::Describe, "fetching project metadata".to_string());
        let bundle = self.cloud.fetch_project_bundle(project_id)?;
        let library_name = bundle.library_name()?;

        event(
            ImportPhase::Resolve,
            format!("resolving sequencing request '{library_name}'"),
        );
        let mut request = resolve::resolve_request(&self.lims, library_name)?;

        event(
            ImportPhase::PairedEnd,
            format!("checking paired-end flag of request {}", request.display_name()),
        );
        let paired_end_upgraded =
            reconcile::reconcile_paired_end(&self.lims, &mut request, bundle.paired())?;

        event(ImportPhase::Run, "reconciling sequencing run".to_string());
        let reconciled = reconcile::reconcile_run(
            &self.lims,
            &request,
            &bundle,
            &self.options.storage_provider,
        )?;

        if self.options.result_layout == ResultLayout::PerRead {
            tracing::warn!(
                project_id = %project_id,
                "per_read layout writes one partial sequencing result per FASTQ file"
            );
        }
        event(
            ImportPhase::Results,
            format!("mapping results into run {}", reconciled.run.id),
        );
        let outcome = results::map_results(
            &self.lims,
            &self.cloud,
            &request,
            &reconciled.run,
            &bundle,
            self.options.result_layout,
        )?;

        let summary = ImportSummary {
            request_id: request.id,
            run_id: reconciled.run.id,
            run_action: reconciled.action,
            run_repaired: reconciled.repaired,
            paired_end_upgraded,
            results_created: outcome.created,
            results_reused: outcome.reused,
            elapsed_ms: start.elapsed().as_millis(),
        };
        tracing::info!(
            project_id = %project_id,
            request_id = summary.request_id,
            run_id = summary.run_id,
            results_created = summary.results_created,
            results_reused = summary.results_reused,
            "imported project"
        );
        event(
            ImportPhase::Done,
            format!(
                "imported {} result(s) into run {}",
                summary.results_created, summary.run_id
            ),
        );
        Ok(summary)
    }
}
