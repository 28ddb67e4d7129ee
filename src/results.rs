use crate::dnanexus::{CloudPlatform, FastqFile, ProjectBundle};
use crate::domain::{ReadNumber, ResultLayout};
use crate::error::SyncError;
use crate::metrics::{AlignmentMetrics, MetricCategory};
use crate::models::{
    Barcode, Library, NewSequencingResult, PairedBarcode, Payload, SequencingRequest,
    SequencingResult, SequencingRun,
};
use crate::pulsar::{self, LimsClient};

pub const MAPPER: &str = "bwa";

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsOutcome {
    pub results: Vec<SequencingResult>,
    pub created: usize,
    pub reused: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct ReadStats {
    uri: String,
    count: u64,
    aligned_perc: f64,
}

/// Creates the sequencing results of every library on `request` for `run`.
///
/// All libraries are validated before the first result is created, so a
/// library without barcode or FASTQs aborts with nothing written. Results
/// already linked to the run with the same library and read URIs are reused.
pub fn map_results(
    lims: &impl LimsClient,
    cloud: &impl CloudPlatform,
    request: &SequencingRequest,
    run: &SequencingRun,
    bundle: &ProjectBundle,
    layout: ResultLayout,
) -> Result<ResultsOutcome, SyncError> {
    let payloads = plan_results(lims, cloud, request, run, bundle, layout)?;
    for payload in &payloads {
        payload.validate()?;
    }

    let existing = run
        .sequencing_result_ids
        .iter()
        .map(|&id| pulsar::fetch::<SequencingResult>(lims, id))
        .collect::<Result<Vec<_>, SyncError>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    let mut outcome = ResultsOutcome {
        results: Vec::with_capacity(payloads.len()),
        created: 0,
        reused: 0,
    };
    for payload in payloads {
        if let Some(found) = existing.iter().find(|result| payload.is_satisfied_by(result)) {
            tracing::debug!(
                result_id = found.id,
                library_id = payload.library_id,
                "sequencing result already imported"
            );
            outcome.results.push(found.clone());
            outcome.reused += 1;
            continue;
        }
        let created = pulsar::create(lims, &payload)?;
        tracing::info!(
            result_id = created.id,
            library_id = payload.library_id,
            run_id = run.id,
            "created sequencing result"
        );
        outcome.results.push(created);
        outcome.created += 1;
    }
    Ok(outcome)
}

/// Builds the result payloads without writing anything.
pub fn plan_results(
    lims: &impl LimsClient,
    cloud: &impl CloudPlatform,
    request: &SequencingRequest,
    run: &SequencingRun,
    bundle: &ProjectBundle,
    layout: ResultLayout,
) -> Result<Vec<NewSequencingResult>, SyncError> {
    let mut payloads = Vec::new();
    for &library_id in &request.library_ids {
        let library = pulsar::fetch_existing::<Library>(lims, library_id)?;
        let barcode = library_barcode(lims, &library)?
            .ok_or(SyncError::BarcodeNotSet { library_id })?;

        let files = cloud.fetch_fastq_files(bundle, &barcode)?;
        if files.is_empty() {
            return Err(SyncError::FastqNotFound {
                project: bundle.project_id.to_string(),
                barcode,
            });
        }
        let metrics = cloud.fetch_alignment_metrics(bundle, &barcode)?;

        let mut reads = Vec::with_capacity(files.len());
        for file in &files {
            let read = read_number(file)?;
            reads.push((read, read_stats(&metrics, read, file)?));
        }

        let pair_aligned_perc = if request.paired_end {
            Some(metrics.pct_reads_aligned_in_pairs(MetricCategory::Pair)? * 100.0)
        } else {
            None
        };

        tracing::debug!(
            library_id,
            barcode = %barcode,
            files = files.len(),
            "planned library results"
        );
        let base = || {
            let mut payload = NewSequencingResult::new(library_id, run.id, MAPPER);
            payload.pair_aligned_perc = pair_aligned_perc;
            payload
        };
        match layout {
            ResultLayout::Merged => payloads.extend(merge_reads(reads, base)),
            ResultLayout::PerRead => {
                for (read, stats) in reads {
                    let mut payload = base();
                    apply_read(&mut payload, read, stats);
                    payloads.push(payload);
                }
            }
        }
    }
    Ok(payloads)
}

/// Resolves a library's barcode sequence, `None` when unset or blank.
///
/// Paired barcodes are rendered as `index1-index2`.
pub fn library_barcode(
    lims: &impl LimsClient,
    library: &Library,
) -> Result<Option<String>, SyncError> {
    if let Some(barcode_id) = library.barcode_id {
        return barcode_sequence(lims, barcode_id);
    }
    let Some(paired_id) = library.paired_barcode_id else {
        return Ok(None);
    };
    let paired = pulsar::fetch_existing::<PairedBarcode>(lims, paired_id)?;
    let (Some(index1), Some(index2)) = (paired.index1_id, paired.index2_id) else {
        return Ok(None);
    };
    match (
        barcode_sequence(lims, index1)?,
        barcode_sequence(lims, index2)?,
    ) {
        (Some(first), Some(second)) => Ok(Some(format!("{first}-{second}"))),
        _ => Ok(None),
    }
}

fn barcode_sequence(lims: &impl LimsClient, id: i64) -> Result<Option<String>, SyncError> {
    let barcode = pulsar::fetch_existing::<Barcode>(lims, id)?;
    Ok(barcode
        .sequence
        .map(|sequence| sequence.trim().to_string())
        .filter(|sequence| !sequence.is_empty()))
}

fn read_number(file: &FastqFile) -> Result<ReadNumber, SyncError> {
    let raw = file.read_property();
    raw.parse().map_err(|_| SyncError::UnknownReadNumber {
        file: file.locator.to_string(),
        value: raw.to_string(),
    })
}

fn read_stats(
    metrics: &AlignmentMetrics,
    read: ReadNumber,
    file: &FastqFile,
) -> Result<ReadStats, SyncError> {
    let category = metrics.category_for_read(read);
    Ok(ReadStats {
        uri: file.locator.to_string(),
        count: metrics.pf_reads(category)?,
        aligned_perc: metrics.pct_pf_reads_aligned(category)? * 100.0,
    })
}

fn apply_read(payload: &mut NewSequencingResult, read: ReadNumber, stats: ReadStats) {
    match read {
        ReadNumber::One => {
            payload.read1_uri = Some(stats.uri);
            payload.read1_count = Some(stats.count);
            payload.read1_aligned_perc = Some(stats.aligned_perc);
        }
        ReadNumber::Two => {
            payload.read2_uri = Some(stats.uri);
            payload.read2_count = Some(stats.count);
            payload.read2_aligned_perc = Some(stats.aligned_perc);
        }
    }
}

/// Pairs the n-th read 1 file with the n-th read 2 file of a library.
fn merge_reads(
    reads: Vec<(ReadNumber, ReadStats)>,
    base: impl Fn() -> NewSequencingResult,
) -> Vec<NewSequencingResult> {
    let (firsts, seconds): (Vec<_>, Vec<_>) = reads
        .into_iter()
        .partition(|(read, _)| *read == ReadNumber::One);
    let mut firsts = firsts.into_iter();
    let mut seconds = seconds.into_iter();

    let mut payloads = Vec::new();
    loop {
        let first = firsts.next();
        let second = seconds.next();
        if first.is_none() && second.is_none() {
            break;
        }
        let mut payload = base();
        for (read, stats) in first.into_iter().chain(second) {
            apply_read(&mut payload, read, stats);
        }
        payloads.push(payload);
    }
    payloads
}
