//! Concurrency-bounded batch scheduling and result aggregation.
//!
//! Jobs run in consecutive groups of the configured concurrency; the next
//! group starts only once the whole current group has finished. That caps
//! in-flight renderer sessions without a work-stealing pool, and a failed
//! job never cancels its siblings.

use crate::capture::{self, ConversionJob, JobResult};
use crate::config::EffectiveConfig;
use crate::pipeline::PipelineContext;
use futures::future::join_all;
use tracing::info;

pub type BatchResult = Vec<JobResult>;

/// Run every job, at most `concurrency` at a time. Always returns exactly
/// one result per submitted job.
pub async fn run(
    ctx: &PipelineContext,
    base: &EffectiveConfig,
    jobs: Vec<ConversionJob>,
    concurrency: usize,
) -> BatchResult {
    let group_size = concurrency.max(1);
    info!(
        "converting {} document(s) with concurrency {}",
        jobs.len(),
        group_size
    );

    let mut results = Vec::with_capacity(jobs.len());
    for group in jobs.chunks(group_size) {
        let outcomes = join_all(group.iter().map(|job| capture::render(ctx, base, job))).await;
        results.extend(outcomes);
    }
    results
}

/// Success/failure counts for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub successful: usize,
    pub failed: usize,
}

/// Count outcomes. Pure function of the results.
pub fn summarize(results: &[JobResult]) -> BatchSummary {
    let successful = results.iter().filter(|r| r.success).count();
    BatchSummary {
        successful,
        failed: results.len() - successful,
    }
}

/// Human-readable breakdown of a batch: counts, rate, and which inputs
/// became which outputs or failed with which error.
pub fn render_report(results: &[JobResult]) -> String {
    let summary = summarize(results);
    let rate = if results.is_empty() {
        0.0
    } else {
        summary.successful as f64 / results.len() as f64 * 100.0
    };

    let mut report = String::new();
    report.push_str("Conversion report\n");
    report.push_str(&"=".repeat(50));
    report.push('\n');
    report.push_str(&format!("  succeeded: {}\n", summary.successful));
    report.push_str(&format!("  failed: {}\n", summary.failed));
    report.push_str(&format!("  success rate: {rate:.1}%\n"));

    if summary.successful > 0 {
        report.push_str("\nconverted:\n");
        for result in results.iter().filter(|r| r.success) {
            let output = result
                .output
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            report.push_str(&format!("  {} -> {output}\n", file_name_of(result)));
        }
    }

    if summary.failed > 0 {
        report.push_str("\nfailed:\n");
        for result in results.iter().filter(|r| !r.success) {
            let error = result.error.as_deref().unwrap_or("unknown error");
            report.push_str(&format!("  {}: {error}\n", file_name_of(result)));
        }
    }

    report
}

fn file_name_of(result: &JobResult) -> String {
    result
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| result.input.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn result(input: &str, success: bool) -> JobResult {
        JobResult {
            success,
            input: PathBuf::from(input),
            output: success.then(|| PathBuf::from(format!("{input}.png"))),
            error: (!success).then(|| "invalid HTML document".to_string()),
            config: None,
        }
    }

    #[test]
    fn summary_counts() {
        let results = vec![result("a.html", true), result("b.html", false), result("c.html", true)];
        assert_eq!(
            summarize(&results),
            BatchSummary {
                successful: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn report_lists_every_outcome() {
        let results = vec![result("a.html", true), result("b.html", false)];
        let report = render_report(&results);
        assert!(report.contains("succeeded: 1"));
        assert!(report.contains("failed: 1"));
        assert!(report.contains("success rate: 50.0%"));
        assert!(report.contains("a.html ->"));
        assert!(report.contains("b.html: invalid HTML document"));
    }

    #[test]
    fn empty_batch_report() {
        let report = render_report(&[]);
        assert!(report.contains("success rate: 0.0%"));
    }
}
