//! Analysis-Coordinator: keep background analysis of open documents fresh
//!
//! Documents are opened and edited, each edit bumps the document's version,
//! and a single background worker re-analyzes whatever changed. Callers ask
//! for the analysis "as of at least version V" and never observe a stale one.

pub mod analyzer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod format;
pub mod lsp;
pub mod model;
pub mod queue;
pub mod results;
pub mod store;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

pub use analyzer::{Analyzer, AssignmentAnalyzer, ModuleSummary};
pub use config::Config;
pub use coordinator::AnalysisCoordinator;
pub use error::CoordinatorError;
pub use events::{ChannelSink, EventSink, NullSink, TracingSink};
pub use model::{AnalysisResult, DocumentId, LogEvent, Severity, Version};

/// Analyze files with the demo analyzer
///
/// Every file is opened in one coordinator, then each analysis is awaited
/// with `timeout`. Per-file failures (unreadable file, timeout) are reported
/// in the returned entries; only coordinator setup errors fail the call.
///
/// # Arguments
/// * `paths` - Files to analyze
/// * `timeout` - Per-file wait bound
/// * `config` - Coordinator settings; `analysis_updates` controls the per-result log events
///
/// # Returns
/// One `AnalysisReport` per path, in input order
pub async fn analyze_files(
    paths: &[PathBuf],
    timeout: Duration,
    config: Config,
) -> Result<Vec<model::AnalysisReport<ModuleSummary>>> {
    let coordinator = AnalysisCoordinator::start(AssignmentAnalyzer, Arc::new(TracingSink), config);

    let mut opened = Vec::new();
    for path in paths {
        let id = DocumentId::from_path(path)?;
        let opened_doc = match tokio::fs::read_to_string(path).await {
            Ok(text) => coordinator
                .notify_opened(&id, &text)
                .map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::anyhow!("Cannot read {}: {e}", path.display())),
        };
        opened.push((id, opened_doc));
    }

    let mut reports = Vec::new();
    for (id, opened_doc) in opened {
        let report = match opened_doc {
            Ok(version) => match coordinator.wait_for_current(&id, timeout).await {
                Ok(result) => model::AnalysisReport {
                    document: id,
                    version: result.version,
                    computed_at: result.computed_at,
                    payload: Some(result.payload.clone()),
                    error: None,
                },
                Err(e) => failed_report(id, version, e.into()),
            },
            Err(e) => failed_report(id, Version::BASELINE, e),
        };
        reports.push(report);
    }

    coordinator.shutdown().await;
    Ok(reports)
}

fn failed_report(
    document: DocumentId,
    version: Version,
    error: anyhow::Error,
) -> model::AnalysisReport<ModuleSummary> {
    model::AnalysisReport {
        document,
        version,
        computed_at: chrono::Utc::now(),
        payload: None,
        error: Some(format!("{error:#}")),
    }
}
