//! Markdown output formatters for CLI commands

use crate::analyzer::ModuleSummary;
use crate::model::AnalysisReport;

/// Format analysis reports as markdown
pub fn reports(reports: &[AnalysisReport<ModuleSummary>]) -> String {
    let mut md = String::new();
    for report in reports {
        md.push_str(&report_section(report));
    }
    md
}

fn report_section(report: &AnalysisReport<ModuleSummary>) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {}\n\n", report.document));

    if let Some(error) = &report.error {
        md.push_str(&format!("**Error**: {}\n\n", error));
        return md;
    }

    md.push_str(&format!(
        "**Version**: {} (computed {})\n\n",
        report.version,
        report.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    let Some(summary) = &report.payload else {
        return md;
    };

    md.push_str(&format!("**Lines**: {}\n\n", summary.line_count));

    if !summary.bindings.is_empty() {
        md.push_str("## Bindings\n\n");
        for binding in &summary.bindings {
            md.push_str(&format!(
                "- `{}` (line {})\n",
                binding.name,
                binding.line + 1
            ));
        }
        md.push('\n');
    }

    if !summary.functions.is_empty() {
        md.push_str("## Functions\n\n");
        for function in &summary.functions {
            md.push_str(&format!(
                "- `{}` (line {})\n",
                function.label(),
                function.line + 1
            ));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::summarize;
    use crate::model::{DocumentId, Version};
    use chrono::{TimeZone, Utc};

    fn report(payload: Option<ModuleSummary>, error: Option<&str>) -> AnalysisReport<ModuleSummary> {
        AnalysisReport {
            document: DocumentId::parse("file:///work/d1.py").unwrap(),
            version: Version::new(2),
            computed_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            payload,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn formats_summary() {
        let summary = summarize("x = 1\ndef f(a, b):\n    return a\n").unwrap();
        let md = reports(&[report(Some(summary), None)]);
        assert!(md.starts_with("# file:///work/d1.py\n\n"));
        assert!(md.contains("**Version**: v2 (computed 2026-01-02 03:04:05 UTC)"));
        assert!(md.contains("**Lines**: 3"));
        assert!(md.contains("- `x` (line 1)\n"));
        assert!(md.contains("- `f(a, b)` (line 2)\n"));
    }

    #[test]
    fn formats_error() {
        let md = reports(&[report(None, Some("timed out"))]);
        assert!(md.contains("**Error**: timed out"));
        assert!(!md.contains("**Version**"));
    }

    #[test]
    fn skips_empty_sections() {
        let md = reports(&[report(Some(ModuleSummary::default()), None)]);
        assert!(!md.contains("## Bindings"));
        assert!(!md.contains("## Functions"));
    }
}
