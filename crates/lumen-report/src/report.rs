//! Text reports, JSON documents and batch summaries

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use lumen_core::{AnalysisRecord, Error, Result};

const RULE_WIDTH: usize = 60;

/// File name of the batch summary inside the output directory
pub const SUMMARY_FILE_NAME: &str = "aesthetic_analysis_summary.txt";

/// Serialized form of one image's evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub image_path: String,
    /// RFC 3339, UTC
    pub timestamp: String,
    /// Outcome label, e.g. `ok` or `degraded_ok`
    pub outcome: String,
    pub analysis: AnalysisRecord,
}

impl AnalysisDocument {
    pub fn new(
        image: &Path,
        outcome: impl Into<String>,
        analysis: AnalysisRecord,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            image_path: image.display().to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            outcome: outcome.into(),
            analysis,
        }
    }
}

/// Where the per-image reports for `image` are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub text: PathBuf,
    pub json: PathBuf,
}

impl ReportPaths {
    pub fn for_image(output_dir: &Path, image: &Path) -> Self {
        Self::with_stem(output_dir, &image_stem(image))
    }

    /// Paths for every image of a batch, in input order. Images that share
    /// a stem (e.g. `day1/IMG_0001.jpg` and `day2/IMG_0001.jpg`) keep the
    /// plain stem for the first one and get `_2`, `_3`, ... after that.
    pub fn for_batch(output_dir: &Path, images: &[PathBuf]) -> Vec<Self> {
        // Lowercased so case-insensitive file systems cannot collide either.
        let mut taken: HashSet<String> = HashSet::new();

        images
            .iter()
            .map(|image| {
                let stem = image_stem(image);
                let mut candidate = stem.clone();
                let mut n = 2;
                while !taken.insert(candidate.to_lowercase()) {
                    candidate = format!("{}_{}", stem, n);
                    n += 1;
                }
                Self::with_stem(output_dir, &candidate)
            })
            .collect()
    }

    fn with_stem(output_dir: &Path, stem: &str) -> Self {
        Self {
            text: output_dir.join(format!("{}_aesthetic_report.txt", stem)),
            json: output_dir.join(format!("{}_aesthetic_analysis.json", stem)),
        }
    }
}

fn image_stem(image: &Path) -> String {
    image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Human-readable report for one image
pub fn format_analysis_report(record: &AnalysisRecord, image: &Path) -> String {
    let s = &record.scores;
    format!(
        "\n{rule}\n图像美学分析报告\n{rule}\n\n\
         分析图像: {image}\n\n\
         【维度分析与评分】\n\n\
         🎨 构图分析 (评分: {comp:.1}/10)\n{comp_text}\n\n\
         📷 焦段分析 (评分: {focal:.1}/10)\n{focal_text}\n\n\
         💡 对比度&曝光度&亮度分析 (评分: {contrast:.1}/10)\n{contrast_text}\n\n\
         【综合评价】\n综合评分: {overall:.1}/10\n\n{evaluation}\n\n\
         【改进建议】\n{suggestions}\n\n\
         {rule}\n分析完成\n{rule}\n",
        rule = rule(),
        image = image.display(),
        comp = s.composition,
        comp_text = record.composition_text,
        focal = s.focal_length,
        focal_text = record.focal_length_text,
        contrast = s.contrast_exposure_brightness,
        contrast_text = record.contrast_text,
        overall = s.overall,
        evaluation = record.overall_evaluation_text,
        suggestions = record.suggestions_text,
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Aggregate report over a batch of parsed records
pub fn generate_summary_report(analyses: &[(PathBuf, AnalysisRecord)]) -> String {
    if analyses.is_empty() {
        return "没有分析结果可供汇总".to_string();
    }

    let count = analyses.len() as f64;
    let average = |score: fn(&AnalysisRecord) -> f64| -> f64 {
        analyses.iter().map(|(_, record)| score(record)).sum::<f64>() / count
    };

    // First occurrence wins on ties.
    let mut best = &analyses[0];
    let mut worst = &analyses[0];
    for entry in &analyses[1..] {
        if entry.1.scores.overall > best.1.scores.overall {
            best = entry;
        }
        if entry.1.scores.overall < worst.1.scores.overall {
            worst = entry;
        }
    }

    let mut report = format!(
        "\n{rule}\n图像美学分析汇总报告\n{rule}\n\n\
         分析图像总数: {total}\n\n\
         【平均评分】\n\
         - 综合评分: {overall:.2}/10\n\
         - 构图评分: {comp:.2}/10\n\
         - 焦段评分: {focal:.2}/10\n\
         - 对比度&曝光度&亮度评分: {contrast:.2}/10\n\n\
         【最佳表现】\n图像: {best}\n综合评分: {best_score:.1}/10\n\n\
         【需要改进】\n图像: {worst}\n综合评分: {worst_score:.1}/10\n\n\
         【详细结果】\n",
        rule = rule(),
        total = analyses.len(),
        overall = average(|r| r.scores.overall),
        comp = average(|r| r.scores.composition),
        focal = average(|r| r.scores.focal_length),
        contrast = average(|r| r.scores.contrast_exposure_brightness),
        best = file_name(&best.0),
        best_score = best.1.scores.overall,
        worst = file_name(&worst.0),
        worst_score = worst.1.scores.overall,
    );

    for (i, (image, record)) in analyses.iter().enumerate() {
        let s = &record.scores;
        report.push_str(&format!(
            "\n{}. {}\n   综合评分: {:.1}/10\n   构图: {:.1}/10 | 焦段: {:.1}/10 | 对比度&曝光度&亮度: {:.1}/10\n",
            i + 1,
            file_name(image),
            s.overall,
            s.composition,
            s.focal_length,
            s.contrast_exposure_brightness,
        ));
    }

    report.push_str(&format!("\n{rule}\n汇总完成\n{rule}\n", rule = rule()));
    report
}

/// Write the text report and JSON document for one image to `paths`
pub async fn write_image_reports(paths: &ReportPaths, document: &AnalysisDocument) -> Result<()> {
    for dir in [paths.text.parent(), paths.json.parent()].into_iter().flatten() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }

    let text = format_analysis_report(&document.analysis, Path::new(&document.image_path));
    tokio::fs::write(&paths.text, text).await?;

    let json = serde_json::to_string_pretty(document)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    tokio::fs::write(&paths.json, json).await?;

    info!(
        report = %paths.text.display(),
        json = %paths.json.display(),
        "saved analysis"
    );
    Ok(())
}

/// Write the batch summary and return its path
pub async fn write_summary(
    output_dir: &Path,
    analyses: &[(PathBuf, AnalysisRecord)],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    let path = output_dir.join(SUMMARY_FILE_NAME);
    tokio::fs::write(&path, generate_summary_report(analyses)).await?;

    info!(summary = %path.display(), images = analyses.len(), "saved batch summary");
    Ok(path)
}
