//! Batch orchestration: generate, guard, parse, report

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use lumen_core::{
    AnalysisRecord, GenerationEngine, GenerationRequest, ImagePreprocessor, NoopReclaimer, Outcome,
    ResourceReclaimer,
};
use lumen_generation::DegradationController;
use lumen_report::{
    AnalysisDocument, ReportPaths, ResponseParser, print_image_header, print_outcome,
    write_image_reports, write_summary,
};

/// Result of evaluating one image
#[derive(Debug)]
pub struct ImageEvaluation {
    pub image: PathBuf,
    pub outcome: Outcome,
    /// Present for every outcome except `Failed`
    pub record: Option<AnalysisRecord>,
    pub reports: Option<ReportPaths>,
}

impl ImageEvaluation {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success() && self.reports.is_some()
    }
}

/// Totals of a batch run
#[derive(Debug)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub summary_path: Option<PathBuf>,
    /// Evaluations in input order
    pub evaluations: Vec<ImageEvaluation>,
}

/// Evaluates images one request at a time and persists the reports
pub struct Pipeline<E, P, R = NoopReclaimer>
where
    E: GenerationEngine,
    P: ImagePreprocessor,
    R: ResourceReclaimer,
{
    controller: DegradationController<E, P, R>,
    parser: ResponseParser,
    template: GenerationRequest,
    output_dir: PathBuf,
    show_progress: bool,
}

impl<E, P, R> Pipeline<E, P, R>
where
    E: GenerationEngine,
    P: ImagePreprocessor,
    R: ResourceReclaimer,
{
    /// `template` supplies prompt and budgets; its image path is replaced
    /// per evaluation.
    pub fn new(
        controller: DegradationController<E, P, R>,
        template: GenerationRequest,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            controller,
            parser: ResponseParser::new(),
            template,
            output_dir: output_dir.into(),
            show_progress: false,
        }
    }

    /// Print a header and a result line per image on stdout
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run one image through generation and parsing and write its reports
    pub async fn analyze_single_image(&self, image: &Path) -> ImageEvaluation {
        let paths = ReportPaths::for_image(&self.output_dir, image);
        self.evaluate(image, paths).await
    }

    async fn evaluate(&self, image: &Path, paths: ReportPaths) -> ImageEvaluation {
        let request = GenerationRequest {
            image: image.to_path_buf(),
            ..self.template.clone()
        };

        info!(image = %image.display(), "analysing image");
        let run = self.controller.run(&request).await;

        if let Outcome::Failed(cause) = &run.outcome {
            error!(image = %image.display(), attempts = run.attempts, "analysis failed: {}", cause);
            return ImageEvaluation {
                image: image.to_path_buf(),
                outcome: run.outcome,
                record: None,
                reports: None,
            };
        }

        let record = self.parser.parse(&run.text);
        let document = AnalysisDocument::new(image, run.outcome.label(), record.clone(), Utc::now());

        let reports = match write_image_reports(&paths, &document).await {
            Ok(()) => Some(paths),
            Err(e) => {
                error!(image = %image.display(), "failed to save reports: {}", e);
                None
            }
        };

        ImageEvaluation {
            image: image.to_path_buf(),
            outcome: run.outcome,
            record: Some(record),
            reports,
        }
    }

    /// Evaluate `images` with at most `concurrency` in flight. Individual
    /// failures are counted, never propagated; the summary file is written
    /// for batches of more than one image. Report names are fixed up front
    /// so images sharing a file stem never overwrite each other.
    pub async fn run_batch(&self, images: &[PathBuf], concurrency: usize) -> Result<BatchSummary> {
        let total = images.len();
        let paths = ReportPaths::for_batch(&self.output_dir, images);

        let mut evaluations: Vec<(usize, ImageEvaluation)> =
            stream::iter(images.iter().zip(paths).enumerate())
                .map(|(index, (image, paths))| async move {
                    if self.show_progress {
                        print_image_header(index + 1, total, image);
                    }
                    let evaluation = self.evaluate(image, paths).await;
                    if self.show_progress {
                        print_outcome(image, &evaluation.outcome, evaluation.record.as_ref());
                    }
                    (index, evaluation)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
        evaluations.sort_by_key(|(index, _)| *index);

        let evaluations: Vec<ImageEvaluation> =
            evaluations.into_iter().map(|(_, evaluation)| evaluation).collect();

        let succeeded = evaluations.iter().filter(|e| e.succeeded()).count();
        let failed = total - succeeded;

        let summary_path = if total > 1 {
            let analyses: Vec<(PathBuf, AnalysisRecord)> = evaluations
                .iter()
                .filter(|e| e.succeeded())
                .filter_map(|e| e.record.clone().map(|record| (e.image.clone(), record)))
                .collect();
            Some(write_summary(&self.output_dir, &analyses).await?)
        } else {
            None
        };

        info!(succeeded, failed, "batch finished");

        Ok(BatchSummary {
            succeeded,
            failed,
            summary_path,
            evaluations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use lumen_core::{ChunkStream, Error, PassthroughPreprocessor};
    use std::fs;

    const REPORT: [&str; 5] = [
        "维度分析与评分：\n- 构图：主体突出。评分：7.5分\n",
        "- 焦段：标准焦段。评分：6分\n",
        "- 对比度&曝光度&亮度：曝光准确。评分：8分\n\n",
        "综合评分：7.3\n\n",
        "综合评价与建议：整体不错。建议：可以提升。",
    ];

    /// Streams `REPORT` for every image except those whose name contains
    /// "broken", which fail without a retry.
    struct CannedEngine;

    #[async_trait]
    impl GenerationEngine for CannedEngine {
        async fn generate(
            &self,
            _request: &GenerationRequest,
            image: &Path,
        ) -> lumen_core::Result<ChunkStream> {
            if image.to_string_lossy().contains("broken") {
                return Err(Error::Engine("model crashed".to_string()));
            }
            let chunks: BoxStream<'static, lumen_core::Result<String>> =
                stream::iter(REPORT.into_iter().map(|c| Ok(c.to_string()))).boxed();
            Ok(chunks)
        }

        fn model_id(&self) -> &str {
            "canned"
        }
    }

    fn pipeline(output_dir: &Path) -> Pipeline<CannedEngine, PassthroughPreprocessor> {
        let controller = DegradationController::new(CannedEngine, PassthroughPreprocessor);
        Pipeline::new(controller, GenerationRequest::new("", "analyse"), output_dir)
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    #[tokio::test]
    async fn test_single_image_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let image = touch(dir.path(), "harbour.jpg");
        let out = dir.path().join("out");

        let evaluation = pipeline(&out).analyze_single_image(&image).await;

        assert!(evaluation.succeeded());
        assert!(matches!(evaluation.outcome, Outcome::Completed));
        let record = evaluation.record.unwrap();
        assert_eq!(record.scores.overall, 7.3);
        assert_eq!(record.suggestions_text, "建议：可以提升。");

        let reports = evaluation.reports.unwrap();
        assert!(reports.text.ends_with("harbour_aesthetic_report.txt"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&reports.json).unwrap()).unwrap();
        assert_eq!(json["outcome"], "ok");
        assert_eq!(json["analysis"]["scores"]["composition"], 7.5);
    }

    #[tokio::test]
    async fn test_batch_counts_failures_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![
            touch(dir.path(), "a.jpg"),
            touch(dir.path(), "broken.jpg"),
            touch(dir.path(), "c.png"),
        ];
        let out = dir.path().join("out");

        let summary = pipeline(&out).run_batch(&images, 2).await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.evaluations[1].image, images[1]);
        assert!(matches!(
            summary.evaluations[1].outcome,
            Outcome::Failed(Error::Engine(_))
        ));
        assert!(!out.join("broken_aesthetic_report.txt").exists());

        let text = fs::read_to_string(summary.summary_path.unwrap()).unwrap();
        assert!(text.contains("分析图像总数: 2"));
        assert!(text.contains("a.jpg"));
        assert!(!text.contains("broken.jpg"));
    }

    #[tokio::test]
    async fn test_batch_keeps_reports_of_images_sharing_a_stem() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("day1")).unwrap();
        fs::create_dir_all(dir.path().join("day2")).unwrap();
        let images = vec![
            touch(dir.path(), "day1/IMG_0001.jpg"),
            touch(dir.path(), "day2/IMG_0001.jpg"),
        ];
        let out = dir.path().join("out");

        let summary = pipeline(&out).run_batch(&images, 2).await.unwrap();

        assert_eq!(summary.succeeded, 2);
        let first = summary.evaluations[0].reports.clone().unwrap();
        let second = summary.evaluations[1].reports.clone().unwrap();
        assert_ne!(first, second);
        assert!(first.text.ends_with("IMG_0001_aesthetic_report.txt"));
        assert!(second.text.ends_with("IMG_0001_2_aesthetic_report.txt"));

        for reports in [&first, &second] {
            assert!(reports.text.exists());
            assert!(reports.json.exists());
        }
        let first_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&first.json).unwrap()).unwrap();
        let second_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&second.json).unwrap()).unwrap();
        assert_eq!(first_json["image_path"], images[0].display().to_string());
        assert_eq!(second_json["image_path"], images[1].display().to_string());
        // Two reports each plus the summary.
        assert_eq!(fs::read_dir(&out).unwrap().count(), 5);
    }

    #[tokio::test]
    async fn test_single_image_batch_has_no_summary() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![touch(dir.path(), "only.jpg")];
        let out = dir.path().join("out");

        let summary = pipeline(&out).run_batch(&images, 1).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert!(summary.summary_path.is_none());
        assert!(!out.join(lumen_report::SUMMARY_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_missing_image_is_counted_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let images = vec![dir.path().join("gone.jpg")];

        let summary = pipeline(&dir.path().join("out"))
            .run_batch(&images, 1)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(matches!(
            summary.evaluations[0].outcome,
            Outcome::Failed(Error::Preprocess(_))
        ));
    }
}
