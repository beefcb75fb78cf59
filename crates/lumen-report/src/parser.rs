//! Section-anchored parser for the model's textual aesthetic report

use tracing::{debug, warn};

use lumen_core::{AestheticScore, AnalysisRecord, Error, Result};

/// Literal labels of the report format the prompt asks the model to follow.
///
/// The parser and the prompt must agree on these; changing one without the
/// other makes every response fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMarkers {
    pub dimension_block: String,
    pub composition: String,
    pub focal_length: String,
    pub contrast: String,
    pub overall_score: String,
    pub evaluation: String,
    /// Keyword separating the evaluation from the suggestions
    pub suggestion_keyword: String,
    /// Unit character that immediately follows a dimension score
    pub score_unit: char,
}

impl Default for ReportMarkers {
    fn default() -> Self {
        Self {
            dimension_block: "维度分析与评分：".to_string(),
            composition: "构图：".to_string(),
            focal_length: "焦段：".to_string(),
            contrast: "对比度&曝光度&亮度：".to_string(),
            overall_score: "综合评分：".to_string(),
            evaluation: "综合评价与建议：".to_string(),
            suggestion_keyword: "建议".to_string(),
            score_unit: '分',
        }
    }
}

/// Converts raw generated text into an `AnalysisRecord`.
///
/// Parsing never fails outward. Missing sub-sections leave their own fields
/// at `""` / `0.0`; only when no top-level section can be located at all is
/// the neutral `AnalysisRecord::fallback()` returned.
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    markers: ReportMarkers,
}

/// Evaluation sections end at the first run of three newlines.
const EVALUATION_TERMINATOR: &str = "\n\n\n";

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markers(markers: ReportMarkers) -> Self {
        Self { markers }
    }

    pub fn markers(&self) -> &ReportMarkers {
        &self.markers
    }

    /// Parse `raw` into a record, falling back to neutral defaults
    pub fn parse(&self, raw: &str) -> AnalysisRecord {
        match self.try_parse(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Falling back to default analysis: {}", e);
                AnalysisRecord::fallback()
            }
        }
    }

    fn try_parse(&self, raw: &str) -> Result<AnalysisRecord> {
        let m = &self.markers;

        let block = self.dimension_block(raw);
        let overall_pos = raw.find(m.overall_score.as_str());
        let evaluation = self.evaluation_section(raw);

        if block.is_none() && overall_pos.is_none() && evaluation.is_none() {
            return Err(Error::MalformedResponse(format!(
                "none of '{}', '{}' or '{}' found in {} characters of output",
                m.dimension_block,
                m.overall_score,
                m.evaluation,
                raw.chars().count()
            )));
        }

        let mut record = AnalysisRecord {
            composition_text: String::new(),
            focal_length_text: String::new(),
            contrast_text: String::new(),
            overall_evaluation_text: String::new(),
            suggestions_text: String::new(),
            scores: AestheticScore::default(),
            parsed: true,
        };

        if let Some(block) = block {
            let labels = [
                m.composition.as_str(),
                m.focal_length.as_str(),
                m.contrast.as_str(),
            ];

            if let Some(section) = sub_section(block, &labels, 0) {
                record.composition_text = clean_section(section);
                record.scores.composition = self.last_unit_score(section);
            }
            if let Some(section) = sub_section(block, &labels, 1) {
                record.focal_length_text = clean_section(section);
                record.scores.focal_length = self.last_unit_score(section);
            }
            if let Some(section) = sub_section(block, &labels, 2) {
                record.contrast_text = clean_section(section);
                record.scores.contrast_exposure_brightness = self.last_unit_score(section);
            }
        } else {
            debug!("no dimension block in response");
        }

        if let Some(pos) = overall_pos {
            let after = &raw[pos + m.overall_score.len()..];
            let line = after.split('\n').next().unwrap_or("");
            if let Some(score) = first_number(line) {
                record.scores.overall = score;
            }
        }

        if let Some(section) = evaluation {
            let section = section.trim();
            match section.find(m.suggestion_keyword.as_str()) {
                Some(split) => {
                    let rest = &section[split + m.suggestion_keyword.len()..];
                    record.overall_evaluation_text = section[..split].trim().to_string();
                    record.suggestions_text =
                        format!("{}{}", m.suggestion_keyword, rest.trim());
                }
                None => record.overall_evaluation_text = section.to_string(),
            }
        }

        Ok(record)
    }

    /// Text between the dimension marker and the first overall marker after it
    fn dimension_block<'t>(&self, raw: &'t str) -> Option<&'t str> {
        let m = &self.markers;
        let start = raw.find(m.dimension_block.as_str())? + m.dimension_block.len();
        let len = raw[start..].find(m.overall_score.as_str())?;
        Some(&raw[start..start + len])
    }

    fn evaluation_section<'t>(&self, raw: &'t str) -> Option<&'t str> {
        let marker = self.markers.evaluation.as_str();
        let start = raw.find(marker)? + marker.len();
        let rest = &raw[start..];
        let end = rest.find(EVALUATION_TERMINATOR).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Last `<number><unit>` value in `section`, or 0 when there is none
    fn last_unit_score(&self, section: &str) -> f64 {
        let unit = self.markers.score_unit;
        section
            .char_indices()
            .filter(|(_, c)| *c == unit)
            .filter_map(|(idx, _)| number_ending_at(&section[..idx]))
            .last()
            .unwrap_or(0.0)
    }
}

/// Content after `labels[index]` up to the nearest following label or the
/// end of `block`
fn sub_section<'t>(block: &'t str, labels: &[&str], index: usize) -> Option<&'t str> {
    let label = labels[index];
    let start = block.find(label)? + label.len();

    let end = labels
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .filter_map(|(_, other)| block[start..].find(other).map(|pos| start + pos))
        .min()
        .unwrap_or(block.len());

    Some(&block[start..end])
}

/// Collapse whitespace runs and drop a dangling list bullet left over from
/// the next line.
fn clean_section(section: &str) -> String {
    let collapsed = section.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_whitespace())
        .to_string()
}

/// Number of the form `digits[.digits]` that ends exactly at the end of `text`
fn number_ending_at(text: &str) -> Option<f64> {
    let run_start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(idx, _)| idx)?;
    let run = &text[run_start..];

    // Keep at most one decimal point, counted from the right.
    let candidate = match run.rmatch_indices('.').nth(1) {
        Some((second_dot, _)) => &run[second_dot + 1..],
        None => run,
    };
    let candidate = candidate.trim_start_matches('.');

    if !candidate.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    candidate.trim_end_matches('.').parse().ok()
}

/// First `digits[.digits]` number anywhere in `text`
fn first_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];

    let int_len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let mut end = int_len;

    if rest[int_len..].starts_with('.') {
        let frac = &rest[int_len + 1..];
        let frac_len = frac
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(frac.len());
        end = int_len + 1 + frac_len;
    }

    rest[..end].trim_end_matches('.').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURED: &str = "维度分析与评分：\n\
        - 构图：采用了较为传统的海景构图，前景的岩石形成了天然的引导线。评分：7.2分\n\
        - 焦段：使用适中焦段拍摄，透视效果自然。评分：7.8分\n\
        - 对比度&曝光度&亮度：画面对比度适中，高光部分控制得当。评分：8.1分\n\n\
        综合评分：7.7（1-10分）\n\n\
        综合评价与建议：这是一幅较为标准的海岸风光摄影作品。建议改进：1）尝试不同的拍摄角度；2）利用黄金时段光线。\n";

    #[test]
    fn test_single_line_report() {
        let raw = "维度分析与评分：构图：不错的构图。评分：7.5分 焦段：标准。评分：6分 \
                   对比度&曝光度&亮度：良好。评分：8分 综合评分：综合 7.3（说明） \
                   综合评价与建议：整体不错。建议：可以提升。";
        let record = ResponseParser::new().parse(raw);

        assert_eq!(record.scores.composition, 7.5);
        assert_eq!(record.scores.focal_length, 6.0);
        assert_eq!(record.scores.contrast_exposure_brightness, 8.0);
        assert_eq!(record.scores.overall, 7.3);
        assert_eq!(record.overall_evaluation_text, "整体不错。");
        assert_eq!(record.suggestions_text, "建议：可以提升。");
        assert_eq!(record.composition_text, "不错的构图。评分：7.5分");
        assert!(record.parsed);
    }

    #[test]
    fn test_multi_line_report() {
        let record = ResponseParser::new().parse(STRUCTURED);

        assert_eq!(record.scores.composition, 7.2);
        assert_eq!(record.scores.focal_length, 7.8);
        assert_eq!(record.scores.contrast_exposure_brightness, 8.1);
        assert_eq!(record.scores.overall, 7.7);
        assert_eq!(
            record.composition_text,
            "采用了较为传统的海景构图，前景的岩石形成了天然的引导线。评分：7.2分"
        );
        assert_eq!(
            record.contrast_text,
            "画面对比度适中，高光部分控制得当。评分：8.1分"
        );
        assert_eq!(
            record.overall_evaluation_text,
            "这是一幅较为标准的海岸风光摄影作品。"
        );
        assert!(record.suggestions_text.starts_with("建议改进：1）"));
    }

    #[test]
    fn test_last_dimension_score_wins() {
        let raw = "维度分析与评分：构图：初看6分，细看之后修正为7.5分。焦段：无评分\n综合评分：7";
        let record = ResponseParser::new().parse(raw);

        assert_eq!(record.scores.composition, 7.5);
        assert_eq!(record.scores.focal_length, 0.0);
        assert_eq!(record.focal_length_text, "无评分");
        assert_eq!(record.contrast_text, "");
    }

    #[test]
    fn test_overall_takes_first_number_after_marker() {
        let raw = "综合评分：8.5分，满分10分";
        let record = ResponseParser::new().parse(raw);
        assert_eq!(record.scores.overall, 8.5);
        assert!(record.parsed);
    }

    #[test]
    fn test_overall_number_must_share_the_marker_line() {
        let raw = "综合评分：\n9";
        let record = ResponseParser::new().parse(raw);
        assert_eq!(record.scores.overall, 0.0);
    }

    #[test]
    fn test_scores_are_not_clamped() {
        let raw = "维度分析与评分：构图：评分：15分 综合评分：12.5";
        let record = ResponseParser::new().parse(raw);
        assert_eq!(record.scores.composition, 15.0);
        assert_eq!(record.scores.overall, 12.5);
    }

    #[test]
    fn test_evaluation_without_suggestion_keyword() {
        let raw = "综合评价与建议：\n  画面干净，主体突出。  \n";
        let record = ResponseParser::new().parse(raw);

        // The marker itself contains the keyword; only the section body counts.
        assert_eq!(record.overall_evaluation_text, "画面干净，主体突出。");
        assert_eq!(record.suggestions_text, "");
        assert_eq!(record.scores.overall, 0.0);
    }

    #[test]
    fn test_evaluation_ends_at_triple_newline() {
        let raw = "综合评价与建议：色彩和谐。\n\n\n附注：以上内容仅供参考。";
        let record = ResponseParser::new().parse(raw);
        assert_eq!(record.overall_evaluation_text, "色彩和谐。");
    }

    #[test]
    fn test_dimension_block_requires_overall_marker() {
        let raw = "维度分析与评分：构图：评分：9分\n综合评价与建议：很好。";
        let record = ResponseParser::new().parse(raw);

        assert_eq!(record.scores.composition, 0.0);
        assert_eq!(record.composition_text, "");
        assert_eq!(record.overall_evaluation_text, "很好。");
        assert!(record.parsed);
    }

    #[test]
    fn test_empty_input_yields_fallback() {
        let record = ResponseParser::new().parse("");
        assert_eq!(record, AnalysisRecord::fallback());
    }

    #[test]
    fn test_unstructured_text_yields_fallback() {
        let record = ResponseParser::new().parse("您好！请上传您想要分析的照片。");
        assert!(record.is_fallback());
        assert_eq!(record.scores, AestheticScore::uniform(5.0));
        assert_eq!(record.composition_text, AnalysisRecord::COMPOSITION_UNAVAILABLE);
    }

    #[test]
    fn test_truncated_stream_keeps_partial_sections() {
        let cut = STRUCTURED.find("综合评分").unwrap();
        let record = ResponseParser::new().parse(&STRUCTURED[..cut]);

        // No overall marker means no closed dimension block either.
        assert!(record.is_fallback());

        let cut = STRUCTURED.find("综合评价与建议").unwrap();
        let record = ResponseParser::new().parse(&STRUCTURED[..cut]);
        assert_eq!(record.scores.composition, 7.2);
        assert_eq!(record.overall_evaluation_text, "");
    }

    #[test]
    fn test_custom_markers() {
        let markers = ReportMarkers {
            dimension_block: "Dimensions:".to_string(),
            composition: "Composition:".to_string(),
            focal_length: "Focal length:".to_string(),
            contrast: "Exposure:".to_string(),
            overall_score: "Overall score:".to_string(),
            evaluation: "Verdict:".to_string(),
            suggestion_keyword: "Tip".to_string(),
            score_unit: 'p',
        };
        let raw = "Dimensions:\nComposition: balanced 6.5p\nFocal length: wide 7p\n\
                   Exposure: bright 8p\nOverall score: 7.1\nVerdict: Solid. Tip: crop tighter.";
        let record = ResponseParser::with_markers(markers).parse(raw);

        assert_eq!(record.scores.composition, 6.5);
        assert_eq!(record.scores.focal_length, 7.0);
        assert_eq!(record.scores.contrast_exposure_brightness, 8.0);
        assert_eq!(record.scores.overall, 7.1);
        assert_eq!(record.overall_evaluation_text, "Solid.");
        assert_eq!(record.suggestions_text, "Tip: crop tighter.");
    }

    #[test]
    fn test_number_ending_at() {
        assert_eq!(number_ending_at("评分：7.5"), Some(7.5));
        assert_eq!(number_ending_at("评分：8"), Some(8.0));
        assert_eq!(number_ending_at("评分：8."), Some(8.0));
        assert_eq!(number_ending_at("v1.2.3"), Some(2.3));
        assert_eq!(number_ending_at("评分："), None);
        assert_eq!(number_ending_at("..."), None);
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("综合 7.3（说明）"), Some(7.3));
        assert_eq!(first_number("约 8。"), Some(8.0));
        assert_eq!(first_number("9.（满分10）"), Some(9.0));
        assert_eq!(first_number("暂无"), None);
    }
}
