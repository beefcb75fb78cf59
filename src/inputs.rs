//! Input discovery and prompt loading

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions accepted as photographs, compared case-insensitively
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Prompt asking the model for the exact section layout the parser reads
pub const DEFAULT_PROMPT: &str = "你是一位专业的摄影评论家。请仔细观察这张照片，从构图、焦段、对比度&曝光度&亮度三个维度进行分析，并严格按照以下格式输出：

维度分析与评分：
- 构图：<分析内容>。评分：<1-10>分
- 焦段：<分析内容>。评分：<1-10>分
- 对比度&曝光度&亮度：<分析内容>。评分：<1-10>分

综合评分：<1-10的数字>

综合评价与建议：<整体评价>。建议：<具体改进建议>";

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Resolve `path` to the list of images to evaluate.
///
/// A file must have a supported extension; a directory is walked
/// recursively and its supported images returned in sorted order.
pub fn collect_image_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }

    if path.is_file() {
        if !is_supported_image(path) {
            bail!(
                "Unsupported image format: {} (expected one of {})",
                path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            );
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}

/// Read a prompt template, keeping only the text between `<prompt>` and
/// `</prompt>`
pub fn load_prompt_template(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
    extract_prompt(&content)
        .with_context(|| format!("No <prompt>...</prompt> block in {}", path.display()))
}

fn extract_prompt(content: &str) -> Option<String> {
    const OPEN: &str = "<prompt>";
    const CLOSE: &str = "</prompt>";

    let start = content.find(OPEN)? + OPEN.len();
    let len = content[start..].find(CLOSE)?;
    let prompt = content[start..start + len].trim();
    (!prompt.is_empty()).then(|| prompt.to_string())
}
