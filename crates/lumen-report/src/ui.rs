//! Terminal output for the CLI

use colored::*;
use crossterm::terminal::size;
use std::io::{self, Write};
use std::path::Path;

use lumen_core::{AnalysisRecord, Outcome};

/// Display startup banner
pub fn display_banner(model: &str, endpoint: &str) {
    let terminal_width = size().map(|(w, _)| w as usize).unwrap_or(80);
    let banner_width = std::cmp::min(67, terminal_width.saturating_sub(4)).max(40);
    let inner = banner_width - 2;

    let top_border = format!("┌{}┐", "─".repeat(inner));
    let bottom_border = format!("└{}┘", "─".repeat(inner));
    let empty_line = format!("│{}│", " ".repeat(inner));

    println!();
    println!("{}", top_border.blue());
    println!("{}", empty_line.blue());

    let title = "Lumen - Photo Aesthetics Evaluator";
    println!(
        "{}{}{}{}",
        "│  ".blue(),
        title.blue().bold(),
        " ".repeat(inner.saturating_sub(title.chars().count() + 2)),
        "│".blue()
    );
    println!("{}", empty_line.blue());

    for line in [
        format!("Model:    {}", model),
        format!("Endpoint: {}", endpoint),
    ] {
        let shown: String = line.chars().take(inner.saturating_sub(4)).collect();
        let padding = inner.saturating_sub(shown.chars().count() + 2);
        println!("{}", format!("│  {}{}│", shown, " ".repeat(padding)).blue());
    }

    println!("{}", empty_line.blue());
    println!("{}", bottom_border.blue());
    println!();
}

/// Announce the start of one image's evaluation
pub fn print_image_header(index: usize, total: usize, image: &Path) {
    println!(
        "{} [{}/{}] {}",
        "🔍".cyan(),
        index,
        total,
        image.display().to_string().bold()
    );
}

/// Echo one accepted chunk of generated text
pub fn echo_chunk(chunk: &str) {
    print!("{}", chunk);
    let _ = io::stdout().flush();
}

/// One-line result for an evaluated image
pub fn print_outcome(image: &Path, outcome: &Outcome, record: Option<&AnalysisRecord>) {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.display().to_string());

    match (outcome, record) {
        (Outcome::Failed(cause), _) => {
            println!("{} {} {}", "❌".red(), name, cause.to_string().red());
        }
        (outcome, Some(record)) => {
            let status = match outcome {
                Outcome::Completed => outcome.label().green(),
                _ => outcome.label().yellow(),
            };
            let score = format!("{:.1}/10", record.scores.overall);
            let score = if record.parsed {
                score.bold()
            } else {
                format!("{} (unparsed)", score).dimmed()
            };
            println!("{} {} {} [{}]", "✅".green(), name, score, status);
        }
        (outcome, None) => {
            println!("{} {} [{}]", "✅".green(), name, outcome.label());
        }
    }
}

/// Final tally of a batch run
pub fn print_batch_totals(succeeded: usize, failed: usize) {
    println!();
    let line = format!(
        "Processed {} image(s): {} succeeded, {} failed",
        succeeded + failed,
        succeeded,
        failed
    );
    if failed == 0 {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.yellow().bold());
    }
}
