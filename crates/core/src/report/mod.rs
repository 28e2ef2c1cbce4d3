//! Static HTML reports over ranking, experiment and editor JSON.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::editor::{EditorError, EditorReport};
use crate::experiment::{ExperimentError, ExperimentResult, ExperimentStatus};
use crate::ranking::{RankingEntry, RankingError, RankingMethod, RankingResult, CRITERIA, DRAFT_PREFIX};

mod library;

pub use library::{gather_final_versions, FinalVersion};

pub const RANKING_REPORT_FILE: &str = "rankings.html";
pub const EXPERIMENT_REPORT_FILE: &str = "experiments.html";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read directory `{path}`: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error(transparent)]
    Experiment(#[from] ExperimentError),
    #[error(transparent)]
    Editor(#[from] EditorError),
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Escaped text with line breaks kept as `<br>`.
fn escape_block(s: &str) -> String {
    html_escape(s.trim()).replace("\r\n", "\n").replace('\n', "<br>")
}

fn version_label(id: &str) -> &str {
    id.strip_prefix(DRAFT_PREFIX).unwrap_or(id)
}

/// Every `*_ranking.json` in `dir`, ordered by chapter.
pub fn load_rankings(dir: &Path) -> Result<Vec<RankingResult>, ReportError> {
    let read_err = |source| ReportError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let is_ranking = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with("_ranking.json"))
            .unwrap_or(false);
        if is_ranking && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut rankings = paths
        .iter()
        .map(|path| RankingResult::load(path))
        .collect::<Result<Vec<_>, _>>()?;
    rankings.sort_by(|a, b| a.chapter_id.cmp(&b.chapter_id));
    Ok(rankings)
}

pub fn write_report(path: &Path, html: &str) -> Result<(), ReportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, html).map_err(|source| ReportError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

fn rank_badge(rank: u32) -> String {
    let class = match rank {
        1..=3 => format!("badge-{rank}"),
        _ => "badge-other".to_string(),
    };
    format!(r#"<span class="rank-badge {class}">{rank}</span>"#)
}

fn optional_cell(value: Option<String>) -> String {
    format!("<td>{}</td>", value.as_deref().map(html_escape).unwrap_or_else(|| "-".to_string()))
}

fn ranking_row(entry: &RankingEntry, smart: bool) -> String {
    let mut cells = String::new();
    for criterion in &CRITERIA {
        let score = entry.scores.get(criterion.key).unwrap_or_default();
        cells.push_str(&format!("<td>{score:.1}</td>"));
    }
    let extra = if smart {
        [
            optional_cell(entry.elo_rating.map(|r| format!("{r:.1}"))),
            optional_cell(entry.avg_initial_rank.map(|r| format!("{r:.2}"))),
            optional_cell(entry.consistency.clone()),
        ]
        .concat()
    } else {
        String::new()
    };
    let row_class = if entry.rank == 1 { r#" class="rank-1""# } else { "" };
    format!(
        r#"<tr{row_class}><td>{badge}</td><td>{label}</td>{cells}<td><strong>{total:.1}</strong></td>{extra}</tr>"#,
        badge = rank_badge(entry.rank),
        label = html_escape(entry.label()),
        total = entry.scores.total(),
    )
}

fn ranking_card(result: &RankingResult) -> String {
    let smart = result.method == RankingMethod::SmartRanking;
    let mut header_cells: String = CRITERIA
        .iter()
        .map(|criterion| format!("<th>{}</th>", html_escape(criterion.name)))
        .collect();
    header_cells.push_str("<th>Total</th>");
    if smart {
        header_cells.push_str("<th>Elo Rating</th><th>Avg Initial Rank</th><th>Score Consistency</th>");
    }

    let rows: String = result
        .table
        .iter()
        .map(|entry| ranking_row(entry, smart))
        .collect();

    let method_note = if smart {
        format!(
            r#"<p class="method">Smart ranking: {runs} initial runs, {pairs} pairwise comparisons, {contradictions} contradictions.</p>"#,
            runs = result.initial_runs.unwrap_or_default(),
            pairs = result.pairs_tested.unwrap_or_default(),
            contradictions = result.contradictions.unwrap_or_default(),
        )
    } else {
        String::new()
    };

    let analysis = if result.analysis.trim().is_empty() {
        String::new()
    } else {
        format!(
            r#"<div class="analysis-block"><h4>Analysis</h4><p>{}</p></div>"#,
            escape_block(&result.analysis)
        )
    };

    let feedback = if result.feedback.is_empty() {
        String::new()
    } else {
        let items: String = result
            .feedback
            .iter()
            .map(|(id, text)| {
                format!(
                    r#"<div class="feedback-item"><strong>{}</strong><p>{}</p></div>"#,
                    html_escape(version_label(id)),
                    escape_block(text)
                )
            })
            .collect();
        format!(r#"<div class="feedback-block"><h4>Feedback</h4>{items}</div>"#)
    };

    format!(
        r#"<div class="chapter-card" id="{anchor}">
    <div class="card-header">Chapter {chapter}<span class="stamp">{timestamp}</span></div>
    {method_note}
    <table class="rankings-table">
        <thead><tr><th>Rank</th><th>Version</th>{header_cells}</tr></thead>
        <tbody>{rows}</tbody>
    </table>
    {analysis}
    {feedback}
</div>"#,
        anchor = html_escape(&result.chapter_id),
        chapter = html_escape(&result.chapter_id),
        timestamp = html_escape(&result.timestamp),
    )
}

/// Winners summary followed by one card per chapter.
pub fn render_ranking_report(results: &[RankingResult]) -> String {
    if results.is_empty() {
        return build_page(
            "Chapter Version Rankings",
            r#"<p class="empty">No rankings found.</p>"#,
        );
    }

    let winners: String = results
        .iter()
        .map(|result| {
            let (label, total) = result
                .winner()
                .map(|entry| (html_escape(entry.label()), format!("{:.1}", entry.scores.total())))
                .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
            format!(
                r##"<tr><td><a href="#{anchor}">{chapter}</a></td><td>{label}</td><td>{total}</td></tr>"##,
                anchor = html_escape(&result.chapter_id),
                chapter = html_escape(&result.chapter_id),
            )
        })
        .collect();
    let cards: String = results.iter().map(ranking_card).collect();

    let content = format!(
        r#"<h2>Chapter Version Rankings</h2>
<div class="summary-card">
    <h3>Winners</h3>
    <table><thead><tr><th>Chapter</th><th>Winner</th><th>Total</th></tr></thead><tbody>{winners}</tbody></table>
</div>
{cards}"#
    );
    build_page("Chapter Version Rankings", &content)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComparisonPair {
    pub first: String,
    pub second: String,
    pub shared_chapters: Vec<String>,
}

/// Every pair of completed experiments that wrote at least one common chapter.
pub fn comparison_pairs(results: &[ExperimentResult]) -> Vec<ComparisonPair> {
    let completed: Vec<&ExperimentResult> = results
        .iter()
        .filter(|r| r.status == ExperimentStatus::Completed)
        .collect();
    let mut pairs = Vec::new();
    for (i, first) in completed.iter().enumerate() {
        let chapters: BTreeSet<&String> = first.chapters.iter().collect();
        for second in &completed[i + 1..] {
            let shared: Vec<String> = second
                .chapters
                .iter()
                .filter(|chapter| chapters.contains(chapter))
                .cloned()
                .collect();
            if !shared.is_empty() {
                pairs.push(ComparisonPair {
                    first: first.name.clone(),
                    second: second.name.clone(),
                    shared_chapters: shared,
                });
            }
        }
    }
    pairs
}

pub fn render_experiment_report(results: &[ExperimentResult]) -> String {
    let completed = results
        .iter()
        .filter(|r| r.status == ExperimentStatus::Completed)
        .count();
    let failed = results.len() - completed;
    let total_secs: f64 = results.iter().map(|r| r.duration_secs).sum();

    let rows: String = results
        .iter()
        .map(|result| {
            let status_class = match result.status {
                ExperimentStatus::Completed => "status-ok",
                ExperimentStatus::Failed => "status-failed",
            };
            let detail = match (&result.error, &result.output_path) {
                (Some(error), _) => html_escape(error),
                (None, Some(path)) => html_escape(&path.display().to_string()),
                (None, None) => String::new(),
            };
            format!(
                r#"<tr><td>{name}</td><td>{model}</td><td>{chapters}</td><td>{rounds}</td><td class="{status_class}">{status}</td><td>{duration:.1}s</td><td>{detail}</td></tr>"#,
                name = html_escape(&result.name),
                model = html_escape(&result.model),
                chapters = html_escape(&result.chapters.join(", ")),
                rounds = result.rounds,
                status = result.status,
                duration = result.duration_secs,
            )
        })
        .collect();

    let pairs = comparison_pairs(results);
    let comparisons = if pairs.is_empty() {
        r#"<p class="empty">No completed experiments share chapters.</p>"#.to_string()
    } else {
        let items: String = pairs
            .iter()
            .map(|pair| {
                format!(
                    "<li><strong>{}</strong> vs <strong>{}</strong> on {}</li>",
                    html_escape(&pair.first),
                    html_escape(&pair.second),
                    html_escape(&pair.shared_chapters.join(", "))
                )
            })
            .collect();
        format!("<ul>{items}</ul>")
    };

    let content = format!(
        r#"<h2>Experiment Results</h2>
<div class="summary-card">
    <p>Total: <strong>{total}</strong> &middot; Completed: <strong>{completed}</strong> &middot; Failed: <strong>{failed}</strong> &middot; Duration: <strong>{total_secs:.1}s</strong></p>
</div>
<table class="results-table">
    <thead><tr><th>Experiment</th><th>Model</th><th>Chapters</th><th>Rounds</th><th>Status</th><th>Duration</th><th>Output / Error</th></tr></thead>
    <tbody>{rows}</tbody>
</table>
<div class="summary-card">
    <h3>Suggested Comparisons</h3>
    {comparisons}
</div>"#,
        total = results.len(),
    );
    build_page("Experiment Results", &content)
}

fn bullet_items(items: &[String]) -> String {
    if items.is_empty() {
        return "<li>(none)</li>".to_string();
    }
    items
        .iter()
        .map(|item| format!("<li>{}</li>", html_escape(item)))
        .collect()
}

pub fn render_editor_report(report: &EditorReport) -> String {
    let verdict = if report.accepted {
        r#"<span class="status-ok">ACCEPTED</span>"#
    } else {
        r#"<span class="status-failed">REJECTED</span>"#
    };
    let truncated = if report.truncated {
        r#"<p class="warning">The bundle was truncated to fit the context budget.</p>"#
    } else {
        ""
    };

    let content = format!(
        r#"<h2>Editor Panel, Round {round}</h2>
<p>Chapters: {chapters} &middot; {verdict}</p>
{truncated}
<div class="critic-block critic-a"><h3>Critic A: Copy Editor</h3><p>{critic_a}</p></div>
<div class="critic-block critic-b"><h3>Critic B: Atmosphere</h3><p>{critic_b}</p></div>
<div class="discussion"><h3>Discussion</h3><p>{discussion}</p></div>
<div class="summary-card">
    <h3>Change List</h3>
    <h4>Must</h4><ul>{must}</ul>
    <h4>Nice to have</h4><ul>{nice}</ul>
</div>"#,
        round = report.round,
        chapters = html_escape(&report.chapters.join(", ")),
        critic_a = escape_block(&report.critic_a_summary),
        critic_b = escape_block(&report.critic_b_summary),
        discussion = escape_block(&report.discussion_transcript),
        must = bullet_items(&report.change_list.must),
        nice = bullet_items(&report.change_list.nice),
    );
    build_page(&format!("Editor Round {}", report.round), &content)
}

fn build_page(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
*{{margin:0;padding:0;box-sizing:border-box;}}
body{{font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,sans-serif;color:#1a1a1a;background:#fafafa;}}
.container{{max-width:1200px;margin:0 auto;padding:24px;}}
h2{{margin-bottom:16px;}}
h3,h4{{margin:12px 0 8px;}}
table{{width:100%;border-collapse:collapse;background:#fff;font-size:14px;}}
th,td{{padding:8px 10px;border-bottom:1px solid #e9ecef;text-align:left;}}
th{{background:#f8f9fa;}}
.chapter-card,.summary-card{{background:#fff;border:1px solid #e0e0e0;border-radius:8px;margin-bottom:24px;overflow:hidden;}}
.summary-card{{padding:16px;}}
.card-header{{font-weight:600;background:#f8f9fa;padding:14px 20px;border-bottom:1px solid #e9ecef;}}
.card-header .stamp{{float:right;font-weight:400;font-size:12px;color:#888;}}
.method{{padding:8px 20px;font-size:13px;color:#555;}}
.rank-1{{background:#fff4e6;}}
.rank-badge{{font-weight:600;padding:2px 8px;border-radius:12px;display:inline-block;min-width:28px;text-align:center;}}
.badge-1{{background:gold;}}
.badge-2{{background:#c0c0c0;}}
.badge-3{{background:#cd7f32;color:#fff;}}
.badge-other{{background:#e9ecef;}}
.analysis-block,.discussion{{padding:16px 20px;background:#fff9db;border-left:4px solid #ffd43b;margin:16px 20px;border-radius:5px;}}
.feedback-block{{padding:16px 20px;background:#f8f9fa;margin:16px 20px;border-radius:5px;}}
.feedback-item{{padding:8px 0;border-bottom:1px solid #eee;}}
.feedback-item:last-child{{border-bottom:none;}}
.critic-block{{padding:16px;border-radius:5px;margin-bottom:16px;}}
.critic-a{{background:#e7f5ff;border-left:4px solid #74c0fc;}}
.critic-b{{background:#f8f9fa;border-left:4px solid #adb5bd;}}
.status-ok{{color:#2e7d32;font-weight:600;}}
.status-failed{{color:#c62828;font-weight:600;}}
.warning{{color:#e65100;margin:8px 0;}}
.empty{{color:#888;text-align:center;padding:40px;}}
</style>
</head>
<body>
<div class="container">
{content}
</div>
</body>
</html>"#,
        title = html_escape(title),
    )
}
