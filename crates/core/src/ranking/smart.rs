use chrono::Local;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;

use super::{
    DraftVersion, Elo, Ranker, RankingEntry, RankingError, RankingMethod, RankingResult,
    Scores, Side, CRITERIA, DRAFT_PREFIX, PAIRWISE_K,
};
use crate::logging::LogLevel;
use crate::model::LanguageModel;

const DEFAULT_SCORE: f64 = 7.0;

#[derive(Clone, Debug)]
pub struct SmartOptions {
    pub initial_runs: usize,
    pub top_candidates: usize,
    pub temperature: f32,
}

impl Default for SmartOptions {
    fn default() -> Self {
        Self {
            initial_runs: 3,
            top_candidates: 4,
            temperature: 0.8,
        }
    }
}

/// Rank spread across initial runs: σ < 0.5 High, σ < 1.5 Medium, else Low.
pub fn consistency_label(ranks: &[u32]) -> &'static str {
    if ranks.is_empty() {
        return "N/A";
    }
    let sd = std_dev(ranks);
    if sd < 0.5 {
        "High"
    } else if sd < 1.5 {
        "Medium"
    } else {
        "Low"
    }
}

fn mean(ranks: &[u32]) -> f64 {
    ranks.iter().map(|&r| f64::from(r)).sum::<f64>() / ranks.len() as f64
}

/// Sample standard deviation; zero for fewer than two ranks.
fn std_dev(ranks: &[u32]) -> f64 {
    if ranks.len() < 2 {
        return 0.0;
    }
    let m = mean(ranks);
    let var = ranks
        .iter()
        .map(|&r| (f64::from(r) - m).powi(2))
        .sum::<f64>()
        / (ranks.len() - 1) as f64;
    var.sqrt()
}

#[derive(Serialize)]
struct InitialRankingLog<'a> {
    chapter_id: &'a str,
    method: RankingMethod,
    initial_runs: usize,
    timestamp: String,
    runs: Vec<InitialRun<'a>>,
    average_rankings: Vec<(&'a str, f64)>,
    top_candidates: Vec<&'a str>,
}

#[derive(Serialize)]
struct InitialRun<'a> {
    run_number: usize,
    versions_order: &'a [String],
    table: &'a [RankingEntry],
}

impl<'a> Ranker<'a> {
    /// Shuffled initial runs narrow the field to the top candidates, which
    /// then meet head-to-head in both orders; the final order is by Elo.
    pub fn smart_rank<M, R>(
        &self,
        model: &M,
        chapter_id: &str,
        versions: &[DraftVersion],
        original: Option<&str>,
        options: &SmartOptions,
        rng: &mut R,
    ) -> Result<RankingResult, RankingError>
    where
        M: LanguageModel + ?Sized,
        R: Rng + ?Sized,
    {
        let n = versions.len();
        if n < 2 {
            return Err(RankingError::TooFewVersions {
                chapter_id: chapter_id.to_string(),
                needed: 2,
                got: n,
            });
        }
        self.log(
            LogLevel::Info,
            format!("smart ranking {n} versions of {chapter_id}"),
        );

        let mut initial = Vec::new();
        let mut ranks: HashMap<&str, Vec<u32>> =
            versions.iter().map(|v| (v.persona.as_str(), Vec::new())).collect();
        for run in 1..=options.initial_runs.max(1) {
            let mut shuffled = versions.to_vec();
            shuffled.shuffle(rng);
            match self.rank_with_temperature(
                model,
                chapter_id,
                &shuffled,
                original,
                options.temperature,
            ) {
                Ok(result) => {
                    for entry in &result.table {
                        if let Some(list) = entry.persona.as_deref().and_then(|p| ranks.get_mut(p)) {
                            list.push(entry.rank);
                        }
                    }
                    initial.push(result);
                }
                Err(err) => self.log(
                    LogLevel::Warn,
                    format!("{chapter_id}: initial run {run} failed: {err}"),
                ),
            }
        }

        let avg_rank = |persona: &str| -> f64 {
            match ranks.get(persona) {
                Some(list) if !list.is_empty() => mean(list),
                _ => n as f64,
            }
        };
        let mut by_average: Vec<&DraftVersion> = versions.iter().collect();
        by_average.sort_by(|a, b| {
            avg_rank(a.persona.as_str()).total_cmp(&avg_rank(b.persona.as_str()))
        });
        let top_n = options.top_candidates.clamp(2, n);
        let top: Vec<&DraftVersion> = by_average[..top_n].to_vec();
        self.log(
            LogLevel::Info,
            format!(
                "{chapter_id}: advancing {}",
                top.iter()
                    .map(|v| format!("{} ({:.1})", v.persona, avg_rank(v.persona.as_str())))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );

        let mut elo = Elo::new(PAIRWISE_K);
        for version in &top {
            elo.seed(&version.persona);
        }
        let mut verdicts: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for i in 0..top.len() {
            for j in (i + 1)..top.len() {
                for (first, second) in [(top[i], top[j]), (top[j], top[i])] {
                    let side = match self.compare(model, chapter_id, first, second, original) {
                        Ok(Some(side)) => side,
                        Ok(None) => continue,
                        Err(err) => {
                            self.log(
                                LogLevel::Warn,
                                format!(
                                    "{chapter_id}: {} vs {} failed: {err}",
                                    first.persona, second.persona
                                ),
                            );
                            continue;
                        }
                    };
                    let (winner, loser) = match side {
                        Side::First => (first, second),
                        Side::Second => (second, first),
                    };
                    elo.update(&winner.persona, &loser.persona);
                    let key = if top[i].persona <= top[j].persona {
                        (top[i].persona.clone(), top[j].persona.clone())
                    } else {
                        (top[j].persona.clone(), top[i].persona.clone())
                    };
                    verdicts.entry(key).or_default().push(winner.persona.clone());
                }
            }
        }

        let contradictions = verdicts
            .values()
            .filter(|winners| winners.len() == 2 && winners[0] != winners[1])
            .count();
        if contradictions > 0 {
            self.log(
                LogLevel::Warn,
                format!(
                    "{chapter_id}: {contradictions} of {} pairs changed winner with presentation order",
                    verdicts.len()
                ),
            );
        }

        let leaderboard = elo.leaderboard();
        let mut table = Vec::with_capacity(n);
        for (persona, rating) in &leaderboard {
            table.push(self.final_entry(
                table.len() as u32 + 1,
                persona,
                Some((rating * 10.0).round() / 10.0),
                avg_rank(persona.as_str()),
                &ranks,
                &initial,
            ));
        }
        for version in by_average.iter().skip(top_n) {
            table.push(self.final_entry(
                table.len() as u32 + 1,
                &version.persona,
                None,
                avg_rank(version.persona.as_str()),
                &ranks,
                &initial,
            ));
        }

        let runs = options.initial_runs.max(1);
        let (winner, winner_elo) = leaderboard[0].clone();
        let analysis = format!(
            "The {winner} draft emerges as the winner with an Elo rating of {winner_elo:.1}. It averaged rank {:.1} across {runs} initial evaluations and then led the head-to-head comparisons among the top candidates.",
            avg_rank(winner.as_str())
        );
        let feedback = table
            .iter()
            .skip(1)
            .map(|entry| {
                let persona = entry.label().to_string();
                let text = match entry.elo_rating {
                    Some(rating) => format!(
                        "Ranks #{} with Elo rating {rating:.1}. Averaged rank {:.1} in initial evaluations but fell short in head-to-head comparisons.",
                        entry.rank,
                        avg_rank(persona.as_str())
                    ),
                    None => format!(
                        "Ranks #{} after averaging rank {:.1} in initial evaluations; not among the top candidates.",
                        entry.rank,
                        avg_rank(persona.as_str())
                    ),
                };
                (format!("{DRAFT_PREFIX}{persona}"), text)
            })
            .collect();
        let discussion = initial
            .iter()
            .enumerate()
            .map(|(idx, result)| format!("=== Initial Run {} ===\n{}", idx + 1, result.discussion))
            .collect::<Vec<_>>()
            .join("\n\n");

        self.write_initial_log(chapter_id, runs, &initial, &by_average, top_n, &avg_rank);

        Ok(RankingResult {
            chapter_id: chapter_id.to_string(),
            method: RankingMethod::SmartRanking,
            versions: versions.iter().map(|v| v.persona.clone()).collect(),
            table,
            analysis,
            feedback,
            discussion,
            timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            initial_runs: Some(runs),
            pairs_tested: Some(verdicts.len()),
            contradictions: Some(contradictions),
        })
    }

    fn final_entry(
        &self,
        rank: u32,
        persona: &str,
        elo_rating: Option<f64>,
        avg_initial_rank: f64,
        ranks: &HashMap<&str, Vec<u32>>,
        initial: &[RankingResult],
    ) -> RankingEntry {
        let mut scores = Scores::default();
        for criterion in &CRITERIA {
            let seen: Vec<f64> = initial
                .iter()
                .flat_map(|result| result.table.iter())
                .filter(|entry| entry.persona.as_deref() == Some(persona))
                .filter_map(|entry| entry.scores.get(criterion.key))
                .collect();
            let value = if seen.is_empty() {
                DEFAULT_SCORE
            } else {
                (seen.iter().sum::<f64>() / seen.len() as f64).round()
            };
            scores.set(criterion.key, value);
        }
        RankingEntry {
            rank,
            id: format!("{DRAFT_PREFIX}{persona}"),
            persona: Some(persona.to_string()),
            scores,
            elo_rating,
            avg_initial_rank: Some((avg_initial_rank * 100.0).round() / 100.0),
            consistency: Some(
                consistency_label(ranks.get(persona).map(Vec::as_slice).unwrap_or(&[]))
                    .to_string(),
            ),
        }
    }

    fn write_initial_log(
        &self,
        chapter_id: &str,
        runs: usize,
        initial: &[RankingResult],
        by_average: &[&DraftVersion],
        top_n: usize,
        avg_rank: &dyn Fn(&str) -> f64,
    ) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let summary = InitialRankingLog {
            chapter_id,
            method: RankingMethod::SmartRanking,
            initial_runs: runs,
            timestamp: Local::now().to_rfc3339(),
            runs: initial
                .iter()
                .enumerate()
                .map(|(idx, result)| InitialRun {
                    run_number: idx + 1,
                    versions_order: &result.versions,
                    table: &result.table,
                })
                .collect(),
            average_rankings: by_average
                .iter()
                .map(|v| (v.persona.as_str(), avg_rank(v.persona.as_str())))
                .collect(),
            top_candidates: by_average[..top_n]
                .iter()
                .map(|v| v.persona.as_str())
                .collect(),
        };
        let path = dir.join(format!("{chapter_id}_initial_rankings.json"));
        let written = serde_json::to_string_pretty(&summary)
            .map_err(std::io::Error::other)
            .and_then(|json| fs::create_dir_all(dir).and_then(|_| fs::write(&path, json)));
        if let Err(err) = written {
            self.log(
                LogLevel::Warn,
                format!("could not write {}: {err}", path.display()),
            );
        }
    }
}
