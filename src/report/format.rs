//! Formatted terminal output.
//!
//! Formatting lives in one place so:
//! - the tree/realization/statistics code stays free of presentation
//! - output changes are localized (important for future snapshot tests)

use std::time::Duration;

use crate::domain::{HazardGrid, JobConfig, RealizationMode};
use crate::realize::RealizationSet;
use crate::schedule::ScheduleSummary;
use crate::stats::{HazardMap, StatisticCurves};
use crate::tree::LogicTree;

/// Levels, branch sets and branch counts of a parsed tree.
pub fn format_tree_summary(tree: &LogicTree) -> String {
    let mut out = String::new();
    out.push_str(&format!("Logic tree '{}' ({:?})\n", tree.name(), tree.kind()));
    for level in 0..tree.n_levels() {
        for set in tree.level(level) {
            let filter = set
                .filter
                .as_ref()
                .map(|f| format!(" {}", f.name()))
                .unwrap_or_default();
            let targets = set
                .apply_to_branches
                .as_ref()
                .map(|b| format!(" -> [{}]", b.join(", ")))
                .unwrap_or_default();
            out.push_str(&format!(
                "  level {} {:<12} {:<18} {} branches{filter}{targets}\n",
                level + 1,
                set.id,
                set.uncertainty.name(),
                set.branches.len(),
            ));
        }
    }
    out.push_str(&format!(
        "  branches={} | max paths={}\n",
        tree.n_branches(),
        tree.max_paths()
    ));
    out
}

/// Realization table; `limit` caps the number of rows.
pub fn format_realizations(set: &RealizationSet, limit: Option<usize>) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>6} {:>10} {:<28} {:<16} {:<30}\n",
            "rlz", "weight", "path", "source model", "gsims"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<6} {:-<10} {:-<28} {:-<16} {:-<30}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    let shown = limit.unwrap_or(set.len()).min(set.len());
    for r in set.iter().take(shown) {
        let weight = r
            .weight
            .map(|w| format!("{w:>10.6}"))
            .unwrap_or_else(|| format!("{:>10}", "-"));
        let gsims: Vec<&str> = r.gsims.values().map(|g| g.as_str()).collect();
        out.push_str(
            format!(
                "{:>6} {weight} {:<28} {:<16} {:<30}\n",
                r.ordinal,
                truncate(&r.label(), 28),
                truncate(r.source_model.as_deref().unwrap_or("-"), 16),
                truncate(&gsims.join(","), 30),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    if shown < set.len() {
        out.push_str(&format!("  ... {} more\n", set.len() - shown));
    }
    if set.iter().all(|r| r.weight.is_some()) {
        out.push_str(&format!("  total weight={:.6}\n", set.total_weight()));
    }
    out
}

/// Job settings plus scheduling counters.
pub fn format_run_summary(
    job: &JobConfig,
    realizations: &RealizationSet,
    schedule: &ScheduleSummary,
    elapsed: Duration,
) -> String {
    let mut out = String::new();
    out.push_str("=== hz - logic tree hazard run ===\n");
    if !job.description.is_empty() {
        out.push_str(&format!("Job: {}\n", job.description));
    }
    let mode = match &job.realizations {
        RealizationMode::Enumerate => "full enumeration".to_string(),
        RealizationMode::Sample {
            seed,
            count,
            weighting,
        } => format!("{count} samples, seed {seed}, {weighting:?} weights"),
    };
    out.push_str(&format!(
        "Realizations: {} ({mode})\n",
        realizations.len()
    ));
    out.push_str(&format!(
        "Grid: {} sites | IMTs: {}\n",
        job.grid.n_sites(),
        job.grid
            .imts
            .keys()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    out.push_str(&format!(
        "Work: {} units | budget={} | max in flight={} | batch size={}\n",
        schedule.dispatched, job.concurrency, schedule.max_in_flight, job.batch_size
    ));
    out.push_str(&format!("Elapsed: {:.2}s\n", elapsed.as_secs_f64()));
    out
}

/// First-site curves of every statistic, then the hazard maps.
pub fn format_statistics(
    grid: &HazardGrid,
    statistics: &[StatisticCurves],
    maps: &[(String, Vec<HazardMap>)],
) -> String {
    let mut out = String::new();
    if let Some(site) = grid.sites.first() {
        out.push_str(&format!(
            "\nStatistics at site ({:.3}, {:.3}):\n",
            site.lon, site.lat
        ));
    }
    for stat in statistics {
        for (imt, matrix) in &stat.curves {
            if matrix.nrows() == 0 {
                continue;
            }
            let row: Vec<f64> = matrix.row(0).iter().copied().collect();
            out.push_str(&format!(
                "  {:<16} {:<10} {}\n",
                stat.kind.label(),
                imt.as_str(),
                fmt_vec(&row)
            ));
        }
    }

    if !maps.is_empty() {
        out.push_str("\nHazard maps (site 1 level):\n");
        for (kind, set) in maps {
            for map in set {
                let first = map.values.first().copied().unwrap_or(f64::NAN);
                out.push_str(&format!(
                    "  {:<16} {:<10} poe={:<6} {:.4}\n",
                    kind,
                    map.imt.as_str(),
                    map.poe,
                    first
                ));
            }
        }
    }
    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.4e}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::Realization;
    use crate::tree::fixtures::two_level_tree;

    fn realization(ordinal: usize, weight: Option<f64>) -> Realization {
        Realization {
            ordinal,
            path: vec!["b1".into(), format!("b{}", ordinal + 3)],
            gsim_path: Vec::new(),
            source_model: Some("sm_a.xml".into()),
            adjustments: Vec::new(),
            gsims: BTreeMap::new(),
            weight,
        }
    }

    #[test]
    fn tree_summary_lists_every_branch_set() {
        let text = format_tree_summary(&two_level_tree());
        assert!(text.contains("bs1"));
        assert!(text.contains("maxMagGRRelative"));
        assert!(text.contains("max paths=4"));
    }

    #[test]
    fn realization_table_respects_limit() {
        let set = RealizationSet::new(vec![
            realization(0, Some(0.5)),
            realization(1, Some(0.5)),
        ]);
        let text = format_realizations(&set, Some(1));
        assert!(text.contains("b1_b3"));
        assert!(!text.contains("b1_b4"));
        assert!(text.contains("1 more"));
        assert!(text.contains("total weight=1.000000"));
    }

    #[test]
    fn unweighted_samples_show_a_dash() {
        let set = RealizationSet::new(vec![realization(0, None)]);
        let text = format_realizations(&set, None);
        assert!(!text.contains("total weight"));
        assert!(text.lines().nth(2).unwrap().contains(" - "));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
