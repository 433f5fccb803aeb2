//! Score fusion for hybrid search.
//!
//! The search engine gathers two candidate sets, lexical (full-text) and
//! semantic (vector cosine), and fuses them under a mixing weight
//! `alpha ∈ [0, 1]`:
//!
//! ```text
//! fused = (1 - alpha) * lexical + alpha * semantic
//! ```
//!
//! Each score set is min-max normalised over its own candidates before
//! fusion; a candidate present in only one set scores 0 on the missing
//! side. Ties break by more recent timestamp, then by conversation id.
//! With `alpha = 0` the output ordering equals the lexical ranking, with
//! `alpha = 1` the semantic ranking.

use chrono::{DateTime, Utc};

/// A search candidate prior to fusion.
///
/// `lexical` and `semantic` are raw scores from their respective stores;
/// `None` means the candidate was absent from that arm.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub lexical: Option<f64>,
    pub semantic: Option<f64>,
    pub ts: DateTime<Utc>,
    pub conversation_id: String,
}

/// A fused, ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: String,
    pub score: f64,
    /// The lexical arm contributed this result.
    pub keyword_match: bool,
    /// The semantic arm contributed this result.
    pub semantic_match: bool,
}

/// Fuse lexical and semantic candidates and return the top `limit`.
pub fn fuse(candidates: Vec<Candidate>, alpha: f64, limit: usize) -> Vec<Ranked> {
    let alpha = alpha.clamp(0.0, 1.0);

    let lex_norm = Normalizer::over(candidates.iter().filter_map(|c| c.lexical));
    let sem_norm = Normalizer::over(candidates.iter().filter_map(|c| c.semantic));

    let mut ranked: Vec<(Ranked, DateTime<Utc>, String)> = candidates
        .into_iter()
        .map(|c| {
            let lex = c.lexical.map(|s| lex_norm.apply(s)).unwrap_or(0.0);
            let sem = c.semantic.map(|s| sem_norm.apply(s)).unwrap_or(0.0);
            let score = (1.0 - alpha) * lex + alpha * sem;
            (
                Ranked {
                    id: c.id,
                    score,
                    keyword_match: c.lexical.is_some(),
                    semantic_match: c.semantic.is_some(),
                },
                c.ts,
                c.conversation_id,
            )
        })
        .collect();

    ranked.sort_by(|(a, a_ts, a_conv), (b, b_ts, b_conv)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b_ts.cmp(a_ts))
            .then(a_conv.cmp(b_conv))
    });
    ranked.truncate(limit);

    ranked.into_iter().map(|(r, _, _)| r).collect()
}

/// Min-max normaliser over one score set.
struct Normalizer {
    min: f64,
    max: f64,
}

impl Normalizer {
    fn over(scores: impl Iterator<Item = f64>) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for s in scores {
            min = min.min(s);
            max = max.max(s);
        }
        Self { min, max }
    }

    fn apply(&self, score: f64) -> f64 {
        if !self.min.is_finite() || !self.max.is_finite() {
            return 0.0;
        }
        if (self.max - self.min).abs() < f64::EPSILON {
            // A single candidate (or identical scores) counts as a full match.
            return 1.0;
        }
        (score - self.min) / (self.max - self.min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn cand(id: &str, lexical: Option<f64>, semantic: Option<f64>, t: i64) -> Candidate {
        Candidate {
            id: id.to_string(),
            lexical,
            semantic,
            ts: ts(t),
            conversation_id: "C01".to_string(),
        }
    }

    #[test]
    fn alpha_zero_matches_lexical_ordering() {
        let candidates = vec![
            cand("a", Some(3.0), Some(0.1), 1),
            cand("b", Some(2.0), Some(0.9), 2),
            cand("c", Some(1.0), None, 3),
        ];
        let ranked = fuse(candidates, 0.0, 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn alpha_one_matches_semantic_ordering() {
        let candidates = vec![
            cand("a", Some(3.0), Some(0.1), 1),
            cand("b", Some(2.0), Some(0.9), 2),
            cand("c", None, Some(0.5), 3),
        ];
        let ranked = fuse(candidates, 1.0, 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn missing_side_scores_zero() {
        let candidates = vec![
            cand("lex-only", Some(5.0), None, 1),
            cand("sem-only", None, Some(0.8), 1),
        ];
        let ranked = fuse(candidates, 0.5, 10);
        // Both normalise to 1.0 on their own arm and 0.0 on the other,
        // so fused scores tie at 0.5 and both survive.
        assert_eq!(ranked.len(), 2);
        assert!((ranked[0].score - 0.5).abs() < 1e-9);
        assert!((ranked[1].score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn source_flags_are_reported() {
        let candidates = vec![
            cand("both", Some(1.0), Some(0.5), 1),
            cand("lex", Some(0.5), None, 1),
        ];
        let ranked = fuse(candidates, 0.5, 10);
        let both = ranked.iter().find(|r| r.id == "both").unwrap();
        assert!(both.keyword_match && both.semantic_match);
        let lex = ranked.iter().find(|r| r.id == "lex").unwrap();
        assert!(lex.keyword_match && !lex.semantic_match);
    }

    #[test]
    fn ties_break_by_recency_then_conversation() {
        let newer = cand("newer", Some(1.0), None, 100);
        let older = cand("older", Some(1.0), None, 50);
        let ranked = fuse(vec![older, newer], 0.0, 10);
        assert_eq!(ranked[0].id, "newer");

        let mut a = cand("a", Some(1.0), None, 100);
        a.conversation_id = "C01".into();
        let mut b = cand("b", Some(1.0), None, 100);
        b.conversation_id = "C02".into();
        let ranked = fuse(vec![b, a], 0.0, 10);
        assert_eq!(ranked[0].id, "a");
    }

    #[test]
    fn limit_truncates() {
        let candidates = (0..10)
            .map(|i| cand(&format!("m{i}"), Some(i as f64), None, i))
            .collect();
        let ranked = fuse(candidates, 0.0, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].id, "m9");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(fuse(Vec::new(), 0.5, 10).is_empty());
    }
}
