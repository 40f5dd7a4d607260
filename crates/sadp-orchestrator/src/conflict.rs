//! Conflict detection and resolution.
//!
//! Results are only compared within one dispatch round. Every keyed facet of a
//! [`WorkResult`] maps to one conflict kind; a conflict is raised per key that
//! two or more results disagree on. Resolution runs an ordered chain of pure
//! strategies and escalates when none of them can pick a winner.

use crate::error::{OrchestrationError, Result};
use crate::executor::WorkResult;
use crate::types::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// What the conflicting results contend over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two results claim the same exclusive resource.
    ResourceContention,
    /// Two results produce different values for the same artifact.
    ContradictoryOutput,
    /// Two results propose different priorities for the same work item.
    PriorityClash,
}

/// A result taking part in a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Task that produced the result.
    pub task_id: String,
    /// Agent that ran the task.
    pub agent_id: AgentId,
    /// Agent's configured precedence.
    pub precedence: u32,
    /// Self-reported quality score.
    pub quality_score: f64,
}

/// How a winner was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Higher agent precedence.
    Priority,
    /// Equal precedence, higher quality score.
    Quality,
    /// Supplied by the external caller after escalation.
    External,
}

/// A winning result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Winning task.
    pub task_id: String,
    /// Winning agent.
    pub agent_id: AgentId,
    /// How it won.
    pub method: ResolutionMethod,
}

/// Resolution state of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// Detected, not yet run through the strategy chain.
    Pending,
    /// No strategy could decide; awaiting the external caller.
    Escalated,
    /// Final decision.
    Resolved(Decision),
}

/// A detected contention between results of one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict ID.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Round the results belong to.
    pub round: u32,
    /// Kind of contention.
    pub kind: ConflictKind,
    /// Resource, artifact or work-item key contended over.
    pub key: String,
    /// Agents involved.
    pub agents: BTreeSet<AgentId>,
    /// Competing results, in dispatch order.
    pub candidates: Vec<Candidate>,
    /// Current resolution.
    pub resolution: Resolution,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
    /// Time a final decision was recorded.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Whether a final decision has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }

    /// Whether the conflict awaits external input.
    #[must_use]
    pub fn is_escalated(&self) -> bool {
        matches!(self.resolution, Resolution::Escalated)
    }

    /// The winning decision, once resolved.
    #[must_use]
    pub fn decision(&self) -> Option<&Decision> {
        match &self.resolution {
            Resolution::Resolved(decision) => Some(decision),
            _ => None,
        }
    }

    /// Time from detection to the final decision, once resolved.
    #[must_use]
    pub fn resolution_time(&self) -> Option<Duration> {
        let resolved_at = self.resolved_at?;
        Some((resolved_at - self.detected_at).to_std().unwrap_or(Duration::ZERO))
    }

    /// Records an externally chosen winner.
    ///
    /// # Errors
    /// Fails if the conflict is already resolved or the task is not a candidate.
    pub fn resolve_externally(&mut self, winner_task_id: &str) -> Result<Decision> {
        if self.is_resolved() {
            return Err(OrchestrationError::ConflictAlreadyResolved(self.id.clone()));
        }
        let candidate = self
            .candidates
            .iter()
            .find(|c| c.task_id == winner_task_id)
            .ok_or_else(|| {
                OrchestrationError::Validation(format!(
                    "task '{winner_task_id}' is not a candidate of conflict {}",
                    self.id
                ))
            })?;
        let decision = Decision {
            task_id: candidate.task_id.clone(),
            agent_id: candidate.agent_id.clone(),
            method: ResolutionMethod::External,
        };
        self.settle(Resolution::Resolved(decision.clone()));
        Ok(decision)
    }

    fn settle(&mut self, resolution: Resolution) {
        if matches!(resolution, Resolution::Resolved(_)) {
            self.resolved_at = Some(Utc::now());
        }
        self.resolution = resolution;
    }
}

/// A successful result entering conflict detection.
#[derive(Debug, Clone, Copy)]
pub struct RoundResult<'a> {
    /// Task that produced it.
    pub task_id: &'a str,
    /// Agent that ran the task.
    pub agent_id: &'a str,
    /// Agent's configured precedence.
    pub precedence: u32,
    /// The work itself.
    pub work: &'a WorkResult,
}

impl RoundResult<'_> {
    fn candidate(&self) -> Candidate {
        Candidate {
            task_id: self.task_id.to_string(),
            agent_id: self.agent_id.to_string(),
            precedence: self.precedence,
            quality_score: self.work.quality_score,
        }
    }
}

/// One link of the tie-break chain.
pub trait ResolutionStrategy: Send + Sync + fmt::Debug {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Picks a winner, or `None` when this strategy cannot tell the candidates apart.
    fn decide(&self, candidates: &[Candidate]) -> Option<Decision>;
}

fn unique_max<'a, K, F>(candidates: &[&'a Candidate], key: F) -> Option<&'a Candidate>
where
    F: Fn(&Candidate) -> K,
    K: PartialOrd,
{
    let mut best: Vec<&'a Candidate> = Vec::new();
    for &candidate in candidates {
        match best.first().copied() {
            None => best.push(candidate),
            Some(current) => match key(candidate).partial_cmp(&key(current)) {
                Some(std::cmp::Ordering::Greater) => best = vec![candidate],
                Some(std::cmp::Ordering::Equal) => best.push(candidate),
                _ => {}
            },
        }
    }
    match best.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Non-finite scores rank below every real score.
fn ranked_quality(score: f64) -> f64 {
    if score.is_finite() { score } else { f64::NEG_INFINITY }
}

fn top_precedence(candidates: &[Candidate]) -> Vec<&Candidate> {
    let Some(max) = candidates.iter().map(|c| c.precedence).max() else {
        return Vec::new();
    };
    candidates.iter().filter(|c| c.precedence == max).collect()
}

/// The candidate whose agent has the highest precedence wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityTieBreak;

impl ResolutionStrategy for PriorityTieBreak {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn decide(&self, candidates: &[Candidate]) -> Option<Decision> {
        let all: Vec<&Candidate> = candidates.iter().collect();
        unique_max(&all, |c| c.precedence).map(|winner| Decision {
            task_id: winner.task_id.clone(),
            agent_id: winner.agent_id.clone(),
            method: ResolutionMethod::Priority,
        })
    }
}

/// Among the highest-precedence candidates, the higher quality score wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityTieBreak;

impl ResolutionStrategy for QualityTieBreak {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn decide(&self, candidates: &[Candidate]) -> Option<Decision> {
        let contenders = top_precedence(candidates);
        unique_max(&contenders, |c| ranked_quality(c.quality_score)).map(|winner| Decision {
            task_id: winner.task_id.clone(),
            agent_id: winner.agent_id.clone(),
            method: ResolutionMethod::Quality,
        })
    }
}

/// Detects conflicts within a round and runs the tie-break chain.
#[derive(Debug)]
pub struct ConflictResolver {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl ConflictResolver {
    /// Creates a resolver with the default chain: priority, then quality.
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategies(vec![Box::new(PriorityTieBreak), Box::new(QualityTieBreak)])
    }

    /// Creates a resolver with a custom strategy chain.
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Finds every key that two or more results of one round disagree on.
    ///
    /// `results` must be in dispatch order; the output is ordered by kind, then key.
    #[must_use]
    pub fn detect(&self, session_id: &str, round: u32, results: &[RoundResult<'_>]) -> Vec<Conflict> {
        let mut claims: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        let mut artifacts: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        let mut priorities: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for (idx, result) in results.iter().enumerate() {
            for resource in &result.work.claims {
                claims.entry(resource.as_str()).or_default().push(idx);
            }
            for key in result.work.artifacts.keys() {
                artifacts.entry(key.as_str()).or_default().push(idx);
            }
            for item in result.work.priorities.keys() {
                priorities.entry(item.as_str()).or_default().push(idx);
            }
        }

        let mut conflicts = Vec::new();
        let mut raise = |kind: ConflictKind, key: &str, members: &[usize]| {
            let candidates: Vec<Candidate> = members.iter().map(|&i| results[i].candidate()).collect();
            let conflict = Conflict {
                id: format!("conflict-{}", uuid::Uuid::new_v4()),
                session_id: session_id.to_string(),
                round,
                kind,
                key: key.to_string(),
                agents: candidates.iter().map(|c| c.agent_id.clone()).collect(),
                candidates,
                resolution: Resolution::Pending,
                detected_at: Utc::now(),
                resolved_at: None,
            };
            debug!(
                session_id = %session_id,
                round,
                kind = ?kind,
                key = %key,
                agents = ?conflict.agents,
                "Conflict detected"
            );
            conflicts.push(conflict);
        };

        for (resource, members) in &claims {
            if members.len() > 1 {
                raise(ConflictKind::ResourceContention, resource, members);
            }
        }
        for (key, members) in &artifacts {
            let first = &results[members[0]].work.artifacts[*key];
            if members.iter().any(|&i| &results[i].work.artifacts[*key] != first) {
                raise(ConflictKind::ContradictoryOutput, key, members);
            }
        }
        for (item, members) in &priorities {
            let first = results[members[0]].work.priorities[*item];
            if members.iter().any(|&i| results[i].work.priorities[*item] != first) {
                raise(ConflictKind::PriorityClash, item, members);
            }
        }

        conflicts
    }

    /// Runs the strategy chain. Pure: identical candidates yield the same decision.
    #[must_use]
    pub fn decide(&self, candidates: &[Candidate]) -> Option<Decision> {
        self.strategies.iter().find_map(|strategy| {
            let decision = strategy.decide(candidates);
            if decision.is_some() {
                debug!(strategy = strategy.name(), "Strategy produced a decision");
            }
            decision
        })
    }

    /// Resolves a pending conflict in place, escalating when undecidable.
    ///
    /// Already resolved or escalated conflicts are left untouched.
    pub fn resolve<'c>(&self, conflict: &'c mut Conflict) -> &'c Resolution {
        if conflict.resolution != Resolution::Pending {
            return &conflict.resolution;
        }
        match self.decide(&conflict.candidates) {
            Some(decision) => {
                debug!(
                    conflict_id = %conflict.id,
                    winner = %decision.agent_id,
                    method = ?decision.method,
                    "Conflict resolved"
                );
                conflict.settle(Resolution::Resolved(decision));
            }
            None => {
                warn!(
                    conflict_id = %conflict.id,
                    session_id = %conflict.session_id,
                    key = %conflict.key,
                    "Conflict escalated for external resolution"
                );
                conflict.settle(Resolution::Escalated);
            }
        }
        &conflict.resolution
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use serde_json::json;

    fn candidate(task: &str, agent: &str, precedence: u32, quality: f64) -> Candidate {
        Candidate {
            task_id: task.to_string(),
            agent_id: agent.to_string(),
            precedence,
            quality_score: quality,
        }
    }

    fn result<'a>(task: &'a str, agent: &'a str, precedence: u32, work: &'a WorkResult) -> RoundResult<'a> {
        RoundResult { task_id: task, agent_id: agent, precedence, work }
    }

    #[test]
    fn test_detects_contradictory_artifacts() {
        let a = WorkResult::new("a", 90.0).with_artifact("api.schema", json!("rest"));
        let b = WorkResult::new("b", 90.0).with_artifact("api.schema", json!("graphql"));
        let resolver = ConflictResolver::new();

        let conflicts = resolver.detect(
            "s1",
            1,
            &[result("t1", "claude", 10, &a), result("t2", "cursor_ai", 10, &b)],
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::ContradictoryOutput);
        assert_eq!(conflicts[0].key, "api.schema");
        assert_eq!(conflicts[0].candidates.len(), 2);
    }

    #[test]
    fn test_agreeing_artifacts_do_not_conflict() {
        let a = WorkResult::new("a", 90.0).with_artifact("api.schema", json!("rest"));
        let b = WorkResult::new("b", 80.0).with_artifact("api.schema", json!("rest"));
        let resolver = ConflictResolver::new();

        let conflicts = resolver.detect(
            "s1",
            1,
            &[result("t1", "claude", 10, &a), result("t2", "cursor_ai", 10, &b)],
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_detects_claims_and_priorities() {
        let a = WorkResult::new("a", 90.0)
            .with_claim("repo:main")
            .with_priority("login-page", Priority::High);
        let b = WorkResult::new("b", 90.0)
            .with_claim("repo:main")
            .with_priority("login-page", Priority::Low);
        let resolver = ConflictResolver::new();

        let conflicts = resolver.detect(
            "s1",
            2,
            &[result("t1", "figma_ai", 1, &a), result("t2", "cursor_ai", 1, &b)],
        );
        let kinds: Vec<_> = conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, [ConflictKind::ResourceContention, ConflictKind::PriorityClash]);
        assert!(conflicts.iter().all(|c| c.round == 2));
    }

    #[test]
    fn test_priority_wins_first() {
        let resolver = ConflictResolver::new();
        let decision = resolver
            .decide(&[candidate("t1", "claude", 40, 70.0), candidate("t2", "cursor_ai", 35, 99.0)])
            .unwrap();
        assert_eq!(decision.agent_id, "claude");
        assert_eq!(decision.method, ResolutionMethod::Priority);
    }

    #[test]
    fn test_quality_breaks_priority_ties() {
        let resolver = ConflictResolver::new();
        let decision = resolver
            .decide(&[
                candidate("t1", "claude", 40, 70.0),
                candidate("t2", "cursor_ai", 40, 92.0),
                candidate("t3", "figma_ai", 10, 99.0),
            ])
            .unwrap();
        assert_eq!(decision.agent_id, "cursor_ai");
        assert_eq!(decision.method, ResolutionMethod::Quality);
    }

    #[test]
    fn test_non_finite_quality_ranks_last() {
        let resolver = ConflictResolver::new();
        let scored = candidate("t2", "cursor_ai", 40, 95.0);
        for garbage in [f64::NAN, f64::INFINITY] {
            let bad = candidate("t1", "claude", 40, garbage);
            let forward = resolver.decide(&[bad.clone(), scored.clone()]).unwrap();
            let reversed = resolver.decide(&[scored.clone(), bad]).unwrap();
            assert_eq!(forward.agent_id, "cursor_ai");
            assert_eq!(reversed.agent_id, "cursor_ai");
            assert_eq!(forward.method, ResolutionMethod::Quality);
        }

        let both = resolver.decide(&[
            candidate("t1", "claude", 40, f64::NAN),
            candidate("t2", "cursor_ai", 40, f64::NAN),
        ]);
        assert!(both.is_none());
    }

    #[test]
    fn test_full_tie_escalates() {
        let resolver = ConflictResolver::new();
        let a = WorkResult::new("a", 90.0).with_artifact("k", json!(1));
        let b = WorkResult::new("b", 90.0).with_artifact("k", json!(2));
        let mut conflict = resolver
            .detect("s1", 1, &[result("t1", "claude", 5, &a), result("t2", "cursor_ai", 5, &b)])
            .remove(0);

        assert_eq!(resolver.resolve(&mut conflict), &Resolution::Escalated);
        assert!(conflict.is_escalated());
        assert!(conflict.resolved_at.is_none());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = ConflictResolver::new();
        let candidates =
            [candidate("t1", "claude", 5, 88.5), candidate("t2", "cursor_ai", 5, 91.0)];
        let first = resolver.decide(&candidates);
        for _ in 0..10 {
            assert_eq!(resolver.decide(&candidates), first);
        }
    }

    #[test]
    fn test_external_resolution() {
        let resolver = ConflictResolver::new();
        let a = WorkResult::new("a", 90.0).with_artifact("k", json!(1));
        let b = WorkResult::new("b", 90.0).with_artifact("k", json!(2));
        let mut conflict = resolver
            .detect("s1", 1, &[result("t1", "claude", 5, &a), result("t2", "cursor_ai", 5, &b)])
            .remove(0);
        resolver.resolve(&mut conflict);

        assert!(conflict.resolve_externally("t9").is_err());
        let decision = conflict.resolve_externally("t2").unwrap();
        assert_eq!(decision.agent_id, "cursor_ai");
        assert_eq!(decision.method, ResolutionMethod::External);

        let err = conflict.resolve_externally("t1").unwrap_err();
        assert!(matches!(err, OrchestrationError::ConflictAlreadyResolved(_)));
        assert_eq!(conflict.decision().unwrap().task_id, "t2");
    }

    #[test]
    fn test_resolved_conflict_is_not_rerun() {
        let resolver = ConflictResolver::new();
        let mut conflict = Conflict {
            id: "c1".to_string(),
            session_id: "s1".to_string(),
            round: 1,
            kind: ConflictKind::ContradictoryOutput,
            key: "k".to_string(),
            agents: BTreeSet::new(),
            candidates: vec![candidate("t1", "claude", 1, 1.0), candidate("t2", "figma_ai", 9, 1.0)],
            resolution: Resolution::Resolved(Decision {
                task_id: "t1".to_string(),
                agent_id: "claude".to_string(),
                method: ResolutionMethod::External,
            }),
            detected_at: Utc::now(),
            resolved_at: Some(Utc::now()),
        };
        resolver.resolve(&mut conflict);
        assert_eq!(conflict.decision().unwrap().agent_id, "claude");
    }
}
