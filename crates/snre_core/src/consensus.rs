//! Consensus engine: threshold acceptance over mean votes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::models::{AgentId, Change, ChangeId, ConsensusDecision};

/// Scores per voter, keyed by change identity.
pub type VoteMatrix = BTreeMap<AgentId, HashMap<ChangeId, f64>>;

/// Pick the winning candidate for one voting round.
///
/// Each candidate's score is the unweighted mean over every voter in
/// `votes`; a voter missing a score for any candidate is an error, not a zero.
/// Acceptance is inclusive (`score >= threshold`). Among accepted candidates
/// the order is: higher score, higher proposer priority, lower `line_start`,
/// smaller proposer id, then `line_end` and change id, so the result never
/// depends on input order.
pub fn decide(
    candidates: &[Change],
    votes: &VoteMatrix,
    threshold: f64,
    priorities: &BTreeMap<AgentId, i32>,
) -> CoreResult<ConsensusDecision> {
    if candidates.is_empty() || votes.is_empty() {
        return Ok(ConsensusDecision::empty());
    }

    let mut scored = Vec::with_capacity(candidates.len());
    for change in candidates {
        let id = change.id();
        let mut sum = 0.0;
        for (voter, ballot) in votes {
            let score = ballot.get(&id).ok_or_else(|| CoreError::IncompleteVotes {
                agent: voter.clone(),
                change: id.to_string(),
            })?;
            sum += score;
        }
        let priority = priorities.get(change.agent_id()).copied().unwrap_or(0);
        scored.push(Scored {
            change,
            id,
            score: sum / votes.len() as f64,
            priority,
        });
    }

    scored.sort_by(Scored::rank);
    let best = &scored[0];
    let accepted = best.score >= threshold;

    Ok(ConsensusDecision {
        accepted,
        votes: votes
            .iter()
            .map(|(voter, ballot)| (voter.clone(), ballot.get(&best.id).copied().unwrap_or(0.0)))
            .collect(),
        winner: accepted.then(|| best.change.clone()),
        score: best.score,
    })
}

struct Scored<'a> {
    change: &'a Change,
    id: ChangeId,
    score: f64,
    priority: i32,
}

impl Scored<'_> {
    fn rank(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.change.line_start().cmp(&b.change.line_start()))
            .then_with(|| a.change.agent_id().cmp(b.change.agent_id()))
            .then_with(|| a.change.line_end().cmp(&b.change.line_end()))
            .then_with(|| a.id.cmp(&b.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;

    fn change(agent: &str, start: usize) -> Change {
        Change::new(
            agent,
            ChangeKind::Other,
            start..start + 1,
            format!("line {}", start),
            format!("fixed {}", start),
            0.9,
        )
        .unwrap()
    }

    fn uniform(voters: &[&str], candidates: &[Change], score: f64) -> VoteMatrix {
        voters
            .iter()
            .map(|v| {
                (
                    v.to_string(),
                    candidates.iter().map(|c| (c.id(), score)).collect(),
                )
            })
            .collect()
    }

    fn priorities(pairs: &[(&str, i32)]) -> BTreeMap<AgentId, i32> {
        pairs.iter().map(|(id, p)| (id.to_string(), *p)).collect()
    }

    #[test]
    fn test_empty_candidates_not_accepted() {
        let decision = decide(&[], &VoteMatrix::new(), 0.6, &BTreeMap::new()).unwrap();
        assert!(!decision.accepted);
        assert!(decision.winner.is_none());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let candidates = vec![change("a", 0)];
        let votes = uniform(&["a", "b"], &candidates, 0.6);

        let decision = decide(&candidates, &votes, 0.6, &BTreeMap::new()).unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.score, 0.6);

        let decision = decide(&candidates, &votes, 0.61, &BTreeMap::new()).unwrap();
        assert!(!decision.accepted);
        assert!(decision.winner.is_none());
        assert_eq!(decision.votes.len(), 2);
    }

    #[test]
    fn test_mean_of_votes() {
        let candidates = vec![change("a", 0)];
        let id = candidates[0].id();
        let mut votes = VoteMatrix::new();
        votes.insert("a".into(), HashMap::from([(id.clone(), 1.0)]));
        votes.insert("b".into(), HashMap::from([(id.clone(), 0.0)]));

        let decision = decide(&candidates, &votes, 0.5, &BTreeMap::new()).unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.score, 0.5);
        assert_eq!(decision.votes.get("b"), Some(&0.0));
    }

    #[test]
    fn test_missing_vote_is_an_error() {
        let candidates = vec![change("a", 0), change("b", 1)];
        let mut votes = uniform(&["a"], &candidates, 0.9);
        votes.insert("b".into(), HashMap::from([(candidates[0].id(), 0.9)]));

        assert!(matches!(
            decide(&candidates, &votes, 0.5, &BTreeMap::new()),
            Err(CoreError::IncompleteVotes { agent, .. }) if agent == "b"
        ));
    }

    #[test]
    fn test_priority_breaks_score_ties() {
        let candidates = vec![change("loop", 0), change("security", 5)];
        let votes = uniform(&["loop", "security"], &candidates, 0.9);
        let prio = priorities(&[("loop", 6), ("security", 9)]);

        let decision = decide(&candidates, &votes, 0.6, &prio).unwrap();
        assert_eq!(decision.winner.unwrap().agent_id(), "security");
    }

    #[test]
    fn test_line_start_then_agent_id_break_ties() {
        let candidates = vec![change("b", 4), change("a", 7), change("c", 2)];
        let votes = uniform(&["x"], &candidates, 0.8);
        let prio = priorities(&[("a", 1), ("b", 1), ("c", 1)]);
        let decision = decide(&candidates, &votes, 0.6, &prio).unwrap();
        assert_eq!(decision.winner.unwrap().agent_id(), "c");

        let candidates = vec![change("zeta", 3), change("alpha", 3)];
        let votes = uniform(&["x"], &candidates, 0.8);
        let decision = decide(&candidates, &votes, 0.6, &BTreeMap::new()).unwrap();
        assert_eq!(decision.winner.unwrap().agent_id(), "alpha");
    }

    #[test]
    fn test_decision_independent_of_input_order() {
        let candidates = vec![change("b", 1), change("a", 1), change("c", 0)];
        let mut votes = uniform(&["a", "b", "c"], &candidates, 0.7);
        votes
            .get_mut("c")
            .unwrap()
            .insert(candidates[2].id(), 0.4);
        let prio = priorities(&[("a", 1), ("b", 1), ("c", 1)]);

        let forward = decide(&candidates, &votes, 0.6, &prio).unwrap();
        let mut reversed = candidates.clone();
        reversed.reverse();
        let backward = decide(&reversed, &votes, 0.6, &prio).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward, decide(&candidates, &votes, 0.6, &prio).unwrap());
        assert_eq!(forward.winner.unwrap().agent_id(), "a");
    }
}
