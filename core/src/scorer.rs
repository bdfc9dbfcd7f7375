/// Computes `calculated_priority` as a weighted sum of five terms. A pure
/// function of a task and a small amount of graph neighborhood info
/// (dependency depth, count of blocked direct dependents); it never touches
/// the Store itself.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Task, TaskSource};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub w_base: f64,
    pub w_depth: f64,
    pub w_urgency: f64,
    pub w_block: f64,
    pub w_source: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_base: 0.30,
            w_depth: 0.25,
            w_urgency: 0.25,
            w_block: 0.15,
            w_source: 0.05,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.w_base + self.w_depth + self.w_urgency + self.w_block + self.w_source
    }

    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() < 1e-6
    }
}

pub struct PriorityScorer {
    weights: ScoringWeights,
    deadline_horizon_seconds: i64,
}

const BLOCK_SCORE_K: f64 = 0.3;

impl PriorityScorer {
    pub fn new(weights: ScoringWeights, deadline_horizon_seconds: i64) -> Self {
        Self {
            weights,
            deadline_horizon_seconds,
        }
    }

    /// Computes `calculated_priority` for `task`, given the count of its
    /// direct downstream dependents currently `blocked`.
    pub fn score(&self, task: &Task, blocked_direct_dependents: usize, now: DateTime<Utc>) -> f64 {
        let w = &self.weights;
        let value = w.w_base * norm(task.base_priority, 0.0, 10.0)
            + w.w_depth * depth_score(task.dependency_depth)
            + w.w_urgency * urgency_score(
                task.deadline,
                now,
                task.estimated_duration_seconds,
                self.deadline_horizon_seconds,
            )
            + w.w_block * block_score(blocked_direct_dependents)
            + w.w_source * source_score(task.source);

        (100.0 * value).clamp(0.0, 100.0)
    }
}

fn norm(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn depth_score(depth: i64) -> f64 {
    1.0 - 1.0 / (1.0 + depth as f64)
}

fn urgency_score(
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    estimated_duration_seconds: Option<i64>,
    horizon_seconds: i64,
) -> f64 {
    let Some(deadline) = deadline else {
        return 0.0;
    };
    let estimated = estimated_duration_seconds.unwrap_or(0);
    let slack_seconds = (deadline - now).num_seconds() - estimated;
    let normalized_slack = (slack_seconds as f64 / horizon_seconds as f64).clamp(0.0, 1.0);
    // Tighter slack -> larger score.
    1.0 - normalized_slack
}

fn block_score(blocked_direct_dependents: usize) -> f64 {
    1.0 - (-BLOCK_SCORE_K * blocked_direct_dependents as f64).exp()
}

fn source_score(source: TaskSource) -> f64 {
    match source {
        TaskSource::Human => 1.0,
        TaskSource::AgentPlanner => 0.7,
        TaskSource::AgentRequirements => 0.5,
        TaskSource::AgentImplementation => 0.4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use uuid::Uuid;

    fn base_task() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            description: "task".to_string(),
            summary: None,
            agent_type: "requirements-gatherer".to_string(),
            base_priority: 5.0,
            status: TaskStatus::Ready,
            source: TaskSource::Human,
            parent_task_id: None,
            session_id: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            deadline: None,
            estimated_duration_seconds: None,
            input_data: serde_json::json!({}),
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: 0,
            execution_timeout_seconds: 3600,
            calculated_priority: 0.0,
            dependency_depth: 0,
        }
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!(ScoringWeights::default().is_valid());
    }

    #[test]
    fn higher_base_priority_yields_higher_score() {
        let scorer = PriorityScorer::new(ScoringWeights::default(), 86_400);
        let mut low = base_task();
        low.base_priority = 1.0;
        let mut high = base_task();
        high.base_priority = 9.0;

        let now = Utc::now();
        assert!(scorer.score(&high, 0, now) > scorer.score(&low, 0, now));
    }

    #[test]
    fn deeper_tasks_score_higher_all_else_equal() {
        let scorer = PriorityScorer::new(ScoringWeights::default(), 86_400);
        let mut shallow = base_task();
        shallow.dependency_depth = 0;
        let mut deep = base_task();
        deep.dependency_depth = 5;

        let now = Utc::now();
        assert!(scorer.score(&deep, 0, now) > scorer.score(&shallow, 0, now));
    }

    #[test]
    fn tighter_deadline_scores_higher() {
        let scorer = PriorityScorer::new(ScoringWeights::default(), 86_400);
        let now = Utc::now();
        let mut tight = base_task();
        tight.deadline = Some(now + chrono::Duration::hours(1));
        let mut loose = base_task();
        loose.deadline = Some(now + chrono::Duration::hours(23));

        assert!(scorer.score(&tight, 0, now) > scorer.score(&loose, 0, now));
    }

    #[test]
    fn human_source_outranks_agent_implementation_all_else_equal() {
        let scorer = PriorityScorer::new(ScoringWeights::default(), 86_400);
        let mut human = base_task();
        human.source = TaskSource::Human;
        let mut agent = base_task();
        agent.source = TaskSource::AgentImplementation;

        let now = Utc::now();
        assert!(scorer.score(&human, 0, now) > scorer.score(&agent, 0, now));
    }

    #[test]
    fn more_blocked_dependents_increases_score() {
        let scorer = PriorityScorer::new(ScoringWeights::default(), 86_400);
        let task = base_task();
        let now = Utc::now();
        assert!(scorer.score(&task, 5, now) > scorer.score(&task, 0, now));
    }

    #[test]
    fn score_is_always_within_bounds() {
        let scorer = PriorityScorer::new(ScoringWeights::default(), 86_400);
        let mut task = base_task();
        task.base_priority = 10.0;
        task.dependency_depth = 1000;
        task.deadline = Some(Utc::now() - chrono::Duration::days(10));
        let score = scorer.score(&task, 1000, Utc::now());
        assert!((0.0..=100.0).contains(&score));
    }
}
