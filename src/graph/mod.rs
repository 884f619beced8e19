//! Ordered job collection.
//!
//! Indices used by operator commands refer to the current ordering. The graph
//! has no locking of its own; the scheduler owns it behind its mutex. Every
//! mutation bumps `generation`, which the store uses to drop stale snapshots.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;

use crate::job::{Job, JobState};

/// Errors for graph operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate job id: {0}")]
    DuplicateId(String),

    #[error("job {0} has zero weight")]
    ZeroWeight(String),

    #[error("index {index} out of range (queue has {len} jobs)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// The job queue in operator-visible order.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    jobs: Vec<Job>,
    generation: u64,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from loaded jobs, rejecting duplicate ids and zero weights.
    pub fn from_jobs(jobs: Vec<Job>, generation: u64) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for job in &jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(GraphError::DuplicateId(job.id.clone()));
            }
            if job.weight == 0 {
                return Err(GraphError::ZeroWeight(job.id.clone()));
            }
        }
        Ok(Self { jobs, generation })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a mutation made through [`JobGraph::job_mut`].
    pub fn bump(&mut self) {
        self.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Append a job.
    pub fn add(&mut self, job: Job) -> Result<(), GraphError> {
        if job.weight == 0 {
            return Err(GraphError::ZeroWeight(job.id));
        }
        if self.find_by_id(&job.id).is_some() {
            return Err(GraphError::DuplicateId(job.id));
        }
        self.jobs.push(job);
        self.bump();
        Ok(())
    }

    /// Remove jobs by index. All indices are checked first; nothing changes
    /// if any is out of range. Duplicates are ignored. Returns the removed
    /// jobs in queue order.
    pub fn remove(&mut self, indices: &[usize]) -> Result<Vec<Job>, GraphError> {
        let unique = self.checked_indices(indices)?;
        let mut removed = Vec::with_capacity(unique.len());
        for &index in unique.iter().rev() {
            removed.push(self.jobs.remove(index));
        }
        removed.reverse();
        if !removed.is_empty() {
            self.bump();
        }
        Ok(removed)
    }

    pub fn list(&self) -> &[Job] {
        &self.jobs
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&Job> {
        self.jobs.get(index)
    }

    /// Mutable access. Callers must [`bump`](JobGraph::bump) after changing it.
    pub fn job_mut(&mut self, index: usize) -> Option<&mut Job> {
        self.jobs.get_mut(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == id)
    }

    /// Force the given jobs back to waiting. Running jobs are skipped.
    /// Returns how many jobs were reset.
    pub fn reset(&mut self, indices: &[usize]) -> Result<usize, GraphError> {
        let unique = self.checked_indices(indices)?;
        let mut count = 0;
        for index in unique {
            let job = &mut self.jobs[index];
            if job.is_running() {
                continue;
            }
            job.reset();
            count += 1;
        }
        if count > 0 {
            self.bump();
        }
        Ok(count)
    }

    /// Reset every job that is not running.
    pub fn reset_all(&mut self) -> usize {
        let all: Vec<usize> = (0..self.jobs.len()).collect();
        self.reset(&all).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        if !self.jobs.is_empty() {
            self.jobs.clear();
            self.bump();
        }
    }

    /// Return jobs left running by an earlier run to waiting.
    pub fn reset_interrupted(&mut self) -> usize {
        let mut count = 0;
        for job in self.jobs.iter_mut().filter(|j| j.is_running()) {
            job.reset();
            count += 1;
        }
        if count > 0 {
            self.bump();
        }
        count
    }

    pub fn has_waiting(&self) -> bool {
        self.jobs.iter().any(Job::is_waiting)
    }

    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }

    /// Largest weight of any job, or 0 for an empty graph.
    pub fn max_weight(&self) -> u32 {
        self.jobs.iter().map(|j| j.weight).max().unwrap_or(0)
    }

    fn checked_indices(&self, indices: &[usize]) -> Result<BTreeSet<usize>, GraphError> {
        let len = self.jobs.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(GraphError::IndexOutOfRange { index, len });
        }
        Ok(indices.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, weight: u32) -> Job {
        Job::new(vec![name.to_string()], weight, "/tmp")
    }

    fn names(graph: &JobGraph) -> Vec<String> {
        graph.list().iter().map(|j| j.payload[0].clone()).collect()
    }

    fn graph_of(items: &[(&str, u32)]) -> JobGraph {
        let mut graph = JobGraph::new();
        for (name, weight) in items {
            graph.add(job(name, *weight)).unwrap();
        }
        graph
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let mut graph = JobGraph::new();
        let a = job("a", 1);
        let dup = a.clone();
        graph.add(a).unwrap();
        assert!(matches!(graph.add(dup), Err(GraphError::DuplicateId(_))));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_add_rejects_zero_weight() {
        let mut graph = JobGraph::new();
        assert!(matches!(graph.add(job("a", 0)), Err(GraphError::ZeroWeight(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_remove_renumbers_contiguously() {
        let mut graph = graph_of(&[("a", 1), ("b", 1), ("c", 1), ("d", 1)]);
        let removed = graph.remove(&[2, 0, 2]).unwrap();

        assert_eq!(
            removed.iter().map(|j| j.payload[0].as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(names(&graph), vec!["b", "d"]);
        assert_eq!(graph.get(1).unwrap().payload[0], "d");
    }

    #[test]
    fn test_remove_out_of_range_leaves_graph_untouched() {
        let mut graph = graph_of(&[("a", 1), ("b", 1)]);
        let generation = graph.generation();

        let err = graph.remove(&[0, 5]).unwrap_err();
        assert_eq!(err, GraphError::IndexOutOfRange { index: 5, len: 2 });
        assert_eq!(names(&graph), vec!["a", "b"]);
        assert_eq!(graph.generation(), generation);
    }

    #[test]
    fn test_reset_skips_running() {
        let mut graph = graph_of(&[("a", 1), ("b", 1)]);
        graph
            .job_mut(0)
            .unwrap()
            .transition(JobState::Running, None)
            .unwrap();
        graph
            .job_mut(1)
            .unwrap()
            .transition(JobState::Error, Some("boom".into()))
            .unwrap();

        assert_eq!(graph.reset(&[0, 1]).unwrap(), 1);
        assert!(graph.get(0).unwrap().is_running());
        assert!(graph.get(1).unwrap().is_waiting());
        assert!(graph.get(1).unwrap().state_message.is_none());
    }

    #[test]
    fn test_reset_all_and_interrupted() {
        let mut graph = graph_of(&[("a", 1), ("b", 1), ("c", 1)]);
        graph
            .job_mut(0)
            .unwrap()
            .transition(JobState::Running, None)
            .unwrap();
        graph
            .job_mut(2)
            .unwrap()
            .transition(JobState::Error, None)
            .unwrap();

        assert_eq!(graph.reset_all(), 2);
        assert!(graph.get(0).unwrap().is_running());

        assert_eq!(graph.reset_interrupted(), 1);
        assert_eq!(graph.count_in(JobState::Waiting), 3);
    }

    #[test]
    fn test_clear_and_queries() {
        let mut graph = graph_of(&[("a", 1), ("b", 5)]);
        assert!(graph.has_waiting());
        assert_eq!(graph.max_weight(), 5);
        let id = graph.get(1).unwrap().id.clone();
        assert_eq!(graph.position(&id), Some(1));
        assert!(graph.find_by_id(&id).is_some());

        graph.clear();
        assert!(graph.is_empty());
        assert!(!graph.has_waiting());
        assert_eq!(graph.max_weight(), 0);
    }

    #[test]
    fn test_generation_advances_on_mutation() {
        let mut graph = JobGraph::new();
        assert_eq!(graph.generation(), 0);
        graph.add(job("a", 1)).unwrap();
        assert_eq!(graph.generation(), 1);
        graph.reset_interrupted();
        assert_eq!(graph.generation(), 1);
        graph.clear();
        assert_eq!(graph.generation(), 2);
    }

    #[test]
    fn test_from_jobs_rejects_duplicates() {
        let a = job("a", 1);
        let err = JobGraph::from_jobs(vec![a.clone(), a], 3).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateId(_)));

        let graph = JobGraph::from_jobs(vec![job("b", 2)], 7).unwrap();
        assert_eq!(graph.generation(), 7);
    }
}
