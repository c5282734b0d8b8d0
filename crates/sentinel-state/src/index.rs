//! Bounded history plus in-flight cache shared by the store implementations.

use std::collections::HashMap;

use crate::schema::{PipelineRun, RunId};

#[derive(Debug)]
pub(crate) struct RunIndex {
    /// Most recent first, never longer than `cap`.
    history: Vec<PipelineRun>,
    active: HashMap<RunId, PipelineRun>,
    cap: usize,
}

impl RunIndex {
    pub(crate) fn new(mut history: Vec<PipelineRun>, cap: usize) -> Self {
        let cap = cap.max(1);
        history.truncate(cap);
        Self {
            history,
            active: HashMap::new(),
            cap,
        }
    }

    pub(crate) fn insert(&mut self, run: PipelineRun) {
        self.track(&run);
        self.history.retain(|r| r.id != run.id);
        self.history.insert(0, run);
        self.history.truncate(self.cap);
    }

    pub(crate) fn update(&mut self, run: PipelineRun) {
        self.track(&run);
        if let Some(slot) = self.history.iter_mut().find(|r| r.id == run.id) {
            *slot = run;
        }
    }

    pub(crate) fn get(&self, id: &RunId) -> Option<&PipelineRun> {
        self.active
            .get(id)
            .or_else(|| self.history.iter().find(|r| &r.id == id))
    }

    pub(crate) fn list(&self, limit: usize) -> Vec<PipelineRun> {
        self.history.iter().take(limit).cloned().collect()
    }

    pub(crate) fn latest(&self) -> Option<&PipelineRun> {
        self.history.first()
    }

    pub(crate) fn in_flight(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.active.keys().cloned().collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }

    pub(crate) fn history(&self) -> &[PipelineRun] {
        &self.history
    }

    fn track(&mut self, run: &PipelineRun) {
        if run.is_in_flight() {
            self.active.insert(run.id.clone(), run.clone());
        } else {
            self.active.remove(&run.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PipelineStatus;

    fn run() -> PipelineRun {
        PipelineRun::new(None, "main", None, None, "tester")
    }

    #[test]
    fn test_insert_caps_history() {
        let mut index = RunIndex::new(Vec::new(), 3);
        let mut last = None;
        for _ in 0..5 {
            let r = run();
            last = Some(r.id.clone());
            index.insert(r);
        }
        assert_eq!(index.history().len(), 3);
        assert_eq!(index.latest().map(|r| r.id.clone()), last);
    }

    #[test]
    fn test_terminal_update_leaves_active_cache() {
        let mut index = RunIndex::new(Vec::new(), 10);
        let mut r = run();
        index.insert(r.clone());
        assert_eq!(index.in_flight(), vec![r.id.clone()]);

        r.start().unwrap();
        r.finish(PipelineStatus::Success).unwrap();
        index.update(r.clone());

        assert!(index.in_flight().is_empty());
        assert_eq!(index.get(&r.id).unwrap().status, PipelineStatus::Success);
    }

    #[test]
    fn test_evicted_in_flight_run_still_reachable() {
        let mut index = RunIndex::new(Vec::new(), 1);
        let mut old = run();
        index.insert(old.clone());
        index.insert(run());

        old.start().unwrap();
        index.update(old.clone());

        assert_eq!(index.history().len(), 1);
        assert_ne!(index.latest().unwrap().id, old.id);
        assert_eq!(index.get(&old.id).unwrap().status, PipelineStatus::Running);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let mut index = RunIndex::new(Vec::new(), 0);
        index.insert(run());
        assert_eq!(index.history().len(), 1);
    }
}
