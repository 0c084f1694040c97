//! Per-job cancellation tokens, with group cascading for `execute_batch`'s
//! `fail_fast` mode (cancelling every other in-flight item in the batch).

use std::collections::HashMap;
use std::sync::Arc;

use cps_capabilities::CancelToken;
use parking_lot::RwLock;

#[derive(Default)]
pub struct CancelMap {
    tokens: RwLock<HashMap<String, CancelToken>>,
    groups: RwLock<HashMap<String, Vec<String>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.write().insert(job_id.to_string(), token.clone());
        token
    }

    pub fn get(&self, job_id: &str) -> Option<CancelToken> {
        self.tokens.read().get(job_id).cloned()
    }

    pub fn remove(&self, job_id: &str) {
        self.tokens.write().remove(job_id);
        let mut groups = self.groups.write();
        for members in groups.values_mut() {
            members.retain(|id| id != job_id);
        }
        groups.retain(|_, members| !members.is_empty());
    }

    /// Signal cancellation for a single job. Idempotent.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.tokens.read().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn add_to_group(&self, group: &str, job_id: &str) {
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .push(job_id.to_string());
    }

    /// Cancel every job registered under `group`.
    pub fn cancel_group(&self, group: &str) {
        if let Some(members) = self.groups.read().get(group) {
            let tokens = self.tokens.read();
            for id in members {
                if let Some(token) = tokens.get(id) {
                    token.cancel();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel_roundtrip() {
        let map = CancelMap::new();
        let token = map.register("job_1");
        assert!(!token.is_cancelled());
        assert!(map.cancel("job_1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_job_is_noop_not_error() {
        let map = CancelMap::new();
        assert!(!map.cancel("nope"));
    }

    #[test]
    fn cancel_group_cascades_to_all_members() {
        let map = CancelMap::new();
        let a = map.register("a");
        let b = map.register("b");
        map.add_to_group("batch_1", "a");
        map.add_to_group("batch_1", "b");
        map.cancel_group("batch_1");
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn remove_cleans_up_group_membership() {
        let map = CancelMap::new();
        map.register("a");
        map.add_to_group("g", "a");
        map.remove("a");
        assert!(map.groups.read().get("g").is_none());
    }
}
