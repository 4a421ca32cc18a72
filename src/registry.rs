//! C4 — Worker Registry: the process-global mapping from pipeline id to its
//! registered handler (spec.md §4.4).

use crate::executor::Worker;
use crate::job::{CommitPolicy, PipelineMeta};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("pipeline '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("pipeline '{0}' is not registered")]
    NotRegistered(String),
}

struct Entry {
    meta: PipelineMeta,
    worker: Arc<dyn Worker>,
}

/// Process-global registry of pipelines. Registration happens once at
/// startup; there is no unregistration (spec.md §4.4 invariant). Aggregated
/// per-pipeline stats (`getAllStats`) live on [`crate::executor::Executor`],
/// which is the only component holding both the registry and the repository
/// those stats are read from.
#[derive(Default)]
pub struct WorkerRegistry {
    entries: HashMap<String, Entry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        meta: PipelineMeta,
        worker: Arc<dyn Worker>,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&meta.pipeline_id) {
            return Err(RegistryError::AlreadyRegistered(meta.pipeline_id));
        }
        self.entries
            .insert(meta.pipeline_id.clone(), Entry { meta, worker });
        Ok(())
    }

    pub fn get(&self, pipeline_id: &str) -> Option<Arc<dyn Worker>> {
        self.entries.get(pipeline_id).map(|e| e.worker.clone())
    }

    pub fn meta(&self, pipeline_id: &str) -> Option<&PipelineMeta> {
        self.entries.get(pipeline_id).map(|e| &e.meta)
    }

    pub fn is_registered(&self, pipeline_id: &str) -> bool {
        self.entries.contains_key(pipeline_id)
    }

    pub fn commit_policy(&self, pipeline_id: &str) -> CommitPolicy {
        self.meta(pipeline_id)
            .map(|m| m.commit_policy)
            .unwrap_or(CommitPolicy::None)
    }

    pub fn list(&self) -> Vec<&PipelineMeta> {
        self.entries.values().map(|e| &e.meta).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopWorker;

    #[async_trait]
    impl Worker for NoopWorker {
        async fn run(
            &self,
            _payload: Value,
            _ctx: crate::executor::HandlerContext,
        ) -> Result<Value, crate::executor::HandlerError> {
            Ok(Value::Null)
        }
    }

    fn meta(id: &str) -> PipelineMeta {
        PipelineMeta {
            pipeline_id: id.to_string(),
            name: id.to_string(),
            cron_expr: None,
            commit_policy: CommitPolicy::None,
            max_concurrent: 5,
            max_retries: 3,
        }
    }

    #[test]
    fn registers_at_most_once() {
        let mut registry = WorkerRegistry::new();
        registry.register(meta("p1"), Arc::new(NoopWorker)).unwrap();
        let err = registry.register(meta("p1"), Arc::new(NoopWorker)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn get_returns_none_for_unregistered() {
        let registry = WorkerRegistry::new();
        assert!(registry.get("missing").is_none());
    }
}
