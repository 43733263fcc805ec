//! Mock implementations of the external collaborator traits
//!
//! Repositories are covered by the in-memory implementations in
//! `archivist-infrastructure`; only the transport and the event publisher
//! need test doubles.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use archivist_core::{SchedulerError, SchedulerResult};
use archivist_domain::entities::DispatchTask;
use archivist_domain::events::SchedulerEvent;
use archivist_domain::ports::{AnalystTransport, EventPublisher};

/// Mock transport that records every call
#[derive(Debug, Clone, Default)]
pub struct MockAnalystTransport {
    dispatched: Arc<Mutex<Vec<(String, DispatchTask)>>>,
    killed: Arc<Mutex<Vec<(String, Uuid)>>>,
    failing_endpoints: Arc<Mutex<HashSet<String>>>,
}

impl MockAnalystTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dispatch to `endpoint` fail
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing_endpoints
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn recover_endpoint(&self, endpoint: &str) {
        self.failing_endpoints.lock().unwrap().remove(endpoint);
    }

    pub fn dispatched(&self) -> Vec<(String, DispatchTask)> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatched_to(&self, endpoint: &str) -> Vec<DispatchTask> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn killed(&self) -> Vec<(String, Uuid)> {
        self.killed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalystTransport for MockAnalystTransport {
    async fn dispatch(&self, endpoint: &str, task: &DispatchTask) -> SchedulerResult<()> {
        if self.failing_endpoints.lock().unwrap().contains(endpoint) {
            return Err(SchedulerError::Transport(format!(
                "mock endpoint {endpoint} unreachable"
            )));
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((endpoint.to_string(), task.clone()));
        Ok(())
    }

    async fn kill_task(&self, endpoint: &str, task_id: Uuid, _reason: &str) -> SchedulerResult<()> {
        self.killed
            .lock()
            .unwrap()
            .push((endpoint.to_string(), task_id));
        Ok(())
    }
}

/// Event publisher that keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<SchedulerEvent>>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: SchedulerEvent) -> SchedulerResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
