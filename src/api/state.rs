use crate::events::EventBus;
use crate::executor::Executor;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub events: Arc<EventBus>,
    pub api_key: Option<String>,
}
