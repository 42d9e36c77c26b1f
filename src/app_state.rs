use std::sync::Arc;

use crate::services::{ingress::IngressService, queue::DispatchQueue, store::ResultStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<IngressService>,
    pub store: Arc<dyn ResultStore>,
    pub queue: Arc<dyn DispatchQueue>,
}

impl AppState {
    pub fn new(ingress: IngressService, store: Arc<dyn ResultStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self {
            ingress: Arc::new(ingress),
            store,
            queue,
        }
    }
}
