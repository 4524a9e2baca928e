//! Contexto compartilhado, construído uma vez no `main` e passado a cada
//! componente.

use crate::publisher::SnapshotPublisher;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct AppContext {
    pub publisher: Arc<SnapshotPublisher>,
    pub shutdown: ShutdownSignal,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }
}
