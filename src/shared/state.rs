use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::ChatProvider;
use crate::notificaciones::Mailer;
use crate::shared::utils::DbPool;
use crate::whatsapp::memoria::MemoriaConversaciones;

#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub config: Arc<AppConfig>,
    pub llm: Arc<dyn ChatProvider>,
    pub memoria: Arc<MemoriaConversaciones>,
    pub mailer: Option<Arc<Mailer>>,
}

impl AppState {
    pub fn new(
        conn: DbPool,
        config: Arc<AppConfig>,
        llm: Arc<dyn ChatProvider>,
        memoria: Arc<MemoriaConversaciones>,
        mailer: Option<Arc<Mailer>>,
    ) -> Self {
        Self {
            conn,
            config,
            llm,
            memoria,
            mailer,
        }
    }
}
