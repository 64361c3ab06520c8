use async_trait::async_trait;
use tracing::warn;

use super::webhook::format_flag;
use super::{FlagKind, Notifier};

/// Notifier that only writes the flag to the log
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, agent_id: &str, flag: FlagKind, details: &str) -> Result<(), String> {
        warn!(agent_id, flag = %flag, "{}", format_flag(agent_id, flag, details));
        Ok(())
    }
}
