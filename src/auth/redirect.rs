// Login navigation hook

/// Invoked once a session can no longer be renewed
pub trait LoginRedirect: Send + Sync {
    fn redirect(&self, target: &str);
}

/// Default hook: there is no router here, so just report the target
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRedirect;

impl LoginRedirect for LoggingRedirect {
    fn redirect(&self, target: &str) {
        tracing::warn!(target_path = %target, "Session expired, login required");
    }
}
