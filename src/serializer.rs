use std::future::Future;
use tokio::sync::Mutex;

/// Global exclusivity gate for commands against the debuggee.
///
/// Frame and thread ids handed out by a paused target are only valid until the next resume, so
/// no two tool calls may interleave. Waiters are served in arrival order (the tokio mutex is
/// fair), the gate is released when the wrapped future finishes, fails or is dropped.
#[derive(Default)]
pub struct RequestSerializer {
    gate: Mutex<()>,
}

impl RequestSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.gate.lock().await;
        f().await
    }
}
