use std::time::Instant;

use crate::LOG;

/// Request logging through the app's slog logger, in place of tide's
/// built-in log middleware which writes through the `log` crate.
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware;

impl LogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[tide::utils::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        let start = Instant::now();
        let resp = next.run(req).await;
        let status = resp.status();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if status.is_server_error() {
            let error = resp.error().map(|e| e.to_string());
            slog::error!(
                LOG, "request failed";
                "method" => method, "path" => path,
                "status" => status as u16, "elapsed_ms" => elapsed_ms,
                "error" => error,
            );
        } else if status.is_client_error() {
            slog::warn!(
                LOG, "request rejected";
                "method" => method, "path" => path,
                "status" => status as u16, "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => method, "path" => path,
                "status" => status as u16, "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(resp)
    }
}
