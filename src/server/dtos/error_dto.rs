use axum::http::StatusCode;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

impl ErrorBody {
    pub fn new(status: StatusCode, error: String) -> Self {
        Self {
            error,
            status: status.as_u16(),
        }
    }

    /// small standalone page, the message is escaped since upstream hosts end up in it
    pub fn to_html(&self) -> String {
        let escaped = self
            .error
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;");

        format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Proxy error {status}</title></head>\n\
             <body style=\"background:#1a1a2e;color:#fff;font-family:Arial;\">\n\
             <h2>Failed to load ({status})</h2>\n<p>{escaped}</p>\n</body>\n</html>\n",
            status = self.status,
        )
    }
}
