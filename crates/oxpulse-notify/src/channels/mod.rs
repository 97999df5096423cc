pub mod dingtalk;
pub mod email;
pub mod slack;
pub mod webhook;

use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};

/// Reads the response body, mapping non-2xx statuses to [`NotifyError::Api`].
pub(crate) async fn read_success_body(service: &str, resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = match resp.text().await {
        Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
        Err(e) => format!("[Failed to read response body: {e}]"),
    };
    if status.is_success() {
        Ok(body)
    } else {
        Err(NotifyError::Api {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}
