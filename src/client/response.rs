//! Response bodies resolved once at the transport boundary.
//!
//! Callers never sniff `Content-Type` themselves; a response is a tagged
//! union decided here and nowhere else.

use reqwest::header;

use crate::common::ApiError;

#[derive(Debug)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
    /// Unconsumed response for streamed archive bodies.
    Binary(reqwest::Response),
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ResponseBody {
    pub async fn resolve(resp: reqwest::Response) -> Result<Self, ApiError> {
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let value = resp.json().await.map_err(ApiError::from_reqwest)?;
            Ok(ResponseBody::Json(value))
        } else if content_type.starts_with("text/") || content_type.is_empty() {
            let text = resp.text().await.map_err(ApiError::from_reqwest)?;
            Ok(ResponseBody::Text(text))
        } else {
            Ok(ResponseBody::Binary(resp))
        }
    }

    pub fn into_json(self) -> Result<serde_json::Value, ApiError> {
        match self {
            ResponseBody::Json(value) => Ok(value),
            ResponseBody::Text(text) => Err(ApiError::Validation(format!(
                "expected JSON body, got text: {}",
                truncate(&text)
            ))),
            ResponseBody::Binary(_) => {
                Err(ApiError::Validation("expected JSON body, got bytes".to_string()))
            }
        }
    }

    pub fn into_text(self) -> Result<String, ApiError> {
        match self {
            ResponseBody::Text(text) => Ok(text),
            ResponseBody::Json(value) => Ok(value.to_string()),
            ResponseBody::Binary(_) => {
                Err(ApiError::Validation("expected text body, got bytes".to_string()))
            }
        }
    }
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
