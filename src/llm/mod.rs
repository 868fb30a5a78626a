//! Narrow request/response contract for the AI collaborators (semantic filter and
//! reasoning). Providers sit behind [`Llm`] so the pipeline can be tested with mocks.

pub mod chat;

use async_trait::async_trait;

use crate::error::Result;

pub use chat::ChatClient;

#[async_trait]
pub trait Llm: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Send a system + user prompt and return the generated text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Slice out the first top-level JSON array in free text (models often wrap JSON in prose
/// or code fences).
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_between(text, b'[', b']')
}

/// Slice out the first top-level JSON object in free text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_between(text, b'{', b'}')
}

fn extract_between(text: &str, open: u8, close: u8) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
