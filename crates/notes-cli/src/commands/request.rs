//! Raw API access through the authenticated transport.

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use notes_auth::{ApiRequest, AuthRuntime, HttpMethod, TransportError};
use serde_json::Value;

/// Send `method path` with an optional JSON body and print the response.
pub async fn request(
    runtime: &AuthRuntime,
    method: &str,
    path: &str,
    data: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let request = build_request(method, path, data)?;

    match runtime.transport().send(request).await {
        Ok(response) => {
            let text = match response.json::<Value>() {
                Ok(Value::Null) => String::new(),
                Ok(value) => serde_json::to_string_pretty(&value)?,
                Err(_) => response.text(),
            };
            if !text.is_empty() {
                println!("{}", text);
            }
        }
        Err(TransportError::Unauthorized(_)) => {
            output::print_error("Session expired. Run 'notes login' to sign in again", format);
        }
        Err(e) => {
            if let (OutputFormat::Json, Some(api)) = (format, e.api_error()) {
                eprintln!("{}", serde_json::to_string_pretty(api)?);
            } else {
                output::print_error(&e.to_string(), format);
            }
        }
    }

    Ok(())
}

fn build_request(method: &str, path: &str, data: Option<&str>) -> Result<ApiRequest> {
    let method: HttpMethod = method.parse()?;
    let request = ApiRequest::new(method, path.trim_start_matches('/'));
    match data {
        Some(data) => {
            let body: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
            Ok(request.json(&body)?)
        }
        None => Ok(request),
    }
}
