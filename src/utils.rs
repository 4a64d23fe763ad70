use std::sync::OnceLock;

use anyhow::{Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use regex::Regex;

pub fn escape_xml(input: &str) -> String {
    let mut escaped = String::new();
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn data_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^data:([A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*/[A-Za-z0-9!#$&^_.+-]+);base64,(.*)$")
            .expect("data uri pattern is valid")
    })
}

/// Embeds raw image bytes as a self-contained `data:` URI.
pub fn encode_data_uri(mime_type: &str, data: &[u8]) -> Result<String> {
    let mime_type = mime_type.trim();
    if !mime_type.starts_with("image/") {
        bail!("unsupported mime type '{mime_type}', expected an image");
    }
    if data.is_empty() {
        bail!("image payload cannot be empty");
    }
    Ok(format!(
        "data:{mime_type};base64,{}",
        BASE64_STANDARD.encode(data)
    ))
}

/// Splits a base64 `data:` URI back into its mime type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let captures = data_uri_pattern()
        .captures(uri.trim())
        .ok_or_else(|| anyhow!("not a base64 data uri"))?;
    let mime_type = captures[1].to_string();
    let data = BASE64_STANDARD
        .decode(captures[2].as_bytes())
        .map_err(|err| anyhow!("invalid base64 payload: {err}"))?;
    Ok((mime_type, data))
}
