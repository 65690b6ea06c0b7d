//! Normalizes a mail thread into one markdown document: subject heading,
//! per-message From/To/Cc/Date header block, plain-text body (HTML fallback
//! stripped), and an attachments list.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;

use crate::gmail::models::{Message, MessagePart, Thread};

pub fn thread_to_markdown(thread: &Thread) -> String {
    if thread.messages.is_empty() {
        return String::new();
    }

    let subject = message_header(&thread.messages[0], "Subject").unwrap_or("(No Subject)");
    let mut parts: Vec<String> = vec![format!("# {subject}\n")];

    for (i, msg) in thread.messages.iter().enumerate() {
        let from = message_header(msg, "From").unwrap_or("Unknown");
        parts.push(format!("**From:** {from}"));
        if let Some(to) = message_header(msg, "To") {
            parts.push(format!("**To:** {to}"));
        }
        if let Some(cc) = message_header(msg, "Cc") {
            parts.push(format!("**Cc:** {cc}"));
        }
        if let Some(date) = message_header(msg, "Date") {
            parts.push(format!("**Date:** {date}"));
        }
        parts.push(String::new());

        let body = message_body(msg);
        if !body.is_empty() {
            parts.push(body);
        }

        let attachments = list_attachments(msg);
        if !attachments.is_empty() {
            parts.push("\n**Attachments:**".to_string());
            for att in attachments {
                parts.push(format!("- {att}"));
            }
        }

        if i + 1 < thread.messages.len() {
            parts.push("\n---\n".to_string());
        }
    }

    parts.join("\n")
}

/// Extract a header value from a message, case-insensitive on the name.
pub fn message_header<'a>(message: &'a Message, name: &str) -> Option<&'a str> {
    let payload = message.payload.as_ref()?;
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Convert text to a URL-friendly slug for filenames.
pub fn slugify(text: &str, max_length: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.trim().to_lowercase().chars() {
        if c.is_alphanumeric() || c == '_' {
            slug.push(c);
            last_dash = false;
        } else if (c.is_whitespace() || c == '-') && !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.truncate(max_length);
    slug.trim_matches('-').to_string()
}

fn message_body(message: &Message) -> String {
    let Some(payload) = message.payload.as_ref() else {
        return String::new();
    };

    // Simple message with the body inline
    if payload.mime_type == "text/plain" {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_body(data);
        }
    }

    // Multipart message: walk the MIME tree
    find_text_in_parts(&payload.parts)
}

/// Recursively find text/plain content in MIME parts, falling back to
/// stripped text/html if no plain part exists.
fn find_text_in_parts(parts: &[MessagePart]) -> String {
    let mut plain_text = String::new();
    let mut html_text = String::new();

    for part in parts {
        if !part.parts.is_empty() {
            let nested = find_text_in_parts(&part.parts);
            if !nested.is_empty() {
                return nested;
            }
        }

        let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) else {
            continue;
        };
        let decoded = decode_body(data);

        if part.mime_type == "text/plain" {
            plain_text = decoded;
        } else if part.mime_type == "text/html" && html_text.is_empty() {
            html_text = decoded;
        }
    }

    if !plain_text.is_empty() {
        return plain_text;
    }
    if !html_text.is_empty() {
        return strip_html(&html_text);
    }
    String::new()
}

fn decode_body(data: &str) -> String {
    let bytes = match URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')) {
        Ok(b) => b,
        Err(_) => return String::new(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Rough HTML tag stripper for fallback text extraction.
fn strip_html(html: &str) -> String {
    let blocks = Regex::new(r"(?is)<(style|script)[^>]*>.*?</(style|script)>").unwrap();
    let text = blocks.replace_all(html, "");
    let text = Regex::new(r"(?i)<br\s*/?>").unwrap().replace_all(&text, "\n");
    let text = Regex::new(r"(?i)</p>").unwrap().replace_all(&text, "\n\n");
    let text = Regex::new(r"<[^>]+>").unwrap().replace_all(&text, "");
    let text = Regex::new(r"\n{3,}").unwrap().replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn list_attachments(message: &Message) -> Vec<String> {
    let Some(payload) = message.payload.as_ref() else {
        return Vec::new();
    };

    payload
        .parts
        .iter()
        .filter(|part| !part.filename.is_empty())
        .map(|part| {
            let size = part.body.as_ref().map(|b| b.size).unwrap_or(0);
            if size > 0 {
                format!("{} ({:.1} KB)", part.filename, size as f64 / 1024.0)
            } else {
                part.filename.clone()
            }
        })
        .collect()
}
