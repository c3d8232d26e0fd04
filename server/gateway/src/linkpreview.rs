use std::sync::Arc;
use std::time::Duration;

use room_core::{ChannelId, MsgId, Room, ServerMessage};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_REDIRECTS: usize = 3;

/// First `http(s)://` URL found in free text, or `None`. Only the first
/// match is used (spec §4.4: "first match wins").
pub fn first_url(text: &str) -> Option<&str> {
    for (start, _) in text.match_indices("http") {
        let rest = &text[start..];
        if !(rest.starts_with("http://") || rest.starts_with("https://")) {
            continue;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let candidate = &rest[..end];
        if candidate.len() > "https://".len() {
            return Some(candidate);
        }
    }
    None
}

#[derive(Default)]
struct OgTags {
    title: Option<String>,
    description: Option<String>,
    image: Option<String>,
    site_name: Option<String>,
}

impl OgTags {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.image.is_none() && self.site_name.is_none()
    }
}

/// Minimal scan for `<meta property="og:*" content="...">` tags. Not a full
/// HTML parser — good enough for the well-formed `<head>` OG tags real sites
/// emit, and avoids pulling in a DOM crate for four string lookups.
fn parse_og_tags(body: &str) -> OgTags {
    let mut tags = OgTags::default();
    for meta in body.match_indices("<meta").map(|(i, _)| i) {
        let Some(tag_end) = body[meta..].find('>') else { continue };
        let tag = &body[meta..meta + tag_end];
        let Some(property) = extract_attr(tag, "property").or_else(|| extract_attr(tag, "name")) else { continue };
        let Some(content) = extract_attr(tag, "content") else { continue };
        match property.as_str() {
            "og:title" => tags.title = Some(content),
            "og:description" => tags.description = Some(content),
            "og:image" => tags.image = Some(content),
            "og:site_name" => tags.site_name = Some(content),
            _ => {}
        }
    }
    tags
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let needle = format!("{attr}={quote}");
        if let Some(start) = tag.find(&needle) {
            let rest = &tag[start + needle.len()..];
            if let Some(end) = rest.find(quote) {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

/// Spawns an independent fetch for `url`'s Open-Graph metadata and broadcasts
/// `ServerMessage::LinkPreview` if anything useful came back. Fetch failures
/// and timeouts are logged and otherwise swallowed (spec §4.4/§5).
pub fn spawn_fetch(room: Arc<Room>, url: String, msg_id: MsgId, channel_id: ChannelId) {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "link preview client build failed");
                return;
            }
        };

        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, url, "link preview fetch failed");
                return;
            }
        };

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(error = %e, url, "link preview body read failed");
                return;
            }
        };
        let truncated = &bytes[..bytes.len().min(MAX_BODY_BYTES)];
        let body = String::from_utf8_lossy(truncated);

        let tags = parse_og_tags(&body);
        if tags.is_empty() {
            return;
        }

        room.broadcast_control(
            ServerMessage::LinkPreview {
                msg_id,
                channel_id,
                title: tags.title,
                description: tags.description,
                image: tags.image,
                site_name: tags.site_name,
            },
            None,
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_first_url_in_a_sentence() {
        assert_eq!(first_url("check this out https://example.com/page yeah"), Some("https://example.com/page"));
        assert_eq!(first_url("no links here"), None);
    }

    #[test]
    fn parses_og_meta_tags() {
        let html = r#"<head><meta property="og:title" content="Hello"><meta property="og:image" content="http://x/y.png"></head>"#;
        let tags = parse_og_tags(html);
        assert_eq!(tags.title.as_deref(), Some("Hello"));
        assert_eq!(tags.image.as_deref(), Some("http://x/y.png"));
        assert!(tags.description.is_none());
    }
}
