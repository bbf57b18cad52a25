//! Inline image resolution for extracted HTML bodies.
//!
//! Two rewrites over `<img src="…">` attributes:
//!
//! 1. `cid:` references are resolved against the message's attachment pool
//!    and replaced with self-contained `data:` URIs.
//! 2. Optionally, `http(s)://` references are fetched and inlined the same
//!    way, with SSRF defenses: host-name deny list, resolved-address
//!    classification, and a resolver that dials only vetted addresses so
//!    DNS cannot rebind between check and connect. Redirect targets pass
//!    through the same resolver.
//!
//! This is a targeted rewrite of one literal attribute shape, not an HTML
//! parser.

use std::collections::HashMap;
use std::io::Read;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lazy_static::lazy_static;
use regex::bytes::{Captures, Regex};
use tracing::{debug, warn};

use crate::model::attachment::{Attachment, Disposition};

/// Largest external image the resolver will inline.
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// End-to-end budget for one external fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    static ref IMG_SRC: Regex =
        Regex::new(r#"(?i-u)(<img\b[^>]*?\bsrc=")([^"]+)(")"#).expect("static regex");
}

/// Replace `cid:` image references with `data:` URIs from the attachment
/// pool. Matched attachments are marked [`Disposition::Inline`]; unmatched
/// references are left untouched.
pub fn resolve_cid_images(html: &[u8], attachments: &mut [Attachment]) -> Vec<u8> {
    IMG_SRC
        .replace_all(html, |caps: &Captures<'_>| {
            let src = String::from_utf8_lossy(&caps[2]);
            let Some(rest) = strip_prefix_ignore_case(&src, "cid:") else {
                return caps[0].to_vec();
            };
            let wanted = rest.trim().trim_matches(|c| c == '<' || c == '>').to_lowercase();

            let Some(att) = attachments
                .iter_mut()
                .find(|a| a.normalized_content_id().as_deref() == Some(wanted.as_str()))
            else {
                debug!(cid = %wanted, "No attachment for cid reference");
                return caps[0].to_vec();
            };

            att.disposition = Disposition::Inline;
            let uri = data_uri(&attachment_mime(att), &att.bytes);
            splice(caps, uri.as_bytes())
        })
        .into_owned()
}

/// Fetch and inline `http(s)://` image references.
///
/// The caller owns `cache`, mapping each URL to its data URI (or to an
/// empty string for a failed fetch) so one URL is fetched at most once
/// across calls. Failures of any kind leave the original `src` in place.
pub fn inline_external_images(html: &[u8], cache: &mut HashMap<String, String>) -> Vec<u8> {
    let mut agent: Option<ureq::Agent> = None;

    IMG_SRC
        .replace_all(html, |caps: &Captures<'_>| {
            let src = String::from_utf8_lossy(&caps[2]).into_owned();
            if !src.starts_with("http://") && !src.starts_with("https://") {
                return caps[0].to_vec();
            }

            if !cache.contains_key(&src) {
                let agent = agent.get_or_insert_with(build_agent);
                let uri = match fetch_image(agent, &src) {
                    Some((data, mime)) => data_uri(&mime, &data),
                    None => String::new(),
                };
                cache.insert(src.clone(), uri);
            }

            match cache.get(&src).map(String::as_str) {
                Some("") | None => caps[0].to_vec(),
                Some(uri) => splice(caps, uri.as_bytes()),
            }
        })
        .into_owned()
}

/// Rebuild a match with a new `src` value.
fn splice(caps: &Captures<'_>, new_src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(caps[1].len() + new_src.len() + 1);
    out.extend_from_slice(&caps[1]);
    out.extend_from_slice(new_src);
    out.extend_from_slice(&caps[3]);
    out
}

fn data_uri(mime: &str, data: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(data))
}

/// MIME type for a cid-matched attachment: the sender's tag, then the file
/// extension, then a generic fallback.
fn attachment_mime(att: &Attachment) -> String {
    if let Some(tag) = &att.mime_tag {
        return tag.clone();
    }
    let lower = att.best_name().to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(FETCH_TIMEOUT)
        .resolver(GuardedResolver)
        .build()
}

fn fetch_image(agent: &ureq::Agent, url: &str) -> Option<(Vec<u8>, String)> {
    // Deny-listed names never reach DNS; everything else is classified
    // again, post-resolution, inside the resolver.
    let host = host_of(url)?;
    if is_blocked_host(&host) {
        warn!(url = url, "Blocked image host");
        return None;
    }

    let response = match agent.get(url).call() {
        Ok(r) => r,
        Err(e) => {
            debug!(url = url, error = %e, "Image fetch failed");
            return None;
        }
    };

    let content_type = response.content_type().to_string();
    if !content_type.starts_with("image/") {
        return None;
    }

    let mut data = Vec::new();
    response
        .into_reader()
        .take(MAX_IMAGE_BYTES as u64 + 1)
        .read_to_end(&mut data)
        .ok()?;
    if data.is_empty() || data.len() > MAX_IMAGE_BYTES {
        return None;
    }

    Some((data, image_content_type(&content_type).to_string()))
}

/// Normalize a response content type onto the known image set.
fn image_content_type(ct: &str) -> &'static str {
    let ct = ct.to_lowercase();
    if ct.contains("png") {
        "image/png"
    } else if ct.contains("jpeg") || ct.contains("jpg") {
        "image/jpeg"
    } else if ct.contains("gif") {
        "image/gif"
    } else if ct.contains("webp") {
        "image/webp"
    } else if ct.contains("svg") {
        "image/svg+xml"
    } else if ct.contains("bmp") {
        "image/bmp"
    } else {
        "image/png"
    }
}

/// Extract the host from an http(s) URL: scheme and userinfo stripped,
/// port and path dropped, IPv6 brackets removed.
fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        host_port.split(':').next()?
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Known-internal host names that must never be fetched.
pub(crate) fn is_blocked_host(host: &str) -> bool {
    let host = host.to_lowercase();
    if host == "localhost"
        || host == "metadata.google.internal"
        || host.ends_with(".internal")
        || host.ends_with(".local")
    {
        return true;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_blocked_ip(ip);
    }
    false
}

/// Classify an address as unroutable-from-here: loopback, private
/// (RFC 1918 / RFC 4193), link-local, unspecified, or multicast.
pub(crate) fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_multicast()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(mapped));
            }
            let seg = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (seg[0] & 0xfe00) == 0xfc00 // unique-local fc00::/7
                || (seg[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
        }
    }
}

/// Resolver that vets every resolved address before ureq dials it.
///
/// Because the vetted addresses are what gets connected to, a host cannot
/// re-resolve to something private between check and connect, and every
/// redirect target is re-vetted on its own connection.
struct GuardedResolver;

impl ureq::Resolver for GuardedResolver {
    fn resolve(&self, netloc: &str) -> std::io::Result<Vec<SocketAddr>> {
        let host = netloc_host(netloc);
        if is_blocked_host(&host) {
            return Err(blocked(&host));
        }
        let addrs: Vec<SocketAddr> = netloc.to_socket_addrs()?.collect();
        if addrs.is_empty() || addrs.iter().any(|a| is_blocked_ip(a.ip())) {
            return Err(blocked(&host));
        }
        Ok(addrs)
    }
}

fn netloc_host(netloc: &str) -> String {
    let host = if let Some(bracketed) = netloc.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        netloc.rsplit_once(':').map(|(h, _)| h).unwrap_or(netloc)
    };
    host.to_lowercase()
}

fn blocked(host: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("blocked host: {host}"),
    )
}
