//! Same-domain link discovery in reader (Markdown) output.

use std::collections::BTreeSet;

/// Extract up to `max_links` absolute http(s) links from inline `[text](href)` Markdown that
/// stay on `page_url`'s host. Images, fragments-only links, duplicates, and the page itself are skipped.
pub fn same_domain_links(markdown: &str, page_url: &str, max_links: usize) -> Vec<String> {
    if max_links == 0 {
        return Vec::new();
    }
    let Ok(mut base) = url::Url::parse(page_url) else {
        return Vec::new();
    };
    base.set_fragment(None);
    let Some(host) = base.host_str().map(|h| h.to_ascii_lowercase()) else {
        return Vec::new();
    };

    let mut seen = BTreeSet::<String>::new();
    seen.insert(base.to_string());
    let mut out = Vec::new();

    let bytes = markdown.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() && out.len() < max_links {
        if bytes[i] != b'[' {
            i += 1;
            continue;
        }
        let is_image = i > 0 && bytes[i - 1] == b'!';
        // Link text may hold a whole image (`[![alt](src)](href)`), so brackets nest.
        let Some(close_bracket) = matching(bytes, i, b'[', b']') else {
            i += 1;
            continue;
        };
        if close_bracket + 1 >= bytes.len() || bytes[close_bracket + 1] != b'(' {
            i += 1;
            continue;
        }
        let Some(close_paren) = matching(bytes, close_bracket + 1, b'(', b')') else {
            i += 1;
            continue;
        };
        // `[x](href "title")`: the href is the first token.
        let raw = markdown[close_bracket + 2..close_paren]
            .split_whitespace()
            .next()
            .unwrap_or("");
        i = close_paren + 1;

        if is_image || raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let Ok(mut abs) = base.join(raw) else {
            continue;
        };
        if abs.scheme() != "http" && abs.scheme() != "https" {
            continue;
        }
        if abs.host_str().map(|h| h.to_ascii_lowercase()).as_deref() != Some(host.as_str()) {
            continue;
        }
        abs.set_fragment(None);
        let link = abs.to_string();
        if seen.insert(link.clone()) {
            out.push(link);
        }
    }
    out
}

/// Index of the delimiter closing the one at `open`, counting nesting.
fn matching(bytes: &[u8], open: usize, left: u8, right: u8) -> Option<usize> {
    let mut depth = 0usize;
    for (j, &b) in bytes.iter().enumerate().skip(open) {
        if b == left {
            depth += 1;
        } else if b == right {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        }
    }
    None
}
