/// Text processing utilities
pub mod text {
    use scraper::Html;

    /// Strip markup and decode entities, collapsing whitespace.
    pub fn html_to_text(html: &str) -> String {
        if !html.contains('<') && !html.contains('&') {
            return collapse_whitespace(html);
        }
        let fragment = Html::parse_fragment(html);
        let text: Vec<&str> = fragment.root_element().text().collect();
        collapse_whitespace(&text.join(" "))
    }

    pub fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Cut `text` to at most `max_chars` characters, preferring the last word
    /// boundary. Returns the cut text and whether anything was removed.
    pub fn truncate_at_word_boundary(text: &str, max_chars: usize) -> (String, bool) {
        if text.chars().count() <= max_chars {
            return (text.to_string(), false);
        }

        let cut_byte = text
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        let head = &text[..cut_byte];

        // A boundary in the first half would throw away too much; cut mid-word then
        let truncated = match head.rfind(char::is_whitespace) {
            Some(space) if space >= head.len() / 2 => head[..space].trim_end(),
            _ => head.trim_end(),
        };
        (truncated.to_string(), true)
    }

    /// Short preview with an ellipsis when cut.
    pub fn excerpt(text: &str, max_chars: usize) -> String {
        match truncate_at_word_boundary(text, max_chars) {
            (cut, true) => format!("{}...", cut),
            (whole, false) => whole,
        }
    }
}

/// URL utilities
pub mod url {
    use sha2::{Digest, Sha256};
    use url::Url;

    pub fn is_http_url(url_str: &str) -> bool {
        Url::parse(url_str)
            .map(|url| url.scheme() == "http" || url.scheme() == "https")
            .unwrap_or(false)
    }

    /// Normalize a feed link so cosmetic differences map to one identity:
    /// lowercase scheme and host, no fragment, no `utm_*` tracking
    /// parameters, no trailing slash on the path.
    pub fn canonicalize_link(link: &str) -> String {
        let trimmed = link.trim();
        let Ok(mut url) = Url::parse(trimmed) else {
            return trimmed.to_string();
        };

        url.set_fragment(None);

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !k.to_ascii_lowercase().starts_with("utm_"))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        let path = url.path().to_string();
        if path.len() > 1 && path.ends_with('/') {
            url.set_path(path.trim_end_matches('/'));
        }

        // Url already lowercases scheme and host
        url.to_string()
    }

    /// Stable id for a feed entry: SHA-256 of its canonical link.
    pub fn link_id(link: &str) -> String {
        let digest = Sha256::digest(canonicalize_link(link).as_bytes());
        hex::encode(digest)
    }
}

/// Time utilities
pub mod time {
    use chrono::Duration;

    /// Reddit `t=` filter covering the lookback.
    pub fn reddit_time_filter(lookback: Duration) -> &'static str {
        if lookback <= Duration::hours(1) {
            "hour"
        } else if lookback <= Duration::days(1) {
            "day"
        } else if lookback <= Duration::weeks(1) {
            "week"
        } else if lookback <= Duration::days(31) {
            "month"
        } else {
            "year"
        }
    }

    /// GitHub trending `since=` range covering the lookback.
    pub fn github_since(lookback: Duration) -> &'static str {
        if lookback <= Duration::days(1) {
            "daily"
        } else if lookback <= Duration::weeks(1) {
            "weekly"
        } else {
            "monthly"
        }
    }
}
