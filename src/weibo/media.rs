//! URL and naming helpers for Weibo media.

use chrono::{DateTime, Datelike};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use rand::Rng;
use regex::Regex;
use url::Url;

/// Interchangeable origins serving the same large images.
pub const MIRROR_HOSTS: [&str; 3] = ["wx1.sinaimg.cn", "wx2.sinaimg.cn", "wx3.sinaimg.cn"];

/// Origin used to resolve relative video references.
pub const WEB_ORIGIN: &str = "https://weibo.com";

pub const DEFAULT_VIDEO_EXT: &str = ".mp4";

static VIDEO_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.([a-z0-9]{2,5})$").expect("Invalid video extension regex"));

static ACCOUNT_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/u/(\d+)/?$").expect("Invalid account path regex"));

/// Picks one mirror host at random.
pub fn pick_mirror_host() -> &'static str {
    let index = rand::thread_rng().gen_range(0..MIRROR_HOSTS.len());
    MIRROR_HOSTS[index]
}

pub fn image_url(host: &str, photo_id: &str) -> String {
    format!("https://{}/large/{}.jpg", host, photo_id)
}

/// Returns the mirror host an image URL points at, if it is one of ours.
pub fn mirror_host_of(url: &str) -> Option<&'static str> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    MIRROR_HOSTS.iter().copied().find(|candidate| *candidate == host)
}

/// Turns a motion-photo video reference into a direct URL.
///
/// References either point at the clip directly or wrap it in a `livephoto`
/// query parameter. Relative references resolve against the web origin and
/// anything unparseable is returned unchanged.
pub fn normalize_video_url(reference: &str) -> String {
    let reference = reference.trim();
    if reference.is_empty() {
        return String::new();
    }

    let Ok(base) = Url::parse(WEB_ORIGIN) else {
        return reference.to_string();
    };
    let Ok(parsed) = base.join(reference) else {
        return reference.to_string();
    };

    if let Some((_, wrapped)) = parsed.query_pairs().find(|(key, _)| key == "livephoto") {
        if !wrapped.is_empty() {
            // The wrapped value is itself percent-encoded once more.
            return percent_decode_str(&wrapped)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| wrapped.into_owned());
        }
    }

    parsed.to_string()
}

/// Guesses a file extension (with leading dot) from a video URL path.
pub fn guess_video_ext(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            VIDEO_EXT
                .captures(parsed.path())
                .map(|caps| format!(".{}", caps[1].to_ascii_lowercase()))
        })
        .unwrap_or_else(|| DEFAULT_VIDEO_EXT.to_string())
}

/// Parses a status `created_at` value such as
/// `Tue Mar 05 12:00:00 +0800 2024` into a `(year, month)` pair with a
/// zero-padded month. The leading weekday is ignored, even when it does not
/// match the date.
pub fn parse_created_at(created_at: &str) -> Option<(String, String)> {
    let (_weekday, rest) = created_at.trim().split_once(' ')?;
    let parsed = DateTime::parse_from_str(rest.trim_start(), "%b %d %H:%M:%S %z %Y").ok()?;
    Some((parsed.year().to_string(), format!("{:02}", parsed.month())))
}

/// Extracts the numeric account id from either a bare id or a profile URL
/// like `https://weibo.com/u/1234567890?tabtype=album`.
pub fn parse_account_id(input: &str) -> Option<String> {
    let input = input.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return Some(input.to_string());
    }

    let parsed = Url::parse(input).ok()?;
    ACCOUNT_PATH
        .captures(parsed.path())
        .map(|caps| caps[1].to_string())
}
