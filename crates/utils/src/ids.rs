//! Human-facing identifier formats (§3, §6). `worker_id`/`signal_id` mint the
//! actual primary keys for those two entities; `slug`/`normalize_alnum`/
//! `branch_name` build display-only strings (item displayIds stay separate
//! from their `Uuid` row id).

use chrono::Utc;
use rand::Rng;

const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_alnum(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..ALNUM.len());
            ALNUM[idx] as char
        })
        .collect()
}

/// `worker-<username>-<unixMs>-<4 random alphanum>`
pub fn worker_id(username: &str) -> String {
    let ms = Utc::now().timestamp_millis();
    format!("worker-{username}-{ms}-{}", random_alnum(4))
}

/// `signal-<unixMs>-<4 alphanum>`
pub fn signal_id() -> String {
    let ms = Utc::now().timestamp_millis();
    format!("signal-{ms}-{}", random_alnum(4))
}

/// Lowercases, strips anything but ascii alnum, then truncates to `max_len`
/// non-empty words joined by `-`. Used for branch-name title slugs (§6).
pub fn slug(text: &str, max_len: usize) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();

    let mut out = String::new();
    for word in cleaned.split_whitespace() {
        let candidate = if out.is_empty() {
            word.to_string()
        } else {
            format!("{out}-{word}")
        };
        if candidate.len() > max_len {
            break;
        }
        out = candidate;
    }
    out
}

/// Strips everything but ascii alphanumerics, lowercased — used to normalize a
/// display id into a branch-name-safe fragment (e.g. `SD.37` -> `sd37`).
pub fn normalize_alnum(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// `feature/<username>/<normalized-displayId>-<slug(title,<=30)>`
pub fn branch_name(username: &str, display_id: &str, title: &str) -> String {
    let normalized_id = normalize_alnum(display_id);
    let title_slug = slug(title, 30);
    if title_slug.is_empty() {
        format!("feature/{username}/{normalized_id}")
    } else {
        format!("feature/{username}/{normalized_id}-{title_slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_has_expected_shape() {
        let id = worker_id("alex");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "worker");
        assert_eq!(parts[1], "alex");
        assert_eq!(parts.last().unwrap().len(), 4);
    }

    #[test]
    fn branch_name_matches_spec_example() {
        let name = branch_name("alex", "SD.1", "feature A");
        assert_eq!(name, "feature/alex/sd1-feature-a");
    }

    #[test]
    fn slug_truncates_to_max_len() {
        let s = slug("a very long title that keeps going and going", 10);
        assert!(s.len() <= 10);
    }

    #[test]
    fn normalize_alnum_strips_dots() {
        assert_eq!(normalize_alnum("SD.37"), "sd37");
    }
}
