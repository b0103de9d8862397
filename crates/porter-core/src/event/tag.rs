//! Event tags.

use serde::{Deserialize, Serialize};

use crate::domain::UploadedMedia;

/// One tag: a non-empty list of strings, name first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    /// First value after the name.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn hashtag(word: impl Into<String>) -> Self {
        Self::new(["t".to_string(), word.into()])
    }

    pub fn identifier(d: impl Into<String>) -> Self {
        Self::new(["d".to_string(), d.into()])
    }

    pub fn public_key(hex: impl Into<String>) -> Self {
        Self::new(["p".to_string(), hex.into()])
    }

    pub fn expiration(at: u64) -> Self {
        Self::new(["expiration".to_string(), at.to_string()])
    }

    /// Inline media metadata: `["imeta", "url ..", "m ..", "x ..", "size ..", "dim WxH"?, "duration .."?]`.
    pub fn imeta(media: &UploadedMedia) -> Self {
        let mut parts = vec![
            "imeta".to_string(),
            format!("url {}", media.url),
            format!("m {}", media.mime),
            format!("x {}", media.sha256),
            format!("size {}", media.size),
        ];
        if let Some((w, h)) = media.dimensions {
            parts.push(format!("dim {w}x{h}"));
        }
        if let Some(d) = media.duration {
            parts.push(format!("duration {d}"));
        }
        Self(parts)
    }

    /// The value of an `imeta` field, e.g. `imeta_field("x")`.
    pub fn imeta_field(&self, key: &str) -> Option<&str> {
        if self.name() != "imeta" {
            return None;
        }
        self.0.iter().skip(1).find_map(|entry| {
            entry
                .split_once(' ')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Look up the first tag named `name` and return its value.
pub fn find_value<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter().find(|t| t.name() == name).and_then(Tag::value)
}

/// `#word` hashtags in `text`, lowercased, deduplicated, first-seen order.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '#' {
            continue;
        }
        // a '#' glued to a preceding word ("C#", "a#b") is not a hashtag
        if let Some(prev) = text[..i].chars().next_back()
            && (prev.is_alphanumeric() || prev == '_')
        {
            continue;
        }
        let mut word = String::new();
        while let Some(&(_, next)) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                word.extend(next.to_lowercase());
                chars.next();
            } else {
                break;
            }
        }
        if !word.is_empty() && !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MediaKind;

    #[test]
    fn imeta_carries_optional_fields_only_when_known() {
        let mut media = UploadedMedia {
            url: "https://blossom.example/ab.jpg".into(),
            sha256: "ab".repeat(32),
            size: 1234,
            mime: "image/jpeg".into(),
            kind: MediaKind::Image,
            dimensions: None,
            duration: None,
        };
        let tag = Tag::imeta(&media);
        assert_eq!(tag.as_slice().len(), 5);
        assert_eq!(tag.imeta_field("size"), Some("1234"));

        media.dimensions = Some((1080, 1350));
        let tag = Tag::imeta(&media);
        assert_eq!(tag.imeta_field("dim"), Some("1080x1350"));
        assert_eq!(tag.imeta_field("x"), Some(media.sha256.as_str()));
    }

    #[test]
    fn hashtags_are_lowercased_and_deduplicated() {
        assert_eq!(
            extract_hashtags("Sunset #Beach #sunset, #beach again #日本 C#"),
            vec!["beach", "sunset", "日本"]
        );
    }

    #[test]
    fn lone_hash_is_ignored() {
        assert!(extract_hashtags("# heading and #").is_empty());
    }

    #[test]
    fn tags_serialize_as_string_arrays() {
        let tags = vec![Tag::hashtag("beach"), Tag::expiration(10)];
        assert_eq!(
            serde_json::to_string(&tags).unwrap(),
            r#"[["t","beach"],["expiration","10"]]"#
        );
        assert_eq!(find_value(&tags, "expiration"), Some("10"));
    }
}
