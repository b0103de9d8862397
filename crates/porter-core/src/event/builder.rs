//! EventBuilder: domain metadata in, unsigned canonical events out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tag::{Tag, extract_hashtags};
use super::timestamp::{created_at, parse_timestamp};
use super::{EventError, Kind, UnsignedEvent};
use crate::crypto::PublicKey;
use crate::domain::{MediaKind, ProfileMetadata, UploadedMedia};

/// Default upload-authorization validity.
pub const UPLOAD_AUTH_WINDOW: Duration = Duration::from_secs(300);

const VIDEO_TITLE_MAX: usize = 100;

/// A media post after its uploads are done.
#[derive(Debug, Clone, Copy)]
pub struct PostInput<'a> {
    pub caption: Option<&'a str>,
    pub original_timestamp: Option<&'a str>,
    pub media: &'a [UploadedMedia],
}

/// Long-form article metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Stable `d` identifier. Keep it once assigned; reusing it makes a
    /// rebuild replace the earlier version instead of creating a new one.
    #[serde(default)]
    pub identifier: Option<String>,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub content: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl Article {
    /// The identifier, assigning one on first use.
    ///
    /// A source slug is normalised; without one a fresh ULID is generated.
    pub fn ensure_identifier(&mut self) -> &str {
        let id = match self.identifier.take() {
            Some(slug) if !slugify(&slug).is_empty() => slugify(&slug),
            _ => ulid::Ulid::new().to_string().to_lowercase(),
        };
        self.identifier.insert(id)
    }
}

/// Builds unsigned events for a single author.
#[derive(Debug, Clone, Copy)]
pub struct EventBuilder {
    author: PublicKey,
}

impl EventBuilder {
    pub fn new(author: PublicKey) -> Self {
        Self { author }
    }

    pub fn author(&self) -> &PublicKey {
        &self.author
    }

    /// Kind 0. Content is the profile JSON with unset fields omitted.
    pub fn profile(
        &self,
        profile: &ProfileMetadata,
        now: DateTime<Utc>,
    ) -> Result<UnsignedEvent, EventError> {
        let content =
            serde_json::to_string(profile).map_err(|e| EventError::Serialize(e.to_string()))?;
        UnsignedEvent::new(self.author, unix(now), Kind::METADATA, Vec::new(), content)
    }

    /// A media post.
    ///
    /// - images only: picture (one `imeta` per image)
    /// - one video: video, or short video when taller than wide
    /// - several items including a video: text note with the URLs inline
    pub fn post(&self, input: &PostInput<'_>, now: DateTime<Utc>) -> Result<UnsignedEvent, EventError> {
        let media = input.media;
        if media.is_empty() {
            return Err(EventError::NoMedia);
        }
        for m in media {
            check_hash(&m.sha256)?;
        }

        let created = created_at(input.original_timestamp, now);
        let caption = input.caption.map(str::trim).unwrap_or_default();
        let all_images = media.iter().all(|m| m.kind == MediaKind::Image);

        let mut tags: Vec<Tag> = media.iter().map(Tag::imeta).collect();

        let (kind, content) = if all_images {
            for m in media {
                tags.push(Tag::new(["x", m.sha256.as_str()]));
            }
            let mut mimes: Vec<&str> = Vec::new();
            for m in media {
                if !mimes.contains(&m.mime.as_str()) {
                    mimes.push(&m.mime);
                }
            }
            for mime in mimes {
                tags.push(Tag::new(["m", mime]));
            }
            (Kind::PICTURE, caption.to_string())
        } else if let [video] = media {
            let vertical = matches!(video.dimensions, Some((w, h)) if h > w);
            tags.push(Tag::new(["title".to_string(), video_title(caption)]));
            tags.push(Tag::new(["published_at".to_string(), created.to_string()]));
            let kind = if vertical {
                Kind::SHORT_VIDEO
            } else {
                Kind::VIDEO
            };
            (kind, caption.to_string())
        } else {
            let urls: Vec<&str> = media.iter().map(|m| m.url.as_str()).collect();
            let content = if caption.is_empty() {
                urls.join("\n")
            } else {
                format!("{caption}\n\n{}", urls.join("\n"))
            };
            (Kind::TEXT_NOTE, content)
        };

        tags.extend(extract_hashtags(caption).into_iter().map(Tag::hashtag));
        UnsignedEvent::new(self.author, created, kind, tags, content)
    }

    /// Kind 30023. `created_at` is the edit time; the original date goes in `published_at`.
    pub fn article(&self, article: &Article, now: DateTime<Utc>) -> Result<UnsignedEvent, EventError> {
        let identifier = article
            .identifier
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(EventError::MissingIdentifier)?;
        if article.content.trim().is_empty() {
            return Err(EventError::EmptyArticle);
        }

        let mut tags = vec![
            Tag::identifier(identifier),
            Tag::new(["title", article.title.trim()]),
        ];
        if let Some(summary) = article.summary.as_deref().filter(|s| !s.is_empty()) {
            tags.push(Tag::new(["summary", summary]));
        }
        if let Some(image) = article.image.as_deref().filter(|s| !s.is_empty()) {
            tags.push(Tag::new(["image", image]));
        }
        if let Some(published) = article.published_at.as_deref().and_then(parse_timestamp) {
            tags.push(Tag::new([
                "published_at".to_string(),
                published.timestamp().to_string(),
            ]));
        }
        let mut seen: Vec<String> = Vec::new();
        for raw in &article.hashtags {
            let h = raw.trim().trim_start_matches('#').to_lowercase();
            if !h.is_empty() && !seen.contains(&h) {
                tags.push(Tag::hashtag(h.clone()));
                seen.push(h);
            }
        }

        UnsignedEvent::new(
            self.author,
            unix(now),
            Kind::LONG_FORM,
            tags,
            article.content.clone(),
        )
    }

    /// Kind 24242 upload authorization, valid for `[created_at, created_at + window)`.
    pub fn upload_auth(
        &self,
        sha256: &str,
        size: u64,
        created_at: u64,
        window: Duration,
    ) -> Result<UnsignedEvent, EventError> {
        check_hash(sha256)?;
        // 検証側は i64 の unix 秒で比較する
        let expires_at = created_at
            .checked_add(window.as_secs())
            .filter(|t| i64::try_from(*t).is_ok())
            .ok_or(EventError::WindowOverflow(window.as_secs()))?;
        let tags = vec![
            Tag::new(["t", "upload"]),
            Tag::new(["x", sha256]),
            Tag::new(["size".to_string(), size.to_string()]),
            Tag::expiration(expires_at),
        ];
        UnsignedEvent::new(
            self.author,
            created_at,
            Kind::BLOB_AUTH,
            tags,
            format!("Upload {sha256}"),
        )
    }
}

fn unix(now: DateTime<Utc>) -> u64 {
    now.timestamp().max(0) as u64
}

fn check_hash(sha256: &str) -> Result<(), EventError> {
    let ok = sha256.len() == 64
        && sha256
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(())
    } else {
        Err(EventError::InvalidHash(sha256.to_string()))
    }
}

fn video_title(caption: &str) -> String {
    let first = caption.lines().next().unwrap_or_default().trim();
    if first.is_empty() {
        return "Untitled".to_string();
    }
    first.chars().take(VIDEO_TITLE_MAX).collect()
}

fn slugify(raw: &str) -> String {
    let mut out = String::new();
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}
