//! Read-only view of the CMS content that scheduled posts reference

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::Result;
use crate::types::PostData;

/// Kind of CMS content a post promotes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Posts,
    Courses,
    Works,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Posts => "posts",
            ContentType::Courses => "courses",
            ContentType::Works => "works",
        }
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "posts" | "post" => Ok(ContentType::Posts),
            "courses" | "course" => Ok(ContentType::Courses),
            "works" | "work" => Ok(ContentType::Works),
            _ => Err(format!(
                "Invalid content type: '{}'. Valid options: posts, courses, works",
                s
            )),
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to one content item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentRef {
    pub content_type: ContentType,
    pub content_id: i64,
}

impl ContentRef {
    pub fn new(content_type: ContentType, content_id: i64) -> Self {
        Self {
            content_type,
            content_id,
        }
    }
}

impl FromStr for ContentRef {
    type Err = String;

    /// Parses `<type>:<id>`, e.g. `courses:12`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid content reference '{}'. Expected TYPE:ID", s))?;
        let content_type = kind.parse()?;
        let content_id = id
            .parse::<i64>()
            .map_err(|_| format!("Invalid content id '{}'", id))?;
        Ok(Self::new(content_type, content_id))
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.content_type, self.content_id)
    }
}

/// What the CMS exposes about a content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentSummary {
    pub title: String,
    pub summary: String,
    pub image_url: Option<String>,
}

impl ContentSummary {
    /// Default post template for this content; caller overrides win.
    pub fn to_template(&self, overrides: &PostData) -> PostData {
        let message = if overrides.message.trim().is_empty() {
            if self.summary.trim().is_empty() {
                self.title.clone()
            } else {
                format!("{}\n\n{}", self.title, self.summary)
            }
        } else {
            overrides.message.clone()
        };

        PostData {
            message,
            image_url: overrides.image_url.clone().or_else(|| self.image_url.clone()),
            link: overrides.link.clone(),
            target_id: overrides.target_id.clone(),
        }
    }
}

/// Lookup interface onto the CMS. Never mutates content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Returns `None` when the content no longer exists.
    async fn lookup(&self, content: ContentRef) -> Result<Option<ContentSummary>>;
}

/// In-process content source for tests and embedding applications.
#[derive(Default)]
pub struct InMemoryContentSource {
    items: RwLock<HashMap<ContentRef, ContentSummary>>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content: ContentRef, summary: ContentSummary) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(content, summary);
    }

    pub fn remove(&self, content: ContentRef) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&content);
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn lookup(&self, content: ContentRef) -> Result<Option<ContentSummary>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&content)
            .cloned())
    }
}
