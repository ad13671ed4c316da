use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::media::MediaFile;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/admin/";
pub const STORY_FETCH_LIMIT: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Borough {
    Brooklyn,
    Manhattan,
    Bronx,
    Queens,
    StatenIsland,
}

impl Borough {
    pub const ALL: [Borough; 5] = [
        Borough::Brooklyn,
        Borough::Manhattan,
        Borough::Bronx,
        Borough::Queens,
        Borough::StatenIsland,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Borough::Brooklyn => "brooklyn",
            Borough::Manhattan => "manhattan",
            Borough::Bronx => "bronx",
            Borough::Queens => "queens",
            Borough::StatenIsland => "staten_island",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Borough::Brooklyn => "Brooklyn",
            Borough::Manhattan => "Manhattan",
            Borough::Bronx => "Bronx",
            Borough::Queens => "Queens",
            Borough::StatenIsland => "Staten Island",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub is_thumbnail: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Author {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub borough: Borough,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default)]
    pub author: Author,
    pub created_at: DateTime<Utc>,
}

impl Story {
    pub fn thumbnail(&self) -> Option<&Media> {
        self.media
            .iter()
            .find(|media| media.is_thumbnail)
            .or_else(|| self.media.first())
    }
}

/// Listing criteria. Structural equality decides whether a new fetch is
/// warranted; the all-empty value selects the default capped listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filters {
    pub search: String,
    pub boroughs: Vec<Borough>,
    pub categories: Vec<String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.boroughs.is_empty() && self.categories.is_empty()
    }

    pub fn to_params(&self, limit: u32) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.search.is_empty() {
            params.push(("search".into(), self.search.clone()));
        }
        for borough in &self.boroughs {
            params.push(("borough".into(), borough.as_str().to_string()));
        }
        for category in &self.categories {
            params.push(("category".into(), category.clone()));
        }
        params.push(("limit".into(), limit.to_string()));
        params
    }
}

/// Media parts accompanying a create, or an edit that replaces media.
#[derive(Debug, Clone, Default)]
pub struct MediaAttachments {
    pub thumbnail: Option<MediaFile>,
    pub extra: Vec<(String, MediaFile)>,
}

impl MediaAttachments {
    pub fn is_empty(&self) -> bool {
        self.thumbnail.is_none() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StoryPayload {
    pub title: String,
    pub content: String,
    pub borough: Borough,
    pub category_ids: Vec<String>,
    /// None means the request carries no file parts at all; on edit the
    /// server keeps the story's existing media in that case.
    pub media: Option<MediaAttachments>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub token: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    token: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("stories client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            token: config.token,
            base_url,
        })
    }

    pub fn list_stories(&self, filters: &Filters, limit: u32) -> Result<Vec<Story>> {
        let params = filters.to_params(limit);
        let resp = self.request(Method::GET, "stories", &params, None)?;
        let stories: Vec<Story> = resp.json()?;
        Ok(stories)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let resp = self.request(Method::GET, "categories", &[], None)?;
        let categories: Vec<Category> = resp.json()?;
        Ok(categories)
    }

    pub fn create_story(&self, payload: &StoryPayload) -> Result<Story> {
        let form = multipart_form(payload)?;
        let resp = self.request(Method::POST, "stories", &[], Some(form))?;
        let story: Story = resp.json()?;
        Ok(story)
    }

    pub fn edit_story(&self, id: &str, payload: &StoryPayload) -> Result<Story> {
        if id.trim().is_empty() {
            bail!("stories: edit requires a story id");
        }
        let path = format!("stories/{}", id);
        let form = multipart_form(payload)?;
        let resp = self.request(Method::PATCH, &path, &[], Some(form))?;
        let story: Story = resp.json()?;
        Ok(story)
    }

    pub fn delete_story(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            bail!("stories: delete requires a story id");
        }
        let path = format!("stories/{}", id);
        self.request(Method::DELETE, &path, &[], None)?;
        Ok(())
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        form: Option<Form>,
    ) -> Result<Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            {
                let mut pairs = url.query_pairs_mut();
                for (k, v) in params {
                    pairs.append_pair(k, v);
                }
            }
        }

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if !self.token.is_empty() {
            req = req.header(AUTHORIZATION, format!("Bearer {}", self.token));
        }
        if let Some(form) = form {
            req = req.multipart(form);
        }

        let resp = req.send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                401 => Err(anyhow!("stories: unauthorized")),
                403 => Err(anyhow!("stories: forbidden")),
                404 => Err(anyhow!("stories: not found")),
                429 => Err(anyhow!("stories: rate limited: {}", body)),
                _ => Err(anyhow!("stories: api error {}: {}", status, body)),
            }
        }
    }
}

fn multipart_form(payload: &StoryPayload) -> Result<Form> {
    let mut form = Form::new()
        .text("title", payload.title.clone())
        .text("content", payload.content.clone())
        .text("borough", payload.borough.as_str().to_string());

    for id in &payload.category_ids {
        form = form.text("categories", id.clone());
    }

    if let Some(media) = &payload.media {
        if let Some(thumbnail) = &media.thumbnail {
            form = form.part("thumbnail", file_part(thumbnail)?);
        }
        for (slot, file) in &media.extra {
            form = form.part(slot.clone(), file_part(file)?);
        }
    }

    Ok(form)
}

fn file_part(file: &MediaFile) -> Result<Part> {
    let part = Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(&file.mime)?;
    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filters_select_default_capped_listing() {
        let filters = Filters::default();
        assert!(filters.is_empty());
        let params = filters.to_params(STORY_FETCH_LIMIT);
        assert_eq!(params, vec![("limit".to_string(), "300".to_string())]);
    }

    #[test]
    fn populated_filters_carry_every_criterion() {
        let filters = Filters {
            search: "park".into(),
            boroughs: vec![Borough::Queens, Borough::Bronx],
            categories: vec!["c1".into(), "c2".into()],
        };
        let params = filters.to_params(300);
        assert_eq!(
            params,
            vec![
                ("search".to_string(), "park".to_string()),
                ("borough".to_string(), "queens".to_string()),
                ("borough".to_string(), "bronx".to_string()),
                ("category".to_string(), "c1".to_string()),
                ("category".to_string(), "c2".to_string()),
                ("limit".to_string(), "300".to_string()),
            ]
        );
    }

    #[test]
    fn filters_equality_is_structural() {
        let a = Filters {
            search: "park".into(),
            boroughs: vec![Borough::Brooklyn],
            categories: vec![],
        };
        let b = a.clone();
        assert_eq!(a, b);
        let c = Filters {
            search: "parks".into(),
            ..a.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn thumbnail_prefers_flagged_media() {
        let story = Story {
            id: "s1".into(),
            title: "t".into(),
            content: String::new(),
            borough: Borough::Brooklyn,
            categories: vec![],
            media: vec![
                Media {
                    id: "m1".into(),
                    url: "https://cdn.example.com/full.jpg".into(),
                    is_thumbnail: false,
                },
                Media {
                    id: "m2".into(),
                    url: "https://cdn.example.com/thumb.jpg".into(),
                    is_thumbnail: true,
                },
            ],
            author: Author::default(),
            created_at: Utc::now(),
        };
        assert_eq!(story.thumbnail().map(|m| m.id.as_str()), Some("m2"));
    }

    #[test]
    fn borough_round_trips_through_serde() {
        let json = serde_json::to_string(&Borough::StatenIsland).unwrap();
        assert_eq!(json, "\"staten_island\"");
        let parsed: Borough = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Borough::StatenIsland);
    }
}
