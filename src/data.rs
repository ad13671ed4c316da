use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::api::{self, Author, Borough, Category, Filters, Media, Story, StoryPayload};

pub trait CatalogService: Send + Sync {
    fn list_stories(&self, filters: &Filters, limit: u32) -> Result<Vec<Story>>;
}

pub trait CategoryService: Send + Sync {
    fn list_categories(&self) -> Result<Vec<Category>>;
}

pub trait MutationService: Send + Sync {
    fn create_story(&self, payload: &StoryPayload) -> Result<Story>;
    fn edit_story(&self, id: &str, payload: &StoryPayload) -> Result<Story>;
    fn delete_story(&self, id: &str) -> Result<()>;
}

pub struct ApiCatalogService {
    client: Arc<api::Client>,
}

impl ApiCatalogService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CatalogService for ApiCatalogService {
    fn list_stories(&self, filters: &Filters, limit: u32) -> Result<Vec<Story>> {
        self.client
            .list_stories(filters, limit)
            .context("fetch story listing")
    }
}

pub struct ApiCategoryService {
    client: Arc<api::Client>,
}

impl ApiCategoryService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CategoryService for ApiCategoryService {
    fn list_categories(&self) -> Result<Vec<Category>> {
        self.client.list_categories().context("fetch categories")
    }
}

pub struct ApiMutationService {
    client: Arc<api::Client>,
}

impl ApiMutationService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl MutationService for ApiMutationService {
    fn create_story(&self, payload: &StoryPayload) -> Result<Story> {
        self.client.create_story(payload).context("create story")
    }

    fn edit_story(&self, id: &str, payload: &StoryPayload) -> Result<Story> {
        self.client.edit_story(id, payload).context("edit story")
    }

    fn delete_story(&self, id: &str) -> Result<()> {
        self.client.delete_story(id).context("delete story")
    }
}

#[derive(Default)]
pub struct MockCatalogService;

impl CatalogService for MockCatalogService {
    fn list_stories(&self, _filters: &Filters, _limit: u32) -> Result<Vec<Story>> {
        Ok(mock_stories())
    }
}

#[derive(Default)]
pub struct MockCategoryService;

impl CategoryService for MockCategoryService {
    fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(vec![
            Category {
                id: "food".into(),
                name: "Food".into(),
            },
            Category {
                id: "festival".into(),
                name: "Festival".into(),
            },
            Category {
                id: "music".into(),
                name: "Music".into(),
            },
        ])
    }
}

#[derive(Default)]
pub struct MockMutationService;

impl MutationService for MockMutationService {
    fn create_story(&self, payload: &StoryPayload) -> Result<Story> {
        Ok(story_from_payload("mock-created", payload))
    }

    fn edit_story(&self, id: &str, payload: &StoryPayload) -> Result<Story> {
        Ok(story_from_payload(id, payload))
    }

    fn delete_story(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

fn story_from_payload(id: &str, payload: &StoryPayload) -> Story {
    Story {
        id: id.into(),
        title: payload.title.clone(),
        content: payload.content.clone(),
        borough: payload.borough,
        categories: payload
            .category_ids
            .iter()
            .map(|id| Category {
                id: id.clone(),
                name: id.clone(),
            })
            .collect(),
        media: Vec::new(),
        author: Author {
            first_name: "Story".into(),
            last_name: "Desk".into(),
        },
        created_at: chrono::Utc::now(),
    }
}

fn mock_stories() -> Vec<Story> {
    let mut rng = rand::thread_rng();
    let mut stories = vec![
        sample_story(
            "welcome",
            "Welcome to Storydesk",
            Borough::Brooklyn,
            "Sample stories are shown while no API connection is configured.",
        ),
        sample_story(
            "shortcuts",
            "Keyboard shortcuts",
            Borough::Manhattan,
            "Tab switches panes, a adds a story, e edits, d deletes, r refreshes.",
        ),
    ];

    stories.shuffle(&mut rng);
    stories
}

fn sample_story(id: &str, title: &str, borough: Borough, content: &str) -> Story {
    Story {
        id: id.into(),
        title: title.into(),
        content: content.into(),
        borough,
        categories: Vec::new(),
        media: vec![Media {
            id: format!("{id}-thumb"),
            url: format!("https://stories.example.com/media/{id}.jpg"),
            is_thumbnail: true,
        }],
        author: Author {
            first_name: "Story".into(),
            last_name: "Desk".into(),
        },
        created_at: chrono::Utc::now(),
    }
}
