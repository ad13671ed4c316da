use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data::{self, CatalogService, CategoryService, MutationService};
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    let display_path = friendly_path(config_path.as_ref());

    let _theme = &cfg.ui.theme;
    let status: String;

    let mut catalog_service: Option<Arc<dyn CatalogService + Send + Sync>> = None;
    let mut category_service: Option<Arc<dyn CategoryService + Send + Sync>> = None;
    let mut mutation_service: Option<Arc<dyn MutationService + Send + Sync>> = None;

    match api::Client::new(api::ClientConfig {
        base_url: Some(cfg.api.base_url.clone()),
        user_agent: cfg.api.user_agent.clone(),
        token: cfg.api.token.clone(),
        timeout: Some(cfg.api.timeout),
        http_client: None,
    }) {
        Ok(client) => {
            let client = Arc::new(client);
            catalog_service = Some(Arc::new(data::ApiCatalogService::new(client.clone())));
            category_service = Some(Arc::new(data::ApiCategoryService::new(client.clone())));
            mutation_service = Some(Arc::new(data::ApiMutationService::new(client)));
            status = "Browsing the stories catalog. Press a to add, e to edit, q to quit."
                .to_string();
        }
        Err(err) => {
            status = format!(
                "Failed to initialize the stories client: {err:#}. Check {display_path}."
            );
        }
    }

    let options = ui::Options {
        status_message: status,
        catalog_service,
        category_service,
        mutation_service,
        story_limit: cfg.listing.limit,
        config_path: display_path,
        fetch_categories_on_start: true,
    };

    let mut model = ui::Model::new(options);
    model.run()
}

fn friendly_path(path: Option<&std::path::PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/storydesk/config.yaml".to_string()
    }
}
