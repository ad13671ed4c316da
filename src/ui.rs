use std::io::{self, Stdout};
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::wrap;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::api::{Borough, Category, Filters, MediaAttachments, Story, StoryPayload};
use crate::categories::{self, SelectionSet};
use crate::data::{CatalogService, CategoryService, MutationService};
use crate::media::MediaFile;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const FILTER_BAR_HEIGHT: u16 = 8;
const SUGGESTION_ROWS: usize = 3;

struct Spinner {
    index: usize,
}

impl Spinner {
    fn new() -> Self {
        Self { index: 0 }
    }

    fn advance(&mut self) -> bool {
        self.index = (self.index + 1) % SPINNER_FRAMES.len();
        true
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index]
    }

    fn reset(&mut self) {
        self.index = 0;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pane {
    Filters,
    Stories,
    Detail,
}

impl Pane {
    fn title(self) -> &'static str {
        match self {
            Pane::Filters => "Filters",
            Pane::Stories => "Stories",
            Pane::Detail => "Detail",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FilterField {
    Search,
    Boroughs,
    Categories,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FormCursor {
    Title,
    Content,
    Borough,
    Categories,
    Thumbnail,
    Extra(usize),
    Save,
}

#[derive(Clone, Debug, PartialEq)]
enum FormMode {
    Create,
    Edit { story: Story, replace_media: bool },
}

#[derive(Clone, Debug)]
struct MediaSlot {
    key: String,
    path: String,
}

/// Popup form state. A fresh instance is built on every open, so slot
/// counters and the replace-media flag never leak across sessions.
struct StoryForm {
    mode: FormMode,
    active: FormCursor,
    title: String,
    content: String,
    borough: Option<Borough>,
    borough_cursor: usize,
    category_query: String,
    suggestion_index: usize,
    selected: SelectionSet,
    thumbnail_path: String,
    extra_slots: Vec<MediaSlot>,
    next_slot_id: u64,
    status: Option<String>,
}

impl StoryForm {
    fn create() -> Self {
        Self {
            mode: FormMode::Create,
            active: FormCursor::Title,
            title: String::new(),
            content: String::new(),
            borough: None,
            borough_cursor: 0,
            category_query: String::new(),
            suggestion_index: 0,
            selected: SelectionSet::new(),
            thumbnail_path: String::new(),
            extra_slots: Vec::new(),
            next_slot_id: 0,
            status: None,
        }
    }

    fn edit(story: Story) -> Self {
        let borough_cursor = Borough::ALL
            .iter()
            .position(|b| *b == story.borough)
            .unwrap_or(0);
        let selected = SelectionSet::from_categories(&story.categories);
        Self {
            mode: FormMode::Edit {
                story: story.clone(),
                replace_media: false,
            },
            active: FormCursor::Title,
            title: story.title,
            content: story.content,
            borough: Some(story.borough),
            borough_cursor,
            category_query: String::new(),
            suggestion_index: 0,
            selected,
            thumbnail_path: String::new(),
            extra_slots: Vec::new(),
            next_slot_id: 0,
            status: None,
        }
    }

    fn is_editing(&self) -> bool {
        matches!(self.mode, FormMode::Edit { .. })
    }

    fn replace_media(&self) -> bool {
        match &self.mode {
            FormMode::Create => false,
            FormMode::Edit { replace_media, .. } => *replace_media,
        }
    }

    fn toggle_replace_media(&mut self) {
        if let FormMode::Edit { replace_media, .. } = &mut self.mode {
            *replace_media = !*replace_media;
            self.status = None;
        }
    }

    /// Media parts travel with a create unconditionally; an edit carries
    /// them only after the editor opted into replacing the existing set.
    fn wants_media(&self) -> bool {
        match &self.mode {
            FormMode::Create => true,
            FormMode::Edit { replace_media, .. } => *replace_media,
        }
    }

    fn story_id(&self) -> Option<&str> {
        match &self.mode {
            FormMode::Create => None,
            FormMode::Edit { story, .. } => Some(story.id.as_str()),
        }
    }

    fn existing_media_count(&self) -> usize {
        match &self.mode {
            FormMode::Create => 0,
            FormMode::Edit { story, .. } => story.media.len(),
        }
    }

    fn field_count(&self) -> usize {
        // Title, Content, Borough, Categories, Thumbnail, extras, Save
        6 + self.extra_slots.len()
    }

    fn cursor_position(&self) -> usize {
        match self.active {
            FormCursor::Title => 0,
            FormCursor::Content => 1,
            FormCursor::Borough => 2,
            FormCursor::Categories => 3,
            FormCursor::Thumbnail => 4,
            FormCursor::Extra(index) => 5 + index,
            FormCursor::Save => self.field_count() - 1,
        }
    }

    fn cursor_at(&self, position: usize) -> FormCursor {
        match position {
            0 => FormCursor::Title,
            1 => FormCursor::Content,
            2 => FormCursor::Borough,
            3 => FormCursor::Categories,
            4 => FormCursor::Thumbnail,
            other if other < self.field_count() - 1 => FormCursor::Extra(other - 5),
            _ => FormCursor::Save,
        }
    }

    fn next_field(&mut self) {
        let next = (self.cursor_position() + 1) % self.field_count();
        self.active = self.cursor_at(next);
    }

    fn previous_field(&mut self) {
        let count = self.field_count();
        let previous = (self.cursor_position() + count - 1) % count;
        self.active = self.cursor_at(previous);
    }

    fn active_text_mut(&mut self) -> Option<&mut String> {
        match self.active {
            FormCursor::Title => Some(&mut self.title),
            FormCursor::Content => Some(&mut self.content),
            FormCursor::Thumbnail => Some(&mut self.thumbnail_path),
            FormCursor::Extra(index) => self.extra_slots.get_mut(index).map(|slot| &mut slot.path),
            FormCursor::Borough | FormCursor::Categories | FormCursor::Save => None,
        }
    }

    fn insert_char(&mut self, ch: char) {
        if self.active == FormCursor::Categories {
            self.category_query.push(ch);
            self.suggestion_index = 0;
        } else if let Some(value) = self.active_text_mut() {
            value.push(ch);
        }
        self.status = None;
    }

    fn backspace(&mut self) {
        if self.active == FormCursor::Categories {
            if self.category_query.is_empty() {
                let last_id = self.selected.list().last().map(|c| c.id.clone());
                if let Some(id) = last_id {
                    self.selected.remove(&id);
                }
            } else {
                self.category_query.pop();
                self.suggestion_index = 0;
            }
        } else if let Some(value) = self.active_text_mut() {
            value.pop();
        }
        self.status = None;
    }

    fn borough_left(&mut self) {
        let len = Borough::ALL.len();
        self.borough_cursor = (self.borough_cursor + len - 1) % len;
        self.borough = Some(Borough::ALL[self.borough_cursor]);
        self.status = None;
    }

    fn borough_right(&mut self) {
        self.borough_cursor = (self.borough_cursor + 1) % Borough::ALL.len();
        self.borough = Some(Borough::ALL[self.borough_cursor]);
        self.status = None;
    }

    fn suggestions(&self, all: &[Category]) -> Vec<Category> {
        categories::suggest(all, &self.category_query, &self.selected)
    }

    fn suggestion_down(&mut self, all: &[Category]) {
        let count = self.suggestions(all).len();
        if count > 0 {
            self.suggestion_index = (self.suggestion_index + 1) % count;
        }
    }

    fn suggestion_up(&mut self, all: &[Category]) {
        let count = self.suggestions(all).len();
        if count > 0 {
            self.suggestion_index = (self.suggestion_index + count - 1) % count;
        }
    }

    fn accept_suggestion(&mut self, all: &[Category]) {
        let hits = self.suggestions(all);
        if hits.is_empty() {
            return;
        }
        let index = self.suggestion_index.min(hits.len() - 1);
        self.selected.add(hits[index].clone());
        self.category_query.clear();
        self.suggestion_index = 0;
        self.status = None;
    }

    /// Slot keys are assigned from a counter that only ever moves forward,
    /// so removing a slot and adding another never reuses a key.
    fn add_media_slot(&mut self) {
        self.next_slot_id += 1;
        let key = format!("media_{}", self.next_slot_id);
        self.extra_slots.push(MediaSlot {
            key,
            path: String::new(),
        });
        self.active = FormCursor::Extra(self.extra_slots.len() - 1);
        self.status = None;
    }

    fn remove_active_slot(&mut self) {
        if let FormCursor::Extra(index) = self.active {
            if index < self.extra_slots.len() {
                self.extra_slots.remove(index);
                self.active = if self.extra_slots.is_empty() {
                    FormCursor::Thumbnail
                } else {
                    FormCursor::Extra(index.min(self.extra_slots.len() - 1))
                };
            }
        }
        self.status = None;
    }

    fn build_payload(&self) -> Result<StoryPayload, String> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("Title is required.".to_string());
        }
        let content = self.content.trim();
        if content.is_empty() {
            return Err("Content is required.".to_string());
        }
        let Some(borough) = self.borough else {
            return Err("Choose a borough.".to_string());
        };

        let media = if self.wants_media() {
            let mut attachments = MediaAttachments::default();
            let thumbnail_path = self.thumbnail_path.trim();
            if !thumbnail_path.is_empty() {
                let file = MediaFile::load(Path::new(thumbnail_path))
                    .map_err(|err| err.to_string())?;
                attachments.thumbnail = Some(file);
            }
            for slot in &self.extra_slots {
                let path = slot.path.trim();
                if path.is_empty() {
                    continue;
                }
                let file = MediaFile::load(Path::new(path)).map_err(|err| err.to_string())?;
                attachments.extra.push((slot.key.clone(), file));
            }
            Some(attachments)
        } else {
            None
        };

        Ok(StoryPayload {
            title: title.to_string(),
            content: content.to_string(),
            borough,
            category_ids: self.selected.ids(),
            media,
        })
    }
}

struct PendingStories {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

struct PendingCategories {
    request_id: u64,
}

struct PendingSubmit {
    request_id: u64,
}

struct PendingDelete {
    request_id: u64,
    story_id: String,
}

enum AsyncResponse {
    Stories {
        request_id: u64,
        result: Result<Vec<Story>>,
    },
    Categories {
        request_id: u64,
        result: Result<Vec<Category>>,
    },
    Submit {
        request_id: u64,
        result: Result<Story>,
    },
    Delete {
        request_id: u64,
        story_id: String,
        result: Result<()>,
    },
}

#[derive(Clone)]
pub struct Options {
    pub status_message: String,
    pub catalog_service: Option<Arc<dyn CatalogService + Send + Sync>>,
    pub category_service: Option<Arc<dyn CategoryService + Send + Sync>>,
    pub mutation_service: Option<Arc<dyn MutationService + Send + Sync>>,
    pub story_limit: u32,
    pub config_path: String,
    pub fetch_categories_on_start: bool,
}

pub struct Model {
    status_message: String,
    stories: Vec<Story>,
    selected_story: usize,
    detail_scroll: u16,
    all_categories: Vec<Category>,

    // Applied listing criteria plus the filter bar's editing state.
    filters: Filters,
    search_input: String,
    filter_boroughs: Vec<Borough>,
    filter_categories: SelectionSet,
    category_query: String,
    suggestion_index: usize,
    filter_field: FilterField,
    borough_cursor: usize,

    form: Option<StoryForm>,
    confirm_delete: Option<Story>,

    catalog_service: Option<Arc<dyn CatalogService + Send + Sync>>,
    category_service: Option<Arc<dyn CategoryService + Send + Sync>>,
    mutation_service: Option<Arc<dyn MutationService + Send + Sync>>,
    story_limit: u32,

    focused_pane: Pane,
    needs_redraw: bool,
    spinner: Spinner,
    config_path: String,

    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_stories: Option<PendingStories>,
    pending_categories: Option<PendingCategories>,
    pending_submit: Option<PendingSubmit>,
    pending_delete: Option<PendingDelete>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut model = Self {
            status_message: opts.status_message.clone(),
            stories: Vec::new(),
            selected_story: 0,
            detail_scroll: 0,
            all_categories: Vec::new(),
            filters: Filters::default(),
            search_input: String::new(),
            filter_boroughs: Vec::new(),
            filter_categories: SelectionSet::new(),
            category_query: String::new(),
            suggestion_index: 0,
            filter_field: FilterField::Search,
            borough_cursor: 0,
            form: None,
            confirm_delete: None,
            catalog_service: opts.catalog_service.clone(),
            category_service: opts.category_service.clone(),
            mutation_service: opts.mutation_service.clone(),
            story_limit: opts.story_limit,
            focused_pane: Pane::Stories,
            needs_redraw: true,
            spinner: Spinner::new(),
            config_path: opts.config_path.clone(),
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_stories: None,
            pending_categories: None,
            pending_submit: None,
            pending_delete: None,
        };

        model.reload_stories();
        if opts.fetch_categories_on_start {
            model.reload_categories();
        }
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() && self.spinner.advance() {
                    self.mark_dirty();
                } else if !self.is_loading() {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.pending_stories.is_some()
            || self.pending_categories.is_some()
            || self.pending_submit.is_some()
            || self.pending_delete.is_some()
    }

    // --- Filter synchronization ---

    /// Applies new criteria. Structurally equal values are ignored, so a
    /// rebuilt-but-identical Filters never costs a network round trip.
    fn set_filters(&mut self, next: Filters) {
        if next == self.filters {
            return;
        }
        self.filters = next;
        self.reload_stories();
    }

    fn effective_filters(&self) -> Filters {
        if self.filters.is_empty() {
            Filters::default()
        } else {
            self.filters.clone()
        }
    }

    fn reload_stories(&mut self) {
        let Some(service) = &self.catalog_service else {
            self.pending_stories = None;
            self.stories.clear();
            self.selected_story = 0;
            self.status_message =
                format!("Configure the API connection in {} to load stories.", self.config_path);
            self.mark_dirty();
            return;
        };

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        // The superseded worker is not aborted; the flag only stops it from
        // posting a result the id check would discard anyway.
        if let Some(pending) = self.pending_stories.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_stories = Some(PendingStories {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        self.status_message = "Loading stories...".to_string();
        self.spinner.reset();

        let filters = self.effective_filters();
        let limit = self.story_limit;
        let tx = self.response_tx.clone();
        let service = service.clone();

        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.list_stories(&filters, limit);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Stories { request_id, result });
        });
        self.mark_dirty();
    }

    fn reload_categories(&mut self) {
        let Some(service) = &self.category_service else {
            return;
        };
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending_categories = Some(PendingCategories { request_id });

        let tx = self.response_tx.clone();
        let service = service.clone();
        thread::spawn(move || {
            let result = service.list_categories();
            let _ = tx.send(AsyncResponse::Categories { request_id, result });
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Stories { request_id, result } => {
                let Some(pending) = &self.pending_stories else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst) {
                    return;
                }
                // A response from anything but the newest request is stale:
                // dropped silently, never reported as a failure.
                if pending.request_id != request_id {
                    return;
                }
                self.pending_stories = None;

                match result {
                    Ok(stories) => {
                        self.status_message = match stories.len() {
                            0 => "No stories match the current filters.".to_string(),
                            1 => "Loaded 1 story.".to_string(),
                            n => format!("Loaded {} stories.", n),
                        };
                        self.stories = stories;
                        if self.selected_story >= self.stories.len() {
                            self.selected_story = self.stories.len().saturating_sub(1);
                        }
                        self.detail_scroll = 0;
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load stories: {err:#}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Categories { request_id, result } => {
                let Some(pending) = &self.pending_categories else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_categories = None;

                match result {
                    Ok(categories) => {
                        self.all_categories = categories;
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to load categories: {err:#}");
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Submit { request_id, result } => {
                let Some(pending) = &self.pending_submit else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_submit = None;

                match result {
                    Ok(story) => {
                        self.status_message = format!("Saved \"{}\".", story.title);
                        self.form = None;
                        self.reload_stories();
                    }
                    Err(err) => {
                        // Keep the popup open with the editor's input intact
                        // so the submission can be retried as-is.
                        if let Some(form) = &mut self.form {
                            form.status = Some(format!("Save failed: {err:#}"));
                        } else {
                            self.status_message = format!("Save failed: {err:#}");
                        }
                    }
                }
                self.mark_dirty();
            }
            AsyncResponse::Delete {
                request_id,
                story_id,
                result,
            } => {
                let Some(pending) = &self.pending_delete else {
                    return;
                };
                if pending.request_id != request_id || pending.story_id != story_id {
                    return;
                }
                self.pending_delete = None;

                match result {
                    Ok(()) => {
                        self.status_message = "Story deleted.".to_string();
                        self.reload_stories();
                    }
                    Err(err) => {
                        self.status_message = format!("Failed to delete story: {err:#}");
                    }
                }
                self.mark_dirty();
            }
        }
    }

    // --- Form lifecycle ---

    fn open_create(&mut self) {
        self.form = Some(StoryForm::create());
        self.mark_dirty();
    }

    fn open_edit(&mut self) {
        let Some(story) = self.stories.get(self.selected_story).cloned() else {
            self.status_message = "No story selected to edit.".to_string();
            self.mark_dirty();
            return;
        };
        self.form = Some(StoryForm::edit(story));
        self.mark_dirty();
    }

    fn close_form(&mut self) {
        self.form = None;
        self.mark_dirty();
    }

    fn toggle_replace_media(&mut self) {
        if let Some(form) = &mut self.form {
            form.toggle_replace_media();
        }
        self.mark_dirty();
    }

    fn submit_form(&mut self) {
        // A pending submission makes this a no-op; otherwise a slow server
        // plus an impatient editor would create the story twice.
        if self.pending_submit.is_some() {
            return;
        }
        let Some(service) = self.mutation_service.clone() else {
            if let Some(form) = &mut self.form {
                form.status = Some("Saving requires an API connection.".to_string());
            }
            self.mark_dirty();
            return;
        };
        let Some(form) = &mut self.form else {
            return;
        };

        let payload = match form.build_payload() {
            Ok(payload) => payload,
            Err(message) => {
                form.status = Some(message);
                self.mark_dirty();
                return;
            }
        };
        let story_id = form.story_id().map(str::to_string);
        form.status = Some("Saving...".to_string());

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending_submit = Some(PendingSubmit { request_id });

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = match story_id.as_deref() {
                Some(id) => service.edit_story(id, &payload),
                None => service.create_story(&payload),
            };
            let _ = tx.send(AsyncResponse::Submit { request_id, result });
        });
        self.mark_dirty();
    }

    // --- Deletion ---

    fn request_delete(&mut self) {
        let Some(story) = self.stories.get(self.selected_story).cloned() else {
            self.status_message = "No story selected to delete.".to_string();
            self.mark_dirty();
            return;
        };
        self.confirm_delete = Some(story);
        self.mark_dirty();
    }

    fn confirm_delete_story(&mut self) {
        let Some(story) = self.confirm_delete.take() else {
            return;
        };
        if self.pending_delete.is_some() {
            self.status_message = "A delete is already in progress.".to_string();
            self.mark_dirty();
            return;
        }
        let Some(service) = self.mutation_service.clone() else {
            self.status_message = "Deleting requires an API connection.".to_string();
            self.mark_dirty();
            return;
        };

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending_delete = Some(PendingDelete {
            request_id,
            story_id: story.id.clone(),
        });
        self.status_message = format!("Deleting \"{}\"...", story.title);

        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.delete_story(&story.id);
            let _ = tx.send(AsyncResponse::Delete {
                request_id,
                story_id: story.id.clone(),
                result,
            });
        });
        self.mark_dirty();
    }

    // --- Key handling ---

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if self.confirm_delete.is_some() {
            self.handle_confirm_key(key.code);
            return Ok(false);
        }
        if self.form.is_some() {
            self.handle_form_key(key);
            return Ok(false);
        }
        if key.code == KeyCode::Tab {
            self.cycle_pane();
            self.mark_dirty();
            return Ok(false);
        }

        match self.focused_pane {
            Pane::Filters => {
                self.handle_filter_key(key);
                Ok(false)
            }
            Pane::Stories => self.handle_stories_key(key),
            Pane::Detail => self.handle_detail_key(key),
        }
    }

    fn cycle_pane(&mut self) {
        self.focused_pane = match self.focused_pane {
            Pane::Filters => Pane::Stories,
            Pane::Stories => Pane::Detail,
            Pane::Detail => Pane::Filters,
        };
    }

    fn handle_confirm_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('y') | KeyCode::Enter => self.confirm_delete_story(),
            KeyCode::Char('n') | KeyCode::Esc => {
                self.confirm_delete = None;
                self.status_message = "Delete cancelled.".to_string();
            }
            _ => {}
        }
        self.mark_dirty();
    }

    fn handle_stories_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => {
                if !self.stories.is_empty()
                    && self.selected_story + 1 < self.stories.len()
                {
                    self.selected_story += 1;
                    self.detail_scroll = 0;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.selected_story > 0 {
                    self.selected_story -= 1;
                    self.detail_scroll = 0;
                }
            }
            KeyCode::Char('g') => {
                self.selected_story = 0;
                self.detail_scroll = 0;
            }
            KeyCode::Char('G') => {
                self.selected_story = self.stories.len().saturating_sub(1);
                self.detail_scroll = 0;
            }
            KeyCode::Char('a') => self.open_create(),
            KeyCode::Char('e') | KeyCode::Enter => self.open_edit(),
            KeyCode::Char('d') => self.request_delete(),
            KeyCode::Char('r') => self.reload_stories(),
            KeyCode::Char('o') => self.open_selected_thumbnail(),
            KeyCode::Char('y') => self.copy_story_id(),
            KeyCode::Char('/') => {
                self.focused_pane = Pane::Filters;
                self.filter_field = FilterField::Search;
            }
            _ => {}
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_detail_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => {
                self.detail_scroll = self.detail_scroll.saturating_add(1);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.detail_scroll = self.detail_scroll.saturating_sub(1);
            }
            KeyCode::Char('g') => self.detail_scroll = 0,
            _ => {}
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_filter_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                if self.filter_field == FilterField::Categories && !self.category_query.is_empty()
                {
                    self.category_query.clear();
                    self.suggestion_index = 0;
                } else {
                    self.focused_pane = Pane::Stories;
                }
            }
            KeyCode::Down => {
                if self.filter_field == FilterField::Categories
                    && !self.filter_suggestions().is_empty()
                {
                    let count = self.filter_suggestions().len();
                    self.suggestion_index = (self.suggestion_index + 1) % count;
                } else {
                    self.filter_field = match self.filter_field {
                        FilterField::Search => FilterField::Boroughs,
                        FilterField::Boroughs => FilterField::Categories,
                        FilterField::Categories => FilterField::Search,
                    };
                }
            }
            KeyCode::Up => {
                if self.filter_field == FilterField::Categories
                    && !self.filter_suggestions().is_empty()
                {
                    let count = self.filter_suggestions().len();
                    self.suggestion_index = (self.suggestion_index + count - 1) % count;
                } else {
                    self.filter_field = match self.filter_field {
                        FilterField::Search => FilterField::Categories,
                        FilterField::Boroughs => FilterField::Search,
                        FilterField::Categories => FilterField::Boroughs,
                    };
                }
            }
            KeyCode::Left => {
                if self.filter_field == FilterField::Boroughs {
                    let len = Borough::ALL.len();
                    self.borough_cursor = (self.borough_cursor + len - 1) % len;
                }
            }
            KeyCode::Right => {
                if self.filter_field == FilterField::Boroughs {
                    self.borough_cursor = (self.borough_cursor + 1) % Borough::ALL.len();
                }
            }
            KeyCode::Enter => match self.filter_field {
                FilterField::Boroughs => self.toggle_filter_borough(),
                FilterField::Categories => self.accept_filter_suggestion(),
                FilterField::Search => {}
            },
            KeyCode::Backspace => match self.filter_field {
                FilterField::Search => {
                    self.search_input.pop();
                    self.apply_filters();
                }
                FilterField::Categories => {
                    if self.category_query.is_empty() {
                        let last_id = self
                            .filter_categories
                            .list()
                            .last()
                            .map(|category| category.id.clone());
                        if let Some(id) = last_id {
                            self.filter_categories.remove(&id);
                            self.apply_filters();
                        }
                    } else {
                        self.category_query.pop();
                        self.suggestion_index = 0;
                    }
                }
                FilterField::Boroughs => {}
            },
            KeyCode::Char(ch) => {
                if key.modifiers.contains(KeyModifiers::CONTROL) {
                    return;
                }
                match self.filter_field {
                    FilterField::Search => {
                        self.search_input.push(ch);
                        self.apply_filters();
                    }
                    FilterField::Categories => {
                        self.category_query.push(ch);
                        self.suggestion_index = 0;
                    }
                    FilterField::Boroughs => {
                        if ch == ' ' {
                            self.toggle_filter_borough();
                        }
                    }
                }
            }
            _ => {}
        }
        self.mark_dirty();
    }

    fn filter_suggestions(&self) -> Vec<Category> {
        categories::suggest(
            &self.all_categories,
            &self.category_query,
            &self.filter_categories,
        )
    }

    fn accept_filter_suggestion(&mut self) {
        let hits = self.filter_suggestions();
        if hits.is_empty() {
            return;
        }
        let index = self.suggestion_index.min(hits.len() - 1);
        self.filter_categories.add(hits[index].clone());
        self.category_query.clear();
        self.suggestion_index = 0;
        self.apply_filters();
    }

    fn toggle_filter_borough(&mut self) {
        let borough = Borough::ALL[self.borough_cursor];
        if let Some(pos) = self.filter_boroughs.iter().position(|b| *b == borough) {
            self.filter_boroughs.remove(pos);
        } else {
            self.filter_boroughs.push(borough);
            // Canonical order keeps structurally equal criteria equal no
            // matter the toggle sequence.
            self.filter_boroughs
                .sort_by_key(|b| Borough::ALL.iter().position(|a| a == b).unwrap_or(usize::MAX));
        }
        self.apply_filters();
    }

    fn apply_filters(&mut self) {
        let next = Filters {
            search: self.search_input.clone(),
            boroughs: self.filter_boroughs.clone(),
            categories: self.filter_categories.ids(),
        };
        self.set_filters(next);
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('r') => {
                    self.toggle_replace_media();
                    return;
                }
                KeyCode::Char('n') => {
                    if let Some(form) = &mut self.form {
                        form.add_media_slot();
                    }
                    self.mark_dirty();
                    return;
                }
                KeyCode::Char('x') => {
                    if let Some(form) = &mut self.form {
                        form.remove_active_slot();
                    }
                    self.mark_dirty();
                    return;
                }
                KeyCode::Char('s') => {
                    self.submit_form();
                    return;
                }
                _ => return,
            }
        }

        match key.code {
            KeyCode::Esc => {
                self.close_form();
                return;
            }
            KeyCode::Tab => {
                if let Some(form) = &mut self.form {
                    form.next_field();
                }
            }
            KeyCode::BackTab => {
                if let Some(form) = &mut self.form {
                    form.previous_field();
                }
            }
            KeyCode::Enter => {
                let active = self.form.as_ref().map(|form| form.active);
                match active {
                    Some(FormCursor::Save) => {
                        self.submit_form();
                        return;
                    }
                    Some(FormCursor::Categories) => {
                        if let Some(form) = &mut self.form {
                            form.accept_suggestion(&self.all_categories);
                        }
                    }
                    Some(FormCursor::Content) => {
                        if let Some(form) = &mut self.form {
                            form.insert_char('\n');
                        }
                    }
                    _ => {
                        if let Some(form) = &mut self.form {
                            form.next_field();
                        }
                    }
                }
            }
            KeyCode::Down => {
                if let Some(form) = &mut self.form {
                    if form.active == FormCursor::Categories
                        && !form.suggestions(&self.all_categories).is_empty()
                    {
                        form.suggestion_down(&self.all_categories);
                    } else {
                        form.next_field();
                    }
                }
            }
            KeyCode::Up => {
                if let Some(form) = &mut self.form {
                    if form.active == FormCursor::Categories
                        && !form.suggestions(&self.all_categories).is_empty()
                    {
                        form.suggestion_up(&self.all_categories);
                    } else {
                        form.previous_field();
                    }
                }
            }
            KeyCode::Left => {
                if let Some(form) = &mut self.form {
                    if form.active == FormCursor::Borough {
                        form.borough_left();
                    }
                }
            }
            KeyCode::Right => {
                if let Some(form) = &mut self.form {
                    if form.active == FormCursor::Borough {
                        form.borough_right();
                    }
                }
            }
            KeyCode::Backspace => {
                if let Some(form) = &mut self.form {
                    form.backspace();
                }
            }
            KeyCode::Char(ch) => {
                if let Some(form) = &mut self.form {
                    form.insert_char(ch);
                }
            }
            _ => {}
        }
        self.mark_dirty();
    }

    // --- Browsing helpers ---

    fn open_selected_thumbnail(&mut self) {
        let Some(story) = self.stories.get(self.selected_story) else {
            self.status_message = "No story selected.".to_string();
            return;
        };
        let Some(media) = story.thumbnail() else {
            self.status_message = "This story has no media.".to_string();
            return;
        };
        match webbrowser::open(&media.url) {
            Ok(_) => self.status_message = format!("Opened {}", media.url),
            Err(err) => self.status_message = format!("Failed to open media: {err}"),
        }
    }

    fn copy_story_id(&mut self) {
        let Some(story) = self.stories.get(self.selected_story) else {
            self.status_message = "No story selected.".to_string();
            return;
        };
        let id = story.id.clone();
        match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(id.clone())) {
            Ok(()) => self.status_message = format!("Copied story id {}", id),
            Err(err) => self.status_message = format!("Clipboard unavailable: {err}"),
        }
    }

    // --- Rendering ---

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(FILTER_BAR_HEIGHT),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_filters(frame, layout[1]);

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(42), Constraint::Percentage(58)])
            .split(layout[2]);
        self.draw_stories(frame, main_chunks[0]);
        self.draw_detail(frame, main_chunks[1]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[3]);

        if self.form.is_some() {
            self.draw_form(frame, layout[2]);
        }

        if self.confirm_delete.is_some() {
            self.draw_confirm(frame, layout[2]);
        }
    }

    fn pane_block(&self, pane: Pane) -> Block<'static> {
        let focused = self.focused_pane == pane && self.form.is_none();
        let border = if focused {
            COLOR_BORDER_FOCUSED
        } else {
            COLOR_BORDER_IDLE
        };
        Block::default()
            .title(Span::styled(
                pane.title(),
                Style::default()
                    .fg(if focused { COLOR_ACCENT } else { COLOR_TEXT_SECONDARY })
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(COLOR_PANEL_BG))
    }

    fn filter_field_style(&self, field: FilterField) -> Style {
        if self.focused_pane == Pane::Filters && self.filter_field == field {
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_SELECTED_BG)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY).bg(COLOR_PANEL_BG)
        }
    }

    fn draw_filters(&self, frame: &mut Frame<'_>, area: Rect) {
        let mut lines = Vec::new();

        let mut search_spans = vec![Span::styled(
            "Search: ",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )];
        let search_display = if self.search_input.is_empty() {
            "(type to search titles and content)".to_string()
        } else {
            self.search_input.clone()
        };
        search_spans.push(Span::styled(
            search_display,
            self.filter_field_style(FilterField::Search),
        ));
        lines.push(Line::from(search_spans));

        let mut borough_spans = vec![Span::styled(
            "Boroughs: ",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )];
        for (index, borough) in Borough::ALL.iter().enumerate() {
            let selected = self.filter_boroughs.contains(borough);
            let cursor_here = self.focused_pane == Pane::Filters
                && self.filter_field == FilterField::Boroughs
                && self.borough_cursor == index;
            let marker = if selected { "[x] " } else { "[ ] " };
            let mut style = if selected {
                Style::default().fg(COLOR_SUCCESS)
            } else {
                Style::default().fg(COLOR_TEXT_PRIMARY)
            };
            if cursor_here {
                style = style.bg(COLOR_PANEL_SELECTED_BG).add_modifier(Modifier::BOLD);
            }
            borough_spans.push(Span::styled(
                format!("{}{}  ", marker, borough.label()),
                style,
            ));
        }
        lines.push(Line::from(borough_spans));

        let mut category_spans = vec![Span::styled(
            "Categories: ",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )];
        for category in self.filter_categories.list() {
            category_spans.push(Span::styled(
                format!("[{}] ", category.name),
                Style::default().fg(COLOR_ACCENT),
            ));
        }
        let query_display = if self.category_query.is_empty() {
            "(type to add)".to_string()
        } else {
            self.category_query.clone()
        };
        category_spans.push(Span::styled(
            query_display,
            self.filter_field_style(FilterField::Categories),
        ));
        lines.push(Line::from(category_spans));

        let suggestions = self.filter_suggestions();
        if !suggestions.is_empty() {
            let mut spans = vec![Span::styled(
                "  ↳ ",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )];
            for (index, category) in suggestions.iter().take(SUGGESTION_ROWS * 3).enumerate() {
                let style = if index == self.suggestion_index.min(suggestions.len() - 1) {
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .bg(COLOR_PANEL_SELECTED_BG)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(COLOR_TEXT_SECONDARY)
                };
                spans.push(Span::styled(format!(" {} ", category.name), style));
            }
            lines.push(Line::from(spans));
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(self.pane_block(Pane::Filters))
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn draw_stories(&self, frame: &mut Frame<'_>, area: Rect) {
        let width = area.width.saturating_sub(4) as usize;
        let items: Vec<ListItem> = if self.stories.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "No stories loaded.",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )))]
        } else {
            self.stories
                .iter()
                .map(|story| {
                    let title = truncate_to_width(&story.title, width);
                    let meta = format!(
                        "{} · {}",
                        story.borough.label(),
                        story.created_at.format("%b %-d, %Y")
                    );
                    ListItem::new(vec![
                        Line::from(Span::styled(
                            title,
                            Style::default()
                                .fg(COLOR_TEXT_PRIMARY)
                                .add_modifier(Modifier::BOLD),
                        )),
                        Line::from(Span::styled(
                            truncate_to_width(&meta, width),
                            Style::default().fg(COLOR_TEXT_SECONDARY),
                        )),
                    ])
                })
                .collect()
        };

        let list = List::new(items)
            .block(self.pane_block(Pane::Stories))
            .highlight_style(
                Style::default()
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        let mut state = ListState::default();
        if !self.stories.is_empty() {
            state.select(Some(
                self.selected_story.min(self.stories.len().saturating_sub(1)),
            ));
        }
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_detail(&self, frame: &mut Frame<'_>, area: Rect) {
        let width = area.width.saturating_sub(4).max(10) as usize;
        let mut lines: Vec<Line> = Vec::new();

        if let Some(story) = self.stories.get(self.selected_story) {
            lines.push(Line::from(Span::styled(
                story.title.clone(),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            )));
            let byline = format!(
                "By {} · {}",
                story.author.display_name(),
                story.created_at.format("%b %-d, %Y")
            );
            lines.push(Line::from(Span::styled(
                byline,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
            lines.push(Line::from(Span::styled(
                format!("Borough: {}", story.borough.label()),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )));
            if !story.categories.is_empty() {
                let names: Vec<&str> = story
                    .categories
                    .iter()
                    .map(|category| category.name.as_str())
                    .collect();
                lines.push(Line::from(Span::styled(
                    format!("Categories: {}", names.join(", ")),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                )));
            }
            if let Some(media) = story.thumbnail() {
                lines.push(Line::from(Span::styled(
                    format!("Media: {} ({} total)", media.url, story.media.len()),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
            }
            lines.push(Line::default());
            for wrapped in wrap(&story.content, width) {
                lines.push(Line::from(Span::styled(
                    wrapped.into_owned(),
                    Style::default().fg(COLOR_TEXT_PRIMARY),
                )));
            }
        } else {
            lines.push(Line::from(Span::styled(
                "Select a story to see its details.",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )));
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(self.pane_block(Pane::Detail))
            .wrap(Wrap { trim: false })
            .scroll((self.detail_scroll, 0));
        frame.render_widget(paragraph, area);
    }

    fn form_field_line(&self, form: &StoryForm, cursor: FormCursor, label: &str, value: String) -> Line<'static> {
        let is_active = form.active == cursor;
        let indicator_style = if is_active {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        let value_style = if is_active {
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_SELECTED_BG)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY)
        };
        Line::from(vec![
            Span::styled(if is_active { "> " } else { "  " }.to_string(), indicator_style),
            Span::styled(
                format!("{label}: "),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
            Span::styled(value, value_style),
        ])
    }

    fn form_body(&self, form: &StoryForm) -> Text<'static> {
        let mut lines = Vec::new();

        lines.push(self.form_field_line(
            form,
            FormCursor::Title,
            "Title",
            if form.title.is_empty() {
                "(required)".to_string()
            } else {
                form.title.clone()
            },
        ));

        let content_preview = if form.content.is_empty() {
            "(required)".to_string()
        } else {
            let flat = form.content.replace('\n', " ⏎ ");
            truncate_to_width(&flat, 60)
        };
        lines.push(self.form_field_line(form, FormCursor::Content, "Content", content_preview));

        let borough_value = match form.borough {
            Some(borough) => {
                let mut parts = Vec::new();
                for b in Borough::ALL {
                    if b == borough {
                        parts.push(format!("◉ {}", b.label()));
                    } else {
                        parts.push(format!("○ {}", b.label()));
                    }
                }
                parts.join("  ")
            }
            None => "← → to choose".to_string(),
        };
        lines.push(self.form_field_line(form, FormCursor::Borough, "Borough", borough_value));

        let mut category_value = String::new();
        for category in form.selected.list() {
            category_value.push_str(&format!("[{}] ", category.name));
        }
        if form.category_query.is_empty() {
            category_value.push_str("(type to add)");
        } else {
            category_value.push_str(&form.category_query);
        }
        lines.push(self.form_field_line(form, FormCursor::Categories, "Categories", category_value));

        if form.active == FormCursor::Categories {
            let suggestions = form.suggestions(&self.all_categories);
            if !suggestions.is_empty() {
                let mut spans = vec![Span::styled(
                    "      ↳ ",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )];
                for (index, category) in suggestions.iter().take(6).enumerate() {
                    let style = if index == form.suggestion_index.min(suggestions.len() - 1) {
                        Style::default()
                            .fg(COLOR_TEXT_PRIMARY)
                            .bg(COLOR_PANEL_SELECTED_BG)
                            .add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(COLOR_TEXT_SECONDARY)
                    };
                    spans.push(Span::styled(format!(" {} ", category.name), style));
                }
                lines.push(Line::from(spans));
            }
        }

        lines.push(Line::default());

        if form.is_editing() && !form.replace_media() {
            lines.push(Line::from(Span::styled(
                format!(
                    "  Media: keeping the {} existing file(s). Ctrl+R to replace.",
                    form.existing_media_count()
                ),
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )));
        } else {
            if form.is_editing() {
                lines.push(Line::from(Span::styled(
                    "  Media: replacing existing files. Ctrl+R to keep them instead.",
                    Style::default()
                        .fg(COLOR_ERROR)
                        .add_modifier(Modifier::ITALIC),
                )));
            }
            lines.push(self.form_field_line(
                form,
                FormCursor::Thumbnail,
                "Thumbnail",
                if form.thumbnail_path.is_empty() {
                    "(path to image file)".to_string()
                } else {
                    form.thumbnail_path.clone()
                },
            ));
            for (index, slot) in form.extra_slots.iter().enumerate() {
                lines.push(self.form_field_line(
                    form,
                    FormCursor::Extra(index),
                    &slot.key,
                    if slot.path.is_empty() {
                        "(path to image file)".to_string()
                    } else {
                        slot.path.clone()
                    },
                ));
            }
        }

        lines.push(Line::default());

        let save_active = form.active == FormCursor::Save;
        lines.push(Line::from(vec![
            Span::styled(
                if save_active { "> " } else { "  " }.to_string(),
                Style::default().fg(COLOR_ACCENT),
            ),
            Span::styled(
                if self.pending_submit.is_some() {
                    "[ Saving... ]".to_string()
                } else {
                    "[ Save ]".to_string()
                },
                if save_active {
                    Style::default()
                        .fg(COLOR_PANEL_BG)
                        .bg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(COLOR_TEXT_PRIMARY)
                },
            ),
        ]));

        if let Some(status) = &form.status {
            lines.push(Line::default());
            let color = if status.starts_with("Save failed") {
                COLOR_ERROR
            } else {
                COLOR_TEXT_SECONDARY
            };
            lines.push(Line::from(Span::styled(
                format!("  {status}"),
                Style::default().fg(color),
            )));
        }

        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            "  Tab/Shift+Tab fields · Ctrl+N add media slot · Ctrl+X remove slot · Ctrl+S save · Esc cancel",
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .add_modifier(Modifier::ITALIC),
        )));

        Text::from(lines)
    }

    fn draw_form(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(form) = &self.form else {
            return;
        };
        let popup_area = centered_rect(80, 80, area);
        frame.render_widget(Clear, popup_area);
        let title = if form.is_editing() {
            "Edit Story"
        } else {
            "New Story"
        };
        let popup = Paragraph::new(self.form_body(form))
            .block(
                Block::default()
                    .title(Span::styled(
                        title,
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(popup, popup_area);
    }

    fn draw_confirm(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(story) = &self.confirm_delete else {
            return;
        };
        let popup_area = centered_rect(60, 24, area);
        frame.render_widget(Clear, popup_area);
        let body = Text::from(vec![
            Line::default(),
            Line::from(Span::styled(
                format!("Delete \"{}\"?", story.title),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                "This cannot be undone.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::default(),
            Line::from(Span::styled(
                "y confirm · n cancel",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            )),
        ]);
        let popup = Paragraph::new(body)
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .title(Span::styled(
                        "Confirm Delete",
                        Style::default()
                            .fg(COLOR_ERROR)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ERROR))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            );
        frame.render_widget(popup, popup_area);
    }

    fn footer_text(&self) -> String {
        match self.focused_pane {
            Pane::Filters => {
                "↑/↓ field · ←/→ borough · Enter toggle/add · Esc back · Tab panes".to_string()
            }
            Pane::Stories => {
                "j/k move · a add · e edit · d delete · r refresh · o open media · y copy id · / search · Tab panes · q quit"
                    .to_string()
            }
            Pane::Detail => "j/k scroll · g top · Tab panes · q quit".to_string(),
        }
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > width.saturating_sub(1) {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Author, Media};
    use crate::data::{MockCatalogService, MockCategoryService, MockMutationService};
    use anyhow::anyhow;
    use chrono::Utc;

    fn test_options() -> Options {
        Options {
            status_message: String::new(),
            catalog_service: Some(Arc::new(MockCatalogService)),
            category_service: Some(Arc::new(MockCategoryService)),
            mutation_service: Some(Arc::new(MockMutationService)),
            story_limit: 300,
            config_path: "~/.config/storydesk/config.yaml".to_string(),
            fetch_categories_on_start: false,
        }
    }

    fn test_model() -> Model {
        Model::new(test_options())
    }

    fn sample_story(id: &str, title: &str) -> Story {
        Story {
            id: id.into(),
            title: title.into(),
            content: "Body text.".into(),
            borough: Borough::Queens,
            categories: vec![Category {
                id: "food".into(),
                name: "Food".into(),
            }],
            media: vec![Media {
                id: format!("{id}-m"),
                url: format!("https://cdn.example.com/{id}.jpg"),
                is_thumbnail: true,
            }],
            author: Author {
                first_name: "Ada".into(),
                last_name: "Editor".into(),
            },
            created_at: Utc::now(),
        }
    }

    fn search_filters(term: &str) -> Filters {
        Filters {
            search: term.into(),
            boroughs: Vec::new(),
            categories: Vec::new(),
        }
    }

    #[test]
    fn equal_filters_do_not_refetch() {
        let mut model = test_model();
        model.set_filters(search_filters("park"));
        let issued = model.next_request_id;
        // A rebuilt but structurally identical value must not spend a
        // request slot.
        model.set_filters(search_filters("park"));
        assert_eq!(model.next_request_id, issued);
    }

    #[test]
    fn stale_response_is_discarded() {
        let mut model = test_model();
        model.set_filters(search_filters("park"));
        let first_id = model
            .pending_stories
            .as_ref()
            .map(|pending| pending.request_id)
            .unwrap();
        model.set_filters(search_filters("parks"));
        let second_id = model
            .pending_stories
            .as_ref()
            .map(|pending| pending.request_id)
            .unwrap();
        assert!(second_id > first_id);

        // The slower first fetch lands after the second: its payload must
        // never reach the list.
        model.handle_async_response(AsyncResponse::Stories {
            request_id: second_id,
            result: Ok(vec![sample_story("b", "Parks result")]),
        });
        model.handle_async_response(AsyncResponse::Stories {
            request_id: first_id,
            result: Ok(vec![sample_story("a", "Park result")]),
        });

        assert_eq!(model.stories.len(), 1);
        assert_eq!(model.stories[0].title, "Parks result");
        assert!(model.pending_stories.is_none());
    }

    #[test]
    fn late_stale_response_cannot_clobber_newer_request() {
        let mut model = test_model();
        model.set_filters(search_filters("park"));
        let first_id = model.pending_stories.as_ref().unwrap().request_id;
        model.set_filters(search_filters("parks"));
        let second_id = model.pending_stories.as_ref().unwrap().request_id;

        // Stale arrives while the newer request is still in flight.
        model.handle_async_response(AsyncResponse::Stories {
            request_id: first_id,
            result: Ok(vec![sample_story("a", "Park result")]),
        });
        assert!(model.stories.is_empty());
        assert!(model.is_loading());

        model.handle_async_response(AsyncResponse::Stories {
            request_id: second_id,
            result: Ok(vec![sample_story("b", "Parks result")]),
        });
        assert_eq!(model.stories[0].title, "Parks result");
    }

    #[test]
    fn fetch_error_keeps_previous_results() {
        let mut model = test_model();
        model.set_filters(search_filters("park"));
        let id = model.pending_stories.as_ref().unwrap().request_id;
        model.handle_async_response(AsyncResponse::Stories {
            request_id: id,
            result: Ok(vec![sample_story("a", "Park result")]),
        });
        assert_eq!(model.stories.len(), 1);

        model.set_filters(search_filters("parks"));
        let id = model.pending_stories.as_ref().unwrap().request_id;
        model.handle_async_response(AsyncResponse::Stories {
            request_id: id,
            result: Err(anyhow!("connection reset")),
        });

        assert_eq!(model.stories.len(), 1);
        assert_eq!(model.stories[0].title, "Park result");
        assert!(!model.is_loading());
        assert!(model.status_message.contains("Failed to load stories"));
    }

    #[test]
    fn clearing_filters_falls_back_to_default_listing() {
        let mut model = test_model();
        model.set_filters(search_filters("park"));
        let issued = model.next_request_id;

        model.set_filters(Filters::default());
        // Clearing criteria is a real change: it must trigger a fetch, and
        // that fetch must use the canonical default (capped) listing.
        assert_eq!(model.next_request_id, issued + 1);
        assert!(model.filters.is_empty());
        let effective = model.effective_filters();
        assert_eq!(effective, Filters::default());
        assert_eq!(
            effective.to_params(model.story_limit),
            vec![("limit".to_string(), "300".to_string())]
        );
    }

    #[test]
    fn form_reset_between_sessions() {
        let mut model = test_model();
        let story = sample_story("s1", "Editable");
        model.stories = vec![story];
        model.selected_story = 0;

        model.open_edit();
        model.toggle_replace_media();
        {
            let form = model.form.as_ref().unwrap();
            assert!(form.is_editing());
            assert!(form.replace_media());
            assert_eq!(form.selected.len(), 1);
        }

        model.close_form();
        assert!(model.form.is_none());

        model.open_create();
        let form = model.form.as_ref().unwrap();
        assert!(!form.is_editing());
        assert!(!form.replace_media());
        assert!(form.selected.is_empty());
        assert!(form.title.is_empty());
    }

    #[test]
    fn toggle_replace_media_is_inert_on_create() {
        let mut model = test_model();
        model.open_create();
        model.toggle_replace_media();
        let form = model.form.as_ref().unwrap();
        assert!(!form.replace_media());
        assert!(form.wants_media());
    }

    #[test]
    fn edit_without_replace_omits_media_fields() {
        let story = sample_story("s1", "Editable");
        let mut form = StoryForm::edit(story);
        form.thumbnail_path = "/tmp/whatever.png".to_string();
        let payload = form.build_payload().unwrap();
        assert!(payload.media.is_none());
        assert_eq!(payload.category_ids, vec!["food".to_string()]);
    }

    #[test]
    fn create_always_carries_media_fields() {
        let mut form = StoryForm::create();
        form.title = "New story".into();
        form.content = "Body".into();
        form.borough = Some(Borough::Bronx);
        let payload = form.build_payload().unwrap();
        assert!(payload.media.is_some());
    }

    #[test]
    fn edit_with_replace_carries_media_fields() {
        let story = sample_story("s1", "Editable");
        let mut form = StoryForm::edit(story);
        form.toggle_replace_media();
        let payload = form.build_payload().unwrap();
        assert!(payload.media.is_some());
    }

    #[test]
    fn build_payload_validates_required_fields() {
        let mut form = StoryForm::create();
        assert!(form.build_payload().is_err());
        form.title = "Title".into();
        assert!(form.build_payload().is_err());
        form.content = "Body".into();
        assert!(form.build_payload().is_err());
        form.borough = Some(Borough::Brooklyn);
        assert!(form.build_payload().is_ok());
    }

    #[test]
    fn media_slot_ids_are_never_reused() {
        let mut form = StoryForm::create();
        form.add_media_slot();
        form.add_media_slot();
        let keys: Vec<&str> = form.extra_slots.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["media_1", "media_2"]);

        form.active = FormCursor::Extra(0);
        form.remove_active_slot();
        form.add_media_slot();
        let keys: Vec<&str> = form.extra_slots.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["media_2", "media_3"]);
    }

    #[test]
    fn submit_is_a_noop_while_previous_submission_pends() {
        let mut model = test_model();
        model.open_create();
        {
            let form = model.form.as_mut().unwrap();
            form.title = "New".into();
            form.content = "Body".into();
            form.borough = Some(Borough::Queens);
        }
        model.submit_form();
        assert!(model.pending_submit.is_some());
        let issued = model.next_request_id;

        model.submit_form();
        assert_eq!(model.next_request_id, issued);
    }

    #[test]
    fn failed_submission_keeps_form_open_for_retry() {
        let mut model = test_model();
        model.open_create();
        {
            let form = model.form.as_mut().unwrap();
            form.title = "New".into();
            form.content = "Body".into();
            form.borough = Some(Borough::Queens);
        }
        model.submit_form();
        let id = model.pending_submit.as_ref().unwrap().request_id;

        model.handle_async_response(AsyncResponse::Submit {
            request_id: id,
            result: Err(anyhow!("validation rejected")),
        });

        let form = model.form.as_ref().expect("form stays open");
        assert!(form.status.as_deref().unwrap().contains("Save failed"));
        assert_eq!(form.title, "New");
        assert!(model.pending_submit.is_none());
    }

    #[test]
    fn successful_submission_closes_form_and_refreshes() {
        let mut model = test_model();
        model.open_create();
        {
            let form = model.form.as_mut().unwrap();
            form.title = "New".into();
            form.content = "Body".into();
            form.borough = Some(Borough::Queens);
        }
        model.submit_form();
        let id = model.pending_submit.as_ref().unwrap().request_id;

        model.handle_async_response(AsyncResponse::Submit {
            request_id: id,
            result: Ok(sample_story("created", "New")),
        });

        assert!(model.form.is_none());
        assert!(model.pending_stories.is_some());
    }

    #[test]
    fn failed_delete_leaves_list_unchanged() {
        let mut model = test_model();
        model.stories = vec![sample_story("s1", "Keep me")];
        model.selected_story = 0;

        model.request_delete();
        assert!(model.confirm_delete.is_some());
        model.confirm_delete_story();
        let id = model.pending_delete.as_ref().unwrap().request_id;

        model.handle_async_response(AsyncResponse::Delete {
            request_id: id,
            story_id: "s1".into(),
            result: Err(anyhow!("forbidden")),
        });

        assert_eq!(model.stories.len(), 1);
        assert!(model.status_message.contains("Failed to delete"));
        assert!(model.pending_delete.is_none());
    }

    #[test]
    fn borough_toggle_keeps_canonical_order() {
        let mut model = test_model();
        model.borough_cursor = 3; // Queens
        model.toggle_filter_borough();
        model.borough_cursor = 0; // Brooklyn
        model.toggle_filter_borough();
        assert_eq!(
            model.filters.boroughs,
            vec![Borough::Brooklyn, Borough::Queens]
        );
    }

    #[test]
    fn truncate_respects_display_width() {
        assert_eq!(truncate_to_width("short", 10), "short");
        let cut = truncate_to_width("a very long story title", 10);
        assert!(cut.ends_with('…'));
        assert!(UnicodeWidthStr::width(cut.as_str()) <= 10);
        assert_eq!(truncate_to_width("anything", 0), "");
    }
}
