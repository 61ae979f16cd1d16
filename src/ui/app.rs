use std::io::stdout;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tui_widgets::popup::PopupState;

use crate::api::{AdminApi, Campaign, UploadFile};
use crate::config::{self, Config, UiColors};
use crate::import::wizard::{ImportWizard, Stage};
use crate::import::{self, ImportError};
use crate::notify::{Dismissal, NotificationCenter};
use crate::page::PageModel;
use crate::refresh::{RefreshCoordinator, ReloadRequest};
use crate::selection::{HeaderState, SelectionEvent};
use crate::shared::lock;

use super::draw;
use super::edit::LineEditor;

/// Everything the panel reacts to. Keys and mouse clicks are translated into
/// these before anything changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Quit,
    NextPage,
    PrevPage,
    CursorDown,
    CursorUp,
    ToggleRow,
    ToggleAll,
    DeleteSelected,
    DeleteRow,
    RefreshPage,
    ReloadAll,
    OpenImport,
    ToggleLog,
    Confirm(Dismissal),
    DismissToast(u64),
    Wizard(WizardEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEvent {
    Next,
    Prev,
    CycleNext,
    CyclePrev,
    Confirm,
    Back,
    Skip,
    Retry,
    Close,
    Input(KeyEvent),
}

/// The import wizard as shown in its popup
pub struct WizardView {
    pub state: Arc<Mutex<ImportWizard>>,
    /// Highlighted column in the mapping step, campaign in the campaign step
    pub cursor: usize,
    pub path: LineEditor,
}

impl WizardView {
    fn new(wizard: ImportWizard) -> Self {
        Self {
            state: Arc::new(Mutex::new(wizard)),
            cursor: 0,
            path: LineEditor::default(),
        }
    }
}

/// Rows the wizard cursor moves over in the current stage
fn wizard_list_len(wizard: &ImportWizard) -> usize {
    match wizard.stage() {
        Stage::Analyzed | Stage::Mapped => wizard.session().map_or(0, |s| s.columns.len()),
        // First entry is "no campaign"
        Stage::Previewed | Stage::CampaignSelected => wizard.campaigns().len() + 1,
        _ => 0,
    }
}

fn campaign_at(wizard: &ImportWizard, cursor: usize) -> Option<Campaign> {
    cursor
        .checked_sub(1)
        .and_then(|index| wizard.campaigns().get(index).cloned())
}

pub struct App<'a, A> {
    pub config: &'a Config,
    runtime: Handle,
    api: Arc<A>,
    pub center: NotificationCenter,
    refresh: Arc<RefreshCoordinator>,
    reloads: mpsc::UnboundedReceiver<ReloadRequest>,
    pub pages: Vec<Arc<PageModel<A>>>,
    pub active: usize,
    cursors: Vec<usize>,
    pub wizard: Option<WizardView>,
    pub modal_popup: PopupState,
    /// Where each toast was drawn last frame
    pub toast_areas: Vec<(u64, Rect)>,
    pub show_log: bool,
}

impl<'a, A: AdminApi + 'static> App<'a, A> {
    /// Mount every configured page and start loading them. Async work runs on
    /// `runtime`; the terminal loop itself stays synchronous.
    pub fn new(config: &'a Config, api: A, runtime: Handle) -> Self {
        let api = Arc::new(api);
        let center = NotificationCenter::new(&config.notifications);
        let (refresh, reloads) = RefreshCoordinator::new(config.refresh.reload_delay);
        let refresh = Arc::new(refresh);

        let pages: Vec<_> = config
            .pages
            .iter()
            .map(|page| PageModel::mount(page.clone(), Arc::clone(&api), &center, &refresh))
            .collect();
        if let Some(first) = pages.first() {
            refresh.set_current_path(first.config.path.clone());
        }

        let app = Self {
            config,
            runtime,
            api,
            center,
            refresh,
            reloads,
            cursors: vec![0; pages.len()],
            pages,
            active: 0,
            wizard: None,
            modal_popup: PopupState::default(),
            toast_areas: Vec::new(),
            show_log: false,
        };
        for index in 0..app.pages.len() {
            app.load_page(index);
        }
        app
    }

    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop<B>(&mut self, terminal: &mut Terminal<B>) -> Result<()>
    where
        B: ratatui::backend::Backend,
    {
        loop {
            self.tick();
            draw::render(terminal, self)?;

            if event::poll(Duration::from_millis(250))? {
                match event::read()? {
                    Event::Key(key) => {
                        if self.handle_key(key) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Resize(_, _) => {}
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Housekeeping between frames: expire toasts and serve reload requests
    fn tick(&mut self) {
        self.center.prune(Instant::now());
        while let Ok(request) = self.reloads.try_recv() {
            self.reload_all(&request.reason);
        }
        for (index, page) in self.pages.iter().enumerate() {
            let rows = page.row_count();
            let cursor = &mut self.cursors[index];
            *cursor = (*cursor).min(rows.saturating_sub(1));
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        // Ctrl+C always quits
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
        {
            return true;
        }

        match self.event_for_key(key) {
            Some(event) => self.dispatch(event),
            None => false,
        }
    }

    fn event_for_key(&self, key: KeyEvent) -> Option<AppEvent> {
        let keys = &self.config.keys;

        // An open confirmation swallows every other key
        if self.center.pending_confirm().is_some() {
            let modal = &keys.modal;
            return if key_matches_any(&key, &modal.confirm) {
                Some(AppEvent::Confirm(Dismissal::Confirm))
            } else if key_matches_any(&key, &modal.cancel) {
                Some(AppEvent::Confirm(Dismissal::Cancel))
            } else if key_matches_any(&key, &modal.close) {
                Some(AppEvent::Confirm(Dismissal::Close))
            } else {
                None
            };
        }

        if let Some(view) = &self.wizard {
            return self.wizard_event_for_key(view, key).map(AppEvent::Wizard);
        }

        let global = &keys.global;
        let table = &keys.table;
        let event = if key_matches_any(&key, &global.quit) {
            AppEvent::Quit
        } else if key_matches_any(&key, &global.next_page) {
            AppEvent::NextPage
        } else if key_matches_any(&key, &global.prev_page) {
            AppEvent::PrevPage
        } else if key_matches_any(&key, &global.reload) {
            AppEvent::ReloadAll
        } else if key_matches_any(&key, &global.import) {
            AppEvent::OpenImport
        } else if key_matches_any(&key, &global.log) {
            AppEvent::ToggleLog
        } else if key_matches_any(&key, &table.next) {
            AppEvent::CursorDown
        } else if key_matches_any(&key, &table.prev) {
            AppEvent::CursorUp
        } else if key_matches_any(&key, &table.toggle) {
            AppEvent::ToggleRow
        } else if key_matches_any(&key, &table.toggle_all) {
            AppEvent::ToggleAll
        } else if key_matches_any(&key, &table.delete_selected) {
            AppEvent::DeleteSelected
        } else if key_matches_any(&key, &table.delete_row) {
            AppEvent::DeleteRow
        } else if key_matches_any(&key, &table.refresh) {
            AppEvent::RefreshPage
        } else {
            return None;
        };
        Some(event)
    }

    fn wizard_event_for_key(&self, view: &WizardView, key: KeyEvent) -> Option<WizardEvent> {
        let keys = &self.config.keys.wizard;
        if key_matches_any(&key, &keys.close) {
            return Some(WizardEvent::Close);
        }
        if key_matches_any(&key, &keys.confirm) {
            return Some(WizardEvent::Confirm);
        }
        // The path input takes every other key
        if lock(&view.state).stage() == Stage::Upload {
            return Some(WizardEvent::Input(key));
        }

        let event = if key_matches_any(&key, &keys.next) {
            WizardEvent::Next
        } else if key_matches_any(&key, &keys.prev) {
            WizardEvent::Prev
        } else if key_matches_any(&key, &keys.cycle_next) {
            WizardEvent::CycleNext
        } else if key_matches_any(&key, &keys.cycle_prev) {
            WizardEvent::CyclePrev
        } else if key_matches_any(&key, &keys.back) {
            WizardEvent::Back
        } else if key_matches_any(&key, &keys.skip) {
            WizardEvent::Skip
        } else if key_matches_any(&key, &keys.retry) {
            WizardEvent::Retry
        } else {
            return None;
        };
        Some(event)
    }

    /// A click outside the confirmation dialog dismisses it
    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if !matches!(mouse.kind, MouseEventKind::Down(_)) {
            return;
        }
        if self.center.pending_confirm().is_none() {
            let clicked = self
                .toast_areas
                .iter()
                .find(|(_, area)| area.contains((mouse.column, mouse.row).into()))
                .map(|(id, _)| *id);
            if let Some(id) = clicked {
                self.dispatch(AppEvent::DismissToast(id));
            }
            return;
        }
        let inside = self
            .modal_popup
            .area()
            .is_some_and(|area| area.contains((mouse.column, mouse.row).into()));
        if !inside {
            self.dispatch(AppEvent::Confirm(Dismissal::OutsideClick));
        }
    }

    /// Apply one event. Returns true when the panel should quit.
    pub fn dispatch(&mut self, event: AppEvent) -> bool {
        debug!(?event, "dispatch");
        match event {
            AppEvent::Quit => return true,
            AppEvent::NextPage => self.switch_page(1),
            AppEvent::PrevPage => self.switch_page(-1),
            AppEvent::CursorDown => self.move_cursor(1),
            AppEvent::CursorUp => self.move_cursor(-1),
            AppEvent::ToggleRow => self.toggle_current_row(),
            AppEvent::ToggleAll => self.toggle_all(),
            AppEvent::DeleteSelected => self.delete_selected(),
            AppEvent::DeleteRow => self.delete_current_row(),
            AppEvent::RefreshPage => self.load_page(self.active),
            AppEvent::ReloadAll => self.reload_all("requested from the panel"),
            AppEvent::OpenImport => self.open_wizard(),
            AppEvent::ToggleLog => self.show_log = !self.show_log,
            AppEvent::Confirm(how) => {
                if self.center.resolve(how).is_none() {
                    debug!(?how, "no confirmation pending");
                }
            }
            AppEvent::DismissToast(id) => {
                self.center.dismiss(id);
                self.toast_areas.retain(|(shown, _)| *shown != id);
            }
            AppEvent::Wizard(event) => self.handle_wizard_event(event),
        }
        false
    }

    // =========================================================================
    // Pages
    // =========================================================================

    pub fn current_page(&self) -> Option<&Arc<PageModel<A>>> {
        self.pages.get(self.active)
    }

    pub fn cursor(&self) -> usize {
        self.cursors.get(self.active).copied().unwrap_or(0)
    }

    fn switch_page(&mut self, delta: isize) {
        if self.pages.is_empty() {
            return;
        }
        let len = self.pages.len() as isize;
        self.active = (self.active as isize + delta).rem_euclid(len) as usize;
        let path = self.pages[self.active].config.path.clone();
        self.refresh.set_current_path(path);
    }

    fn move_cursor(&mut self, delta: isize) {
        let Some(page) = self.current_page() else {
            return;
        };
        let rows = page.row_count();
        if rows == 0 {
            return;
        }
        let cursor = &mut self.cursors[self.active];
        *cursor = (*cursor as isize + delta).clamp(0, rows as isize - 1) as usize;
    }

    fn toggle_current_row(&mut self) {
        let Some(page) = self.current_page() else {
            return;
        };
        let Some(id) = page.row_id(self.cursor()) else {
            return;
        };
        let checked = !page.bulk.is_selected(&id);
        page.bulk.apply(SelectionEvent::Toggled { id, checked });
    }

    fn toggle_all(&mut self) {
        let Some(page) = self.current_page() else {
            return;
        };
        let checked = page.bulk.header_state() != HeaderState::Checked;
        page.bulk.apply(SelectionEvent::ToggledAll { checked });
    }

    fn delete_selected(&mut self) {
        let Some(page) = self.current_page() else {
            return;
        };
        let page = Arc::clone(page);
        self.runtime.spawn(async move {
            let outcome = page.bulk.request_delete().await;
            debug!(page = %page.config.key, ?outcome, "bulk delete finished");
        });
    }

    fn delete_current_row(&mut self) {
        let Some(page) = self.current_page() else {
            return;
        };
        let Some(id) = page.row_id(self.cursor()) else {
            return;
        };
        let page = Arc::clone(page);
        self.runtime.spawn(async move {
            let outcome = page.delete_row(&id).await;
            debug!(page = %page.config.key, %id, ?outcome, "row delete finished");
        });
    }

    fn load_page(&self, index: usize) {
        let Some(page) = self.pages.get(index) else {
            return;
        };
        let page = Arc::clone(page);
        let center = self.center.clone();
        self.runtime.spawn(async move {
            if let Err(err) = page.load().await {
                center.error(format!(
                    "Could not load {}: {}",
                    page.config.title,
                    err.user_message()
                ));
            }
        });
    }

    /// Full reload: every page is fetched again and loses its selection
    fn reload_all(&self, reason: &str) {
        info!(%reason, "reloading all pages");
        for page in &self.pages {
            let page = Arc::clone(page);
            let center = self.center.clone();
            self.runtime.spawn(async move {
                if let Err(err) = page.reload().await {
                    center.error(format!(
                        "Could not load {}: {}",
                        page.config.title,
                        err.user_message()
                    ));
                }
            });
        }
    }

    // =========================================================================
    // Import wizard
    // =========================================================================

    fn open_wizard(&mut self) {
        if self.wizard.is_none() {
            self.wizard = Some(WizardView::new(ImportWizard::new(&self.config.import)));
        }
    }

    fn handle_wizard_event(&mut self, event: WizardEvent) {
        let Some(view) = self.wizard.as_mut() else {
            return;
        };
        let state = Arc::clone(&view.state);
        let stage = lock(&state).stage();

        match event {
            WizardEvent::Close => {
                // A running request is abandoned, its answer is dropped
                lock(&state).reset();
                self.wizard = None;
            }
            WizardEvent::Input(key) => {
                view.path.handle_key_event(key);
            }
            WizardEvent::Next | WizardEvent::Prev => {
                let len = wizard_list_len(&lock(&state));
                if len > 0 {
                    view.cursor = if event == WizardEvent::Next {
                        (view.cursor + 1).min(len - 1)
                    } else {
                        view.cursor.saturating_sub(1)
                    };
                }
            }
            WizardEvent::CycleNext | WizardEvent::CyclePrev => {
                if matches!(stage, Stage::Analyzed | Stage::Mapped) {
                    let cursor = view.cursor;
                    let forward = event == WizardEvent::CycleNext;
                    let _ = import::step(&state, &self.center, |wizard| {
                        let Some(session) = wizard.session() else {
                            return Ok(());
                        };
                        let Some(column) = session.columns.get(cursor).cloned() else {
                            return Ok(());
                        };
                        let current = session.mapping.get(&column);
                        let target = if forward { current.next() } else { current.prev() };
                        wizard.assign(&column, target)
                    });
                }
            }
            WizardEvent::Confirm => self.wizard_confirm(stage),
            WizardEvent::Skip => {
                if matches!(stage, Stage::Previewed | Stage::CampaignSelected)
                    && import::step(&state, &self.center, |w| w.select_campaign(None)).is_ok()
                {
                    self.spawn_import(state);
                }
            }
            WizardEvent::Back => {
                let target = match stage {
                    Stage::Analyzed | Stage::Mapped => Some(Stage::Upload),
                    Stage::Previewed | Stage::CampaignSelected | Stage::Failed => {
                        Some(Stage::Analyzed)
                    }
                    _ => None,
                };
                if let Some(target) = target {
                    if import::step(&state, &self.center, |w| w.back_to(target)).is_ok() {
                        view.cursor = 0;
                    }
                }
            }
            WizardEvent::Retry => {
                if import::step(&state, &self.center, |w| w.retry()).is_ok() {
                    view.cursor = 0;
                }
            }
        }
    }

    fn wizard_confirm(&mut self, stage: Stage) {
        let Some(view) = self.wizard.as_mut() else {
            return;
        };
        let state = Arc::clone(&view.state);

        match stage {
            Stage::Upload => {
                let raw = view.path.value().trim().to_string();
                if raw.is_empty() {
                    self.center.warning("Enter the path of the file to import.");
                    return;
                }
                let path = config::expand_tilde(Path::new(&raw));
                let file = match UploadFile::from_path(&path) {
                    Ok(file) => file,
                    Err(err) => {
                        self.center.error(format!("{:#}", err));
                        return;
                    }
                };
                if import::step(&state, &self.center, |w| w.select_file(file)).is_ok() {
                    view.cursor = 0;
                    self.spawn_analyze(state);
                }
            }
            Stage::Analyzed | Stage::Mapped => {
                if import::step(&state, &self.center, |w| w.confirm_mapping()).is_ok() {
                    view.cursor = 0;
                    self.spawn_preview(state);
                }
            }
            Stage::Previewed => {
                let campaign = campaign_at(&lock(&state), view.cursor);
                let _ = import::step(&state, &self.center, |w| w.select_campaign(campaign));
            }
            Stage::CampaignSelected => {
                let campaign = campaign_at(&lock(&state), view.cursor);
                if import::step(&state, &self.center, |w| w.select_campaign(campaign)).is_ok() {
                    self.spawn_import(state);
                }
            }
            Stage::Done => {
                lock(&state).reset();
                self.wizard = None;
            }
            Stage::Failed => {
                let _ = import::step(&state, &self.center, |w| w.retry());
            }
            Stage::Importing => {}
        }
    }

    fn spawn_analyze(&self, state: Arc<Mutex<ImportWizard>>) {
        let api = Arc::clone(&self.api);
        let center = self.center.clone();
        self.runtime.spawn(async move {
            log_import_end("analyze", import::analyze(&state, api.as_ref(), &center).await);
        });
    }

    /// Preview, then offer the campaigns
    fn spawn_preview(&self, state: Arc<Mutex<ImportWizard>>) {
        let api = Arc::clone(&self.api);
        let center = self.center.clone();
        self.runtime.spawn(async move {
            let previewed = import::preview(&state, api.as_ref(), &center).await;
            let succeeded = previewed.is_ok();
            log_import_end("preview", previewed);
            if succeeded {
                log_import_end(
                    "campaigns",
                    import::load_campaigns(&state, api.as_ref(), &center).await,
                );
            }
        });
    }

    fn spawn_import(&self, state: Arc<Mutex<ImportWizard>>) {
        let api = Arc::clone(&self.api);
        let center = self.center.clone();
        let refresh = Arc::clone(&self.refresh);
        let refresh_page = self.config.import.refresh_page.clone();
        self.runtime.spawn(async move {
            let result =
                import::execute(&state, api.as_ref(), &center, &refresh, refresh_page.as_deref())
                    .await;
            log_import_end("execute", result);
        });
    }

    pub fn ui_colors(&self) -> &UiColors {
        &self.config.ui.colors
    }
}

/// Failures were already shown to the user
fn log_import_end<T: std::fmt::Debug>(step: &str, result: Result<T, ImportError>) {
    match result {
        Ok(value) => debug!(step, ?value, "import step finished"),
        Err(err) => debug!(step, %err, "import step stopped"),
    }
}

pub fn key_matches_any(event: &KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| key_matches_single(event, b))
}

/// Check if the key event matches a single binding string
fn key_matches_single(event: &KeyEvent, binding: &str) -> bool {
    let trimmed = binding.trim();
    if trimmed.is_empty() {
        return false;
    }

    // Disallow Ctrl/Alt/Super modifiers (we don't support them)
    let disallowed = KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER;
    if event.modifiers.intersects(disallowed) {
        return false;
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "enter" => matches!(event.code, KeyCode::Enter),
        "tab" => matches!(event.code, KeyCode::Tab),
        "backtab" | "shift+tab" => matches!(event.code, KeyCode::BackTab),
        "backspace" => matches!(event.code, KeyCode::Backspace),
        "esc" | "escape" => matches!(event.code, KeyCode::Esc),
        "space" => matches!(event.code, KeyCode::Char(' ')),
        "up" => matches!(event.code, KeyCode::Up),
        "down" => matches!(event.code, KeyCode::Down),
        "left" => matches!(event.code, KeyCode::Left),
        "right" => matches!(event.code, KeyCode::Right),
        "pageup" | "page_up" => matches!(event.code, KeyCode::PageUp),
        "pagedown" | "page_down" => matches!(event.code, KeyCode::PageDown),
        "home" => matches!(event.code, KeyCode::Home),
        "end" => matches!(event.code, KeyCode::End),
        "delete" | "del" => matches!(event.code, KeyCode::Delete),
        other => {
            if let Some(n) = other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                return (1..=12).contains(&n) && event.code == KeyCode::F(n);
            }
            // Single character - case-sensitive (r != R, since R requires Shift)
            let mut chars = trimmed.chars();
            if let (Some(first), None) = (chars.next(), chars.next()) {
                matches!(event.code, KeyCode::Char(c) if c == first)
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::api::fake::{Call, FakeApi};
    use crate::api::{RowId, TableData, TableRow};
    use crate::notify::NoticeKind;

    fn test_config() -> Config {
        config::parse(
            "[api]\nbase_url = \"http://localhost:8000\"\n",
            PathBuf::from("test.toml"),
        )
        .unwrap()
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn users(ids: &[i64]) -> TableData {
        TableData {
            columns: vec!["Email".into()],
            rows: ids
                .iter()
                .map(|id| TableRow {
                    id: RowId::from(*id),
                    cells: vec![format!("user{}@example.com", id)],
                })
                .collect(),
        }
    }

    #[test]
    fn test_key_matching() {
        let bindings = vec!["Space".to_string(), "F5".to_string(), "R".to_string()];
        assert!(key_matches_any(&key(KeyCode::Char(' ')), &bindings));
        assert!(key_matches_any(&key(KeyCode::F(5)), &bindings));
        assert!(key_matches_any(&key(KeyCode::Char('R')), &bindings));
        assert!(!key_matches_any(&key(KeyCode::Char('r')), &bindings));
        assert!(!key_matches_any(&key(KeyCode::F(6)), &bindings));

        let ctrl_r = KeyEvent::new(KeyCode::Char('R'), KeyModifiers::CONTROL);
        assert!(!key_matches_any(&ctrl_r, &bindings));
        assert!(key_matches_single(&key(KeyCode::Esc), "Escape"));
    }

    #[tokio::test]
    async fn test_switching_pages_moves_current_path() {
        let config = test_config();
        let mut app = App::new(&config, FakeApi::default(), Handle::current());
        assert_eq!(app.refresh.current_page_key().as_deref(), Some("users"));

        app.dispatch(AppEvent::NextPage);
        assert_eq!(app.refresh.current_page_key().as_deref(), Some("comments"));

        app.dispatch(AppEvent::PrevPage);
        app.dispatch(AppEvent::PrevPage);
        assert_eq!(app.active, 2);
        assert_eq!(app.refresh.current_page_key().as_deref(), Some("contacts"));
    }

    #[tokio::test]
    async fn test_row_and_header_toggles() {
        let config = test_config();
        let api = FakeApi::default();
        api.set_table("users", Ok(users(&[1, 2, 3])));
        let mut app = App::new(&config, api, Handle::current());
        app.pages[0].load().await.unwrap();

        app.dispatch(AppEvent::ToggleRow);
        app.dispatch(AppEvent::CursorDown);
        app.dispatch(AppEvent::ToggleRow);
        let page = Arc::clone(&app.pages[0]);
        assert_eq!(page.bulk.selected_ids(), vec![RowId::from(1), RowId::from(2)]);
        assert_eq!(page.bulk.header_state(), HeaderState::Indeterminate);

        app.dispatch(AppEvent::ToggleAll);
        assert_eq!(page.bulk.selection_count(), 3);
        app.dispatch(AppEvent::ToggleAll);
        assert_eq!(page.bulk.selection_count(), 0);

        // Cursor stops at the last row
        for _ in 0..5 {
            app.dispatch(AppEvent::CursorDown);
        }
        assert_eq!(app.cursor(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_bulk_delete_sends_nothing() {
        let config = test_config();
        let api = FakeApi::default();
        api.set_table("users", Ok(users(&[1, 2])));
        let mut app = App::new(&config, api, Handle::current());
        app.pages[0].load().await.unwrap();
        app.dispatch(AppEvent::ToggleAll);

        app.dispatch(AppEvent::DeleteSelected);
        let prompt = app.center.wait_for_confirm().await;
        assert_eq!(prompt.message, "Delete 2 selected items? This cannot be undone.");

        // Keys now go to the dialog
        assert_eq!(
            app.event_for_key(key(KeyCode::Esc)),
            Some(AppEvent::Confirm(Dismissal::Cancel))
        );
        app.handle_mouse(MouseEvent {
            kind: MouseEventKind::Down(crossterm::event::MouseButton::Left),
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        });
        assert!(app.center.pending_confirm().is_none());
        assert_eq!(app.pages[0].bulk.selection_count(), 2);
    }

    #[tokio::test]
    async fn test_clicking_a_toast_dismisses_it() {
        let config = test_config();
        let mut app = App::new(&config, FakeApi::default(), Handle::current());
        let id = app.center.info("Saved.");
        app.toast_areas = vec![(id, Rect::new(40, 0, 20, 3))];
        let click = |column, row| MouseEvent {
            kind: MouseEventKind::Down(crossterm::event::MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        };
        let shown = |app: &App<'_, FakeApi>| {
            app.center
                .toasts(Instant::now())
                .iter()
                .any(|toast| toast.id == id)
        };

        app.handle_mouse(click(10, 1));
        assert!(shown(&app));

        app.handle_mouse(click(45, 2));
        assert!(!shown(&app));
        assert!(app.toast_areas.is_empty());
        assert!(app.center.history().iter().any(|entry| entry.message == "Saved."));
    }

    #[tokio::test]
    async fn test_wizard_keeps_unsupported_file_out() {
        let config = test_config();
        let mut app = App::new(&config, FakeApi::default(), Handle::current());
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, "{{}}").unwrap();

        app.dispatch(AppEvent::OpenImport);
        for c in file.path().display().to_string().chars() {
            app.dispatch(AppEvent::Wizard(WizardEvent::Input(key(KeyCode::Char(c)))));
        }
        app.dispatch(AppEvent::Wizard(WizardEvent::Confirm));

        let state = Arc::clone(&app.wizard.as_ref().unwrap().state);
        assert_eq!(lock(&state).stage(), Stage::Upload);
        assert!(lock(&state).session().is_none());
        let warning = app
            .center
            .history()
            .into_iter()
            .find(|entry| entry.kind == NoticeKind::Warning)
            .unwrap();
        assert!(warning.message.contains("unsupported file type"));

        app.dispatch(AppEvent::Wizard(WizardEvent::Close));
        assert!(app.wizard.is_none());
    }

    #[tokio::test]
    async fn test_wizard_upload_stage_routes_keys_to_input() {
        let config = test_config();
        let mut app = App::new(&config, FakeApi::default(), Handle::current());
        app.dispatch(AppEvent::OpenImport);

        for c in "a.csv".chars() {
            let event = app.event_for_key(key(KeyCode::Char(c))).unwrap();
            app.dispatch(event);
        }
        assert_eq!(app.wizard.as_ref().unwrap().path.value(), "a.csv");
        // `q` is text here, not quit
        assert_eq!(
            app.event_for_key(key(KeyCode::Char('q'))),
            Some(AppEvent::Wizard(WizardEvent::Input(key(KeyCode::Char('q')))))
        );
    }

    #[tokio::test]
    async fn test_wizard_mapping_cycles_and_confirms() {
        let config = test_config();
        let api = FakeApi::default();
        *lock(&api.analyze) = Ok(crate::api::AnalyzeResponse {
            columns: vec!["Xyzzy".into(), "Quux".into()],
            sample: vec![],
        });
        let mut app = App::new(&config, api, Handle::current());
        app.dispatch(AppEvent::OpenImport);
        let state = Arc::clone(&app.wizard.as_ref().unwrap().state);

        lock(&state)
            .select_file(UploadFile::new("leads.csv", "Xyzzy,Quux\n"))
            .unwrap();
        import::analyze(&state, app.api.as_ref(), &app.center)
            .await
            .unwrap();
        assert_eq!(lock(&state).stage(), Stage::Analyzed);

        // Neither header is recognised; confirming is refused
        app.dispatch(AppEvent::Wizard(WizardEvent::Confirm));
        assert_eq!(lock(&state).stage(), Stage::Analyzed);

        // Ignore -> Email
        app.dispatch(AppEvent::Wizard(WizardEvent::CycleNext));
        let mapped = lock(&state).session().unwrap().mapping.get("Xyzzy");
        assert!(mapped.is_identifier());

        app.dispatch(AppEvent::Wizard(WizardEvent::Confirm));
        assert_eq!(lock(&state).stage(), Stage::Mapped);
        while !app.api.calls().contains(&Call::Campaigns) {
            tokio::task::yield_now().await;
        }
    }
}
