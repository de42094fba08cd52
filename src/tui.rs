//! TUI layer using ratatui and crossterm
//!
//! Three columns: the callers of the declarations shown on each row, the diff
//! itself, and the calls each displayed line makes. Network work runs on
//! worker threads that report back over a channel.

use crate::annotate::{CallerBlock, FileSidebars, LabelWidths, PopupKind, PopupTarget, SidebarEntry};
use crate::client::{GitHubClient, HttpBackend, ReviewBackend};
use crate::config::Config;
use crate::diff::{RenderedFile, RowKind};
use crate::poll::CancelToken;
use crate::popup::{BackendDetails, DetailSource, DetailView, PopupRequests, PopupTicket};
use crate::session::{LoadOptions, LoadStage, ReviewSession, Services};
use crate::storage::Storage;
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use tui_textarea::TextArea;

/// What the viewer opens with
pub enum Start {
    /// A GitHub pull request; without a URL the viewer asks for one
    PullRequest { url: Option<String>, refresh: bool },
    /// A review already built from local files
    Local {
        session: ReviewSession,
        details: Arc<dyn DetailSource>,
    },
}

enum WorkerEvent {
    Progress {
        load: u64,
        stage: LoadStage,
    },
    Loaded {
        load: u64,
        result: Result<ReviewSession, String>,
    },
    Detail {
        ticket: PopupTicket,
        target: PopupTarget,
        result: Result<String, String>,
    },
}

struct Popup {
    target: PopupTarget,
    view: Option<DetailView>,
    error: Option<String>,
    scroll: usize,
}

/// Application state
pub struct App {
    config: Config,
    widths: LabelWidths,
    remote: bool,

    // Review state
    session: Option<ReviewSession>,
    sidebars: Vec<Option<FileSidebars>>,
    details: Option<Arc<dyn DetailSource>>,
    current_file_idx: usize,
    current_row_idx: usize,
    selected_entry: usize,

    // UI state
    status: String,
    show_help: bool,
    popup: Option<Popup>,
    prompt: Option<TextArea<'static>>,

    // Workers
    requests: PopupRequests,
    load_token: Option<CancelToken>,
    load_generation: u64,
    tx: Sender<WorkerEvent>,
    rx: Receiver<WorkerEvent>,
}

impl App {
    pub fn new(config: Config, remote: bool) -> Self {
        let (tx, rx) = unbounded();
        Self {
            widths: config.label_widths(),
            config,
            remote,
            session: None,
            sidebars: Vec::new(),
            details: None,
            current_file_idx: 0,
            current_row_idx: 0,
            selected_entry: 0,
            status: String::new(),
            show_help: false,
            popup: None,
            prompt: None,
            requests: PopupRequests::default(),
            load_token: None,
            load_generation: 0,
            tx,
            rx,
        }
    }

    fn install_session(&mut self, session: ReviewSession, details: Option<Arc<dyn DetailSource>>) {
        self.sidebars = session
            .rendered
            .files
            .iter()
            .map(|file| session.sidebars(&file.name, self.widths))
            .collect();
        self.status = format!(
            "{}: {} file(s), {} call(s)",
            session.title(),
            session.rendered.files.len(),
            session.calls.len()
        );
        self.session = Some(session);
        self.details = details;
        self.current_file_idx = 0;
        self.current_row_idx = 0;
        self.selected_entry = 0;
    }

    fn current_file(&self) -> Option<&RenderedFile> {
        self.session
            .as_ref()
            .and_then(|s| s.rendered.files.get(self.current_file_idx))
    }

    fn current_sidebars(&self) -> Option<&FileSidebars> {
        self.sidebars.get(self.current_file_idx)?.as_ref()
    }

    fn row_count(&self) -> usize {
        self.current_file().map(|f| f.rows.len()).unwrap_or(0)
    }

    fn new_line_at(&self, row: usize) -> Option<u32> {
        self.current_file()?.rows.get(row)?.new_cell.trim().parse().ok()
    }

    /// Annotations of the current row: its callers first, then its callees
    fn row_entries(&self) -> Vec<&SidebarEntry> {
        let Some(sidebars) = self.current_sidebars() else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        if let Some(block) = sidebars.caller_block_at(self.current_row_idx) {
            entries.extend(block.entries.iter());
        }
        if let Some(cell) = self
            .new_line_at(self.current_row_idx)
            .and_then(|n| sidebars.callee_cell_at(n))
        {
            entries.extend(cell.entries.iter());
        }
        entries
    }

    fn selected(&self) -> Option<&SidebarEntry> {
        self.row_entries().get(self.selected_entry).copied()
    }

    fn cycle_selection(&mut self) {
        let count = self.row_entries().len();
        if count > 0 {
            self.selected_entry = (self.selected_entry + 1) % count;
        }
    }

    fn move_to_row(&mut self, row: usize) {
        self.current_row_idx = row.min(self.row_count().saturating_sub(1));
        self.selected_entry = 0;
    }

    fn navigate_up(&mut self) {
        self.move_to_row(self.current_row_idx.saturating_sub(1));
    }

    fn navigate_down(&mut self) {
        self.move_to_row(self.current_row_idx + 1);
    }

    fn next_file(&mut self) {
        if self.current_file_idx + 1 < self.sidebars.len() {
            self.current_file_idx += 1;
            self.move_to_row(0);
        }
    }

    fn prev_file(&mut self) {
        if self.current_file_idx > 0 {
            self.current_file_idx -= 1;
            self.move_to_row(0);
        }
    }

    fn spawn_load(&mut self, url: String, refresh: bool) {
        if let Some(previous) = self.load_token.take() {
            previous.cancel();
        }
        self.load_generation += 1;
        let load = self.load_generation;
        let token = CancelToken::new();
        self.load_token = Some(token.clone());
        self.status = format!("Opening {}", url);

        let tx = self.tx.clone();
        let config = self.config.clone();
        thread::spawn(move || {
            let backend = HttpBackend::new(config.backend_url.clone(), config.request_timeout_secs);
            let diffs = GitHubClient::new(config.github_api_url.clone(), config.request_timeout_secs)
                .with_token(config.github_token.clone());
            let cache = match Storage::open_default() {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(error = %e, "cache unavailable");
                    None
                }
            };
            let services = Services {
                backend: &backend,
                diffs: &diffs,
                cache: cache.as_ref(),
            };
            let options = LoadOptions {
                policy: config.retry_policy(),
                refresh,
            };

            let progress = tx.clone();
            let result = ReviewSession::load(&url, services, options, &token, |stage| {
                let _ = progress.send(WorkerEvent::Progress { load, stage });
            })
            .map_err(|e| format!("{:#}", e));
            let _ = tx.send(WorkerEvent::Loaded { load, result });
        });
    }

    fn open_target(&mut self, target: PopupTarget) {
        let Some(details) = self.details.clone() else {
            self.status = "Nothing to show until the review is loaded".to_string();
            return;
        };
        let ticket = self.requests.issue();
        self.popup = Some(Popup {
            target: target.clone(),
            view: None,
            error: None,
            scroll: 0,
        });

        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = details.fetch(&target).map_err(|e| format!("{:#}", e));
            let _ = tx.send(WorkerEvent::Detail {
                ticket,
                target,
                result,
            });
        });
    }

    fn open_selected(&mut self) {
        if let Some(target) = self.selected().map(|e| e.target.clone()) {
            self.open_target(target);
        }
    }

    fn open_file_header(&mut self) {
        if let Some(target) = self.current_sidebars().map(|s| s.header.clone()) {
            self.open_target(target);
        } else if self.current_file().is_some() {
            self.status = "Renamed files have no detail view".to_string();
        }
    }

    fn close_popup(&mut self) {
        self.popup = None;
        self.requests.invalidate();
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress { load, stage } if load == self.load_generation => {
                self.status = stage.to_string();
            }
            WorkerEvent::Loaded { load, result } if load == self.load_generation => {
                self.load_token = None;
                match result {
                    Ok(session) => {
                        let details = session.review_id.map(|review| {
                            let backend: Arc<dyn ReviewBackend> = Arc::new(HttpBackend::new(
                                self.config.backend_url.clone(),
                                self.config.request_timeout_secs,
                            ));
                            Arc::new(BackendDetails::new(backend, review)) as Arc<dyn DetailSource>
                        });
                        self.install_session(session, details);
                    }
                    Err(e) => self.status = format!("Error: {}", e),
                }
            }
            WorkerEvent::Progress { .. } | WorkerEvent::Loaded { .. } => {
                debug!("dropping event of a superseded load");
            }
            WorkerEvent::Detail {
                ticket,
                target,
                result,
            } => {
                if !self.requests.is_current(&ticket) {
                    debug!(path = %target.path, "dropping stale detail response");
                    return;
                }
                if let Some(popup) = self.popup.as_mut() {
                    match result {
                        Ok(text) => {
                            let view = DetailView::build(&text, &target, self.config.popup_slack);
                            popup.scroll = view.scroll;
                            popup.view = Some(view);
                        }
                        Err(e) => popup.error = Some(e),
                    }
                }
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.handle_worker_event(event);
        }
    }

    fn handle_input(&mut self, key: KeyEvent) -> Result<bool> {
        if self.prompt.is_some() {
            self.handle_prompt_input(key);
            return Ok(false);
        }
        if self.popup.is_some() {
            self.handle_popup_input(key);
            return Ok(false);
        }
        self.handle_normal_input(key)
    }

    fn handle_normal_input(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => {
                if let Some(token) = self.load_token.take() {
                    token.cancel();
                }
                return Ok(true);
            }
            KeyCode::Char('?') => self.show_help = !self.show_help,
            KeyCode::Esc => self.show_help = false,

            // Navigation
            KeyCode::Char('j') | KeyCode::Down => self.navigate_down(),
            KeyCode::Char('k') | KeyCode::Up => self.navigate_up(),
            KeyCode::Char('n') => self.next_file(),
            KeyCode::Char('N') => self.prev_file(),
            KeyCode::Char('g') => self.move_to_row(0),
            KeyCode::Char('G') => self.move_to_row(self.row_count()),

            // Annotations
            KeyCode::Tab => self.cycle_selection(),
            KeyCode::Enter => self.open_selected(),
            KeyCode::Char('f') => self.open_file_header(),
            KeyCode::Char('o') => {
                if self.remote {
                    let mut textarea = TextArea::default();
                    textarea.set_placeholder_text("https://github.com/<owner>/<repo>/pull/<n>");
                    textarea.set_block(Block::default().borders(Borders::ALL).title(" Pull request URL "));
                    self.prompt = Some(textarea);
                } else {
                    self.status = "Local review: no pull request to open".to_string();
                }
            }

            _ => {}
        }

        Ok(false)
    }

    fn handle_popup_input(&mut self, key: KeyEvent) {
        let Some(popup) = self.popup.as_mut() else {
            return;
        };
        let len = popup.view.as_ref().map(|v| v.lines.len()).unwrap_or(0);
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => self.close_popup(),
            KeyCode::Char('j') | KeyCode::Down => {
                popup.scroll = (popup.scroll + 1).min(len.saturating_sub(1));
            }
            KeyCode::Char('k') | KeyCode::Up => popup.scroll = popup.scroll.saturating_sub(1),
            KeyCode::PageDown => popup.scroll = (popup.scroll + 20).min(len.saturating_sub(1)),
            KeyCode::PageUp => popup.scroll = popup.scroll.saturating_sub(20),
            KeyCode::Char('g') => popup.scroll = 0,
            KeyCode::Char('G') => popup.scroll = len.saturating_sub(1),
            _ => {}
        }
    }

    fn handle_prompt_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.prompt = None,
            KeyCode::Enter => {
                let url = self
                    .prompt
                    .take()
                    .map(|t| t.lines().join("").trim().to_string())
                    .unwrap_or_default();
                if !url.is_empty() {
                    self.spawn_load(url, false);
                }
            }
            _ => {
                if let Some(textarea) = self.prompt.as_mut() {
                    textarea.input(key);
                }
            }
        }
    }
}

/// Runs the TUI application
pub fn run(config: Config, start: Start) -> Result<()> {
    let mut app = match start {
        Start::PullRequest { url, refresh } => {
            let mut app = App::new(config, true);
            match url {
                Some(url) => app.spawn_load(url, refresh),
                None => {
                    app.status = "Press o to open a pull request".to_string();
                    app.handle_normal_input(KeyEvent::from(KeyCode::Char('o')))?;
                }
            }
            app
        }
        Start::Local { session, details } => {
            let mut app = App::new(config, false);
            app.install_session(session, Some(details));
            app
        }
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    result
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.drain_events();
        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_input(key)? {
                    return Ok(());
                }
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Columns
            Constraint::Length(3), // Status
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(sidebar_width(app.widths.caller)),
            Constraint::Min(20),
            Constraint::Length(sidebar_width(app.widths.callee)),
        ])
        .split(chunks[1]);

    let visible_height = (columns[1].height as usize).saturating_sub(2);
    let scroll_offset = if app.current_row_idx >= visible_height {
        app.current_row_idx - visible_height + 1
    } else {
        0
    };

    render_callers(f, app, columns[0], scroll_offset, visible_height);
    render_diff(f, app, columns[1], scroll_offset, visible_height);
    render_callees(f, app, columns[2], scroll_offset, visible_height);
    render_status(f, app, chunks[2]);

    if let Some(popup) = &app.popup {
        render_popup(f, popup);
    }
    if let Some(prompt) = &app.prompt {
        render_prompt(f, prompt);
    }
    if app.show_help {
        render_help(f);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let file_info = match (app.session.as_ref(), app.current_file()) {
        (Some(session), Some(file)) => {
            let marker = if session.index.contains(&file.name) { "" } else { " (not annotated)" };
            format!(
                " {} [{}/{}]{}",
                file.name,
                app.current_file_idx + 1,
                session.rendered.files.len(),
                marker
            )
        }
        (Some(_), None) => " No files".to_string(),
        _ => " No review loaded".to_string(),
    };

    let title = app
        .session
        .as_ref()
        .map(|s| format!(" callmap: {} ", s.title()))
        .unwrap_or_else(|| " callmap ".to_string());

    let header = Paragraph::new(file_info)
        .style(Style::default().fg(Color::Cyan))
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(header, area);
}

fn entry_style(entry: &SidebarEntry, selected: bool) -> Style {
    let style = if entry.modified {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    if selected {
        style.add_modifier(Modifier::REVERSED)
    } else {
        style
    }
}

fn render_callers(f: &mut Frame, app: &App, area: Rect, offset: usize, height: usize) {
    let selected = app.selected();
    let sidebars = app.current_sidebars();

    let items: Vec<ListItem> = (offset..app.row_count())
        .take(height)
        .map(|idx| {
            let Some(block) = sidebars.and_then(|s| s.caller_block_at(idx)) else {
                return ListItem::new("");
            };
            let glyph = if block.start_index == block.end_index {
                "─"
            } else if idx == block.start_index {
                "┌"
            } else if idx == block.end_index {
                "└"
            } else {
                "│"
            };

            // Two label lines per caller, laid over the rows of the block
            let k = idx - block.start_index;
            let span = match block.entries.get(k / 2) {
                Some(entry) => {
                    let text = if k % 2 == 0 { &entry.upper } else { &entry.lower };
                    let is_selected = selected.is_some_and(|s| std::ptr::eq(s, entry));
                    Span::styled(text.clone(), entry_style(entry, is_selected))
                }
                None => Span::raw(""),
            };
            let mut spans = vec![
                Span::styled(format!("{} ", glyph), Style::default().fg(Color::DarkGray)),
                span,
            ];
            let hidden = hidden_callers(block);
            if idx == block.end_index && hidden > 0 {
                spans.push(Span::styled(
                    format!(" +{}", hidden),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Called from "));
    f.render_widget(list, area);
}

/// Sidebar label width plus the border and glyph columns
fn sidebar_width(label: usize) -> u16 {
    u16::try_from(label).unwrap_or(u16::MAX).saturating_add(4)
}

/// Callers whose upper label falls below the last row of their block
fn hidden_callers(block: &CallerBlock) -> usize {
    let rows = block.end_index - block.start_index + 1;
    block.entries.len().saturating_sub(rows.div_ceil(2))
}

fn render_callees(f: &mut Frame, app: &App, area: Rect, offset: usize, height: usize) {
    let selected = app.selected();
    let sidebars = app.current_sidebars();

    let items: Vec<ListItem> = (offset..app.row_count())
        .take(height)
        .map(|idx| {
            let cell = app
                .new_line_at(idx)
                .and_then(|n| sidebars.and_then(|s| s.callee_cell_at(n)));
            let Some(cell) = cell else {
                return ListItem::new("");
            };

            // The selected callee takes the row when it is on it
            let Some(entry) = cell
                .entries
                .iter()
                .find(|e| selected.is_some_and(|s| std::ptr::eq(s, *e)))
                .or(cell.entries.first())
            else {
                return ListItem::new("");
            };
            let is_selected = selected.is_some_and(|s| std::ptr::eq(s, entry));
            let mut spans = vec![Span::styled(entry.upper.clone(), entry_style(entry, is_selected))];
            if cell.entries.len() > 1 {
                spans.push(Span::styled(
                    format!(" +{}", cell.entries.len() - 1),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Calls "));
    f.render_widget(list, area);
}

fn render_diff(f: &mut Frame, app: &App, area: Rect, offset: usize, height: usize) {
    let Some(file) = app.current_file() else {
        let placeholder = Paragraph::new("").block(Block::default().borders(Borders::ALL));
        f.render_widget(placeholder, area);
        return;
    };

    let items: Vec<ListItem> = file
        .rows
        .iter()
        .enumerate()
        .skip(offset)
        .take(height)
        .map(|(idx, row)| {
            let (prefix, style) = match row.kind {
                RowKind::HunkHeader => ("", Style::default().fg(Color::Cyan)),
                RowKind::Addition => ("+", Style::default().fg(Color::Green)),
                RowKind::Deletion => ("-", Style::default().fg(Color::Red)),
                RowKind::Context => (" ", Style::default()),
            };

            // Highlight current line
            let style = if idx == app.current_row_idx {
                style.add_modifier(Modifier::REVERSED)
            } else {
                style
            };

            let content = format!(
                "{:>5} {:>5} {}{}",
                row.old_cell, row.new_cell, prefix, row.content
            );
            ListItem::new(Line::from(vec![Span::styled(content, style)]))
        })
        .collect();

    let diff_list = List::new(items).block(Block::default().borders(Borders::ALL));
    f.render_widget(diff_list, area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let content = match app.selected() {
        Some(entry) => format!(" {}", entry.tooltip.replace("\n\n", ": ")),
        None if !app.status.is_empty() => format!(" {}", app.status),
        None => " j/k: navigate | n/N: files | Tab: select | Enter: open | f: file | o: open PR | ?: help | q: quit"
            .to_string(),
    };

    let status = Paragraph::new(content)
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));

    f.render_widget(status, area);
}

fn render_popup(f: &mut Frame, popup: &Popup) {
    let area = centered_rect(85, 85, f.area());
    let title = match &popup.view {
        Some(view) => format!(" {} ", view.title),
        None => format!(" {} ", popup.target.path),
    };

    let lines: Vec<Line> = match (&popup.view, &popup.error) {
        (_, Some(error)) => vec![Line::styled(error.clone(), Style::default().fg(Color::Red))],
        (Some(view), None) => view
            .lines
            .iter()
            .skip(popup.scroll)
            .map(|l| {
                let style = match (view.kind, l.kind) {
                    (_, RowKind::HunkHeader) => Style::default().fg(Color::Cyan),
                    (PopupKind::Diff, RowKind::Addition) => Style::default().fg(Color::Green),
                    (PopupKind::Diff, RowKind::Deletion) => Style::default().fg(Color::Red),
                    _ => Style::default(),
                };
                let style = if l.relevant {
                    style.bg(Color::DarkGray).add_modifier(Modifier::BOLD)
                } else {
                    style
                };
                let gutter = match view.kind {
                    PopupKind::Source => format!("{:>5} ", l.new_line.unwrap_or(0)),
                    PopupKind::Diff => format!(
                        "{:>5} {:>5} ",
                        l.old_line.map(|n| n.to_string()).unwrap_or_default(),
                        l.new_line.map(|n| n.to_string()).unwrap_or_default()
                    ),
                };
                Line::from(vec![
                    Span::styled(gutter, Style::default().fg(Color::DarkGray)),
                    Span::styled(l.text.clone(), style),
                ])
            })
            .collect(),
        (None, None) => vec![Line::raw("Loading...")],
    };

    let body = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .title_bottom(" j/k: scroll | Esc: close "),
    );

    f.render_widget(Clear, area);
    f.render_widget(body, area);
}

fn render_prompt(f: &mut Frame, prompt: &TextArea<'static>) {
    let outer = centered_rect(70, 20, f.area());
    let area = Rect {
        height: outer.height.min(3),
        ..outer
    };
    f.render_widget(Clear, area);
    f.render_widget(prompt, area);
}

fn render_help(f: &mut Frame) {
    let area = centered_rect(60, 70, f.area());

    let help_text = vec![
        "",
        "  Navigation:",
        "    j / ↓     Move down",
        "    k / ↑     Move up",
        "    n         Next file",
        "    N         Previous file",
        "    g         Go to top",
        "    G         Go to bottom",
        "",
        "  Calls:",
        "    Tab       Select next annotation on this row",
        "    Enter     Open the selected annotation",
        "    f         Open the diff of the whole file",
        "    ✎         The other file is part of this pull request",
        "",
        "  Other:",
        "    o         Open another pull request",
        "    ?         Toggle this help",
        "    q         Quit",
        "",
        "  In a detail view:",
        "    j / k     Scroll",
        "    Esc       Close",
        "",
    ];

    let help = Paragraph::new(help_text.join("\n"))
        .style(Style::default())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help ")
                .style(Style::default().bg(Color::DarkGray)),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(Clear, area);
    f.render_widget(help, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::tests::call;

    const DIFF: &str = "\
diff --git a/src/A.java b/src/A.java
--- a/src/A.java
+++ b/src/A.java
@@ -1,3 +1,3 @@
 class A {
-  void f() {}
+  void f() { b.g(); c.h(); }
 }
";

    fn app() -> App {
        let session = ReviewSession::from_parts(
            DIFF,
            vec![
                call("src/A.java", 2, "src/B.java", (10, 12)),
                call("src/A.java", 2, "src/C.java", (20, 22)),
                call("src/D.java", 5, "src/A.java", (1, 3)),
            ],
        );
        let mut app = App::new(Config::default(), false);
        app.install_session(session, None);
        app
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::from(code)
    }

    #[test]
    fn test_row_entries_and_tab_cycling() {
        let mut app = app();
        // Hunk header row: no annotations
        assert!(app.row_entries().is_empty());

        // Row 3 is the added line 2: inside the caller block and with two callees
        app.move_to_row(3);
        assert_eq!(app.row_entries().len(), 3);
        assert_eq!(app.selected().unwrap().upper, "D.java:L5");

        app.handle_input(key(KeyCode::Tab)).unwrap();
        assert_eq!(app.selected().unwrap().upper, "B.java:L10-12");
        app.handle_input(key(KeyCode::Tab)).unwrap();
        app.handle_input(key(KeyCode::Tab)).unwrap();
        assert_eq!(app.selected_entry, 0);

        app.handle_input(key(KeyCode::Char('j'))).unwrap();
        assert_eq!(app.current_row_idx, 4);
        assert_eq!(app.selected_entry, 0);
        app.handle_input(key(KeyCode::Char('G'))).unwrap();
        assert_eq!(app.current_row_idx, 4);
    }

    #[test]
    fn test_hidden_callers_of_short_blocks() {
        let session = ReviewSession::from_parts(
            DIFF,
            vec![
                call("src/D.java", 5, "src/A.java", (3, 3)),
                call("src/E.java", 6, "src/A.java", (3, 3)),
                call("src/F.java", 7, "src/A.java", (3, 3)),
            ],
        );
        let sidebars = session.sidebars("src/A.java", LabelWidths::default()).unwrap();
        let block = &sidebars.callers[0];

        // one row shows the first caller, the other two are counted
        assert_eq!(block.start_index, block.end_index);
        assert_eq!(block.entries.len(), 3);
        assert_eq!(hidden_callers(block), 2);

        let app = app();
        let wide = app.current_sidebars().unwrap().caller_block_at(1).unwrap();
        assert_eq!(hidden_callers(wide), 0);
    }

    #[test]
    fn test_sidebar_width_saturates() {
        assert_eq!(sidebar_width(27), 31);
        assert_eq!(sidebar_width(usize::MAX), u16::MAX);
        assert_eq!(sidebar_width(u16::MAX as usize - 1), u16::MAX);
    }

    #[test]
    fn test_stale_detail_response_is_dropped() {
        let mut app = app();
        let target = app.current_sidebars().unwrap().header.clone();
        app.popup = Some(Popup {
            target: target.clone(),
            view: None,
            error: None,
            scroll: 0,
        });
        let stale = app.requests.issue();
        let current = app.requests.issue();

        app.handle_worker_event(WorkerEvent::Detail {
            ticket: stale,
            target: target.clone(),
            result: Ok("old".to_string()),
        });
        assert!(app.popup.as_ref().unwrap().view.is_none());

        app.handle_worker_event(WorkerEvent::Detail {
            ticket: current,
            target,
            result: Err("file_not_found".to_string()),
        });
        assert_eq!(app.popup.as_ref().unwrap().error.as_deref(), Some("file_not_found"));

        app.handle_input(key(KeyCode::Esc)).unwrap();
        assert!(app.popup.is_none());
        assert!(!app.requests.is_current(&current));
    }

    #[test]
    fn test_superseded_load_is_ignored() {
        let mut app = App::new(Config::default(), true);
        app.load_generation = 2;

        app.handle_worker_event(WorkerEvent::Loaded {
            load: 1,
            result: Ok(ReviewSession::from_parts(DIFF, Vec::new())),
        });
        assert!(app.session.is_none());

        app.handle_worker_event(WorkerEvent::Progress {
            load: 2,
            stage: LoadStage::FetchingDiff,
        });
        assert_eq!(app.status, "Fetching pull request diff");

        app.handle_worker_event(WorkerEvent::Loaded {
            load: 2,
            result: Err("Invalid pull request URL".to_string()),
        });
        assert_eq!(app.status, "Error: Invalid pull request URL");
    }

    #[test]
    fn test_open_prompt_only_for_pull_requests() {
        let mut local = app();
        local.handle_input(key(KeyCode::Char('o'))).unwrap();
        assert!(local.prompt.is_none());

        let mut remote = App::new(Config::default(), true);
        remote.handle_input(key(KeyCode::Char('o'))).unwrap();
        assert!(remote.prompt.is_some());
        remote.handle_input(key(KeyCode::Esc)).unwrap();
        assert!(remote.prompt.is_none());
    }
}
