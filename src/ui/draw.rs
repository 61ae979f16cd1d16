use std::time::Instant;

use anyhow::Result;
use ratatui::backend::Backend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
    Wrap,
};
use ratatui::{Frame, Terminal};
use tui_widgets::popup::Popup;

use crate::api::AdminApi;
use crate::config::RgbColor;
use crate::import::wizard::{ImportWizard, Stage};
use crate::notify::NoticeKind;
use crate::shared::lock;

use super::app::{App, WizardView};

const CONFIRM_HELP: &str = "Y/Enter: confirm  N/Esc: cancel  click outside: cancel";
const UPLOAD_HELP: &str = "Type a path  Enter: analyze  Esc: close";
const MAPPING_HELP: &str = "j/k: column  h/l: change field  Enter: preview  b: back  Esc: close";
const CAMPAIGN_HELP: &str = "j/k: campaign  Enter: choose  s: skip & import  b: back  Esc: close";
const READY_HELP: &str = "Enter: start import  s: import without campaign  b: back  Esc: close";
const IMPORTING_HELP: &str = "Importing...  Esc: close (the result is discarded)";
const DONE_HELP: &str = "Enter/Esc: close";
const FAILED_HELP: &str = "r: retry  b: back to mapping  Esc: close";

const TOAST_WIDTH: u16 = 48;

pub fn render<B: Backend, A: AdminApi + 'static>(
    terminal: &mut Terminal<B>,
    app: &mut App<'_, A>,
) -> Result<()> {
    terminal.draw(|frame| draw_frame(frame, app))?;
    Ok(())
}

fn draw_frame<A: AdminApi + 'static>(frame: &mut Frame<'_>, app: &mut App<'_, A>) {
    let size = frame.area();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(size);

    draw_header(frame, layout[0], app);
    if app.show_log {
        draw_log(frame, layout[1], app);
    } else {
        draw_table(frame, layout[1], app);
    }
    draw_footer(frame, layout[2], app);
    draw_wizard(frame, layout[1], app);
    draw_toasts(frame, layout[1], app);
    draw_confirm_modal(frame, size, app);
}

/// Page tabs on the left, the bulk delete button on the right
fn draw_header<A: AdminApi + 'static>(frame: &mut Frame<'_>, area: Rect, app: &App<'_, A>) {
    let header_style = header_text_style(app);
    let mut spans: Vec<Span> = Vec::new();
    for (index, page) in app.pages.iter().enumerate() {
        if index > 0 {
            spans.push(Span::styled(" | ", separator_style(app)));
        }
        let style = if index == app.active {
            selection_style(app)
        } else {
            header_style
        };
        spans.push(Span::styled(format!(" {} ", page.config.title), style));
    }

    let button = app.current_page().map(|page| {
        let count = page.bulk.selection_count();
        let label = if page.bulk.is_busy() {
            " DELETING... ".to_string()
        } else {
            format!(" DELETE SELECTED ({}) ", count)
        };
        let style = if page.bulk.button_enabled() {
            selection_style(app)
        } else {
            header_style.add_modifier(Modifier::DIM)
        };
        Span::styled(label, style)
    });
    let button_width = button.as_ref().map_or(0, |b| b.width() as u16);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(button_width)])
        .split(area);

    frame.render_widget(Paragraph::new(Line::from(spans)), chunks[0]);
    if let Some(button) = button {
        frame.render_widget(Paragraph::new(Line::from(button)), chunks[1]);
    }
}

fn draw_table<A: AdminApi + 'static>(frame: &mut Frame<'_>, area: Rect, app: &App<'_, A>) {
    let Some(page) = app.current_page() else {
        render_centered_words(frame, area, "No pages configured");
        return;
    };

    let table = page.table();
    let title = format!(
        " {} · {} rows · {} selected ",
        page.config.title,
        table.rows.len(),
        page.bulk.selection_count()
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(app))
        .title(Span::styled(title, header_text_style(app)));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.width == 0 || inner.height == 0 {
        return;
    }
    if table.rows.is_empty() {
        render_centered_words(frame, inner, "No rows");
        return;
    }

    let mut header_cells = vec![Cell::from(page.bulk.header_state().marker())];
    header_cells.extend(table.columns.iter().map(|c| Cell::from(c.to_uppercase())));
    let header = Row::new(header_cells).style(header_text_style(app));

    let rows: Vec<Row> = table
        .rows
        .iter()
        .map(|row| {
            let marker = if page.items.is_busy(&row.id) {
                "[~]"
            } else if page.bulk.is_selected(&row.id) {
                "[x]"
            } else {
                "[ ]"
            };
            let mut cells = vec![Cell::from(marker)];
            cells.extend(row.cells.iter().map(|c| Cell::from(c.clone())));
            Row::new(cells)
        })
        .collect();

    let mut widths = vec![Constraint::Length(3)];
    let columns = table.columns.len().max(1) as u32;
    widths.extend((0..columns).map(|_| Constraint::Ratio(1, columns)));

    let widget = Table::new(rows, widths)
        .header(header)
        .column_spacing(2)
        .highlight_style(selection_style(app));
    let mut state = TableState::default();
    state.select(Some(app.cursor()));
    frame.render_stateful_widget(widget, inner, &mut state);
}

/// Notification history, newest last
fn draw_log<A: AdminApi + 'static>(frame: &mut Frame<'_>, area: Rect, app: &App<'_, A>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(app))
        .title(Span::styled(" NOTIFICATIONS ", header_text_style(app)));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let history = app.center.history();
    if history.is_empty() {
        render_centered_words(frame, inner, "Nothing yet");
        return;
    }

    let items: Vec<ListItem> = history
        .iter()
        .map(|entry| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", entry.timestamp()), separator_style(app)),
                Span::styled(
                    format!("{:<8}", entry.kind.label()),
                    Style::default().fg(kind_color(app, entry.kind)),
                ),
                Span::raw(entry.message.clone()),
            ]))
        })
        .collect();

    let mut state = ListState::default();
    state.select(Some(items.len() - 1));
    frame.render_stateful_widget(List::new(items), inner, &mut state);
}

fn draw_footer<A: AdminApi + 'static>(frame: &mut Frame<'_>, area: Rect, app: &App<'_, A>) {
    let message: String = if app.center.pending_confirm().is_some() {
        CONFIRM_HELP.to_string()
    } else if let Some(view) = &app.wizard {
        wizard_help(lock(&view.state).stage()).to_string()
    } else {
        table_help(app)
    };
    let colors = app.ui_colors();
    let style = Style::default()
        .fg(color(colors.status_fg))
        .bg(color(colors.status_bg));

    let background = Block::default().style(Style::default().bg(color(colors.status_bg)));
    frame.render_widget(background, area);

    frame.render_widget(Paragraph::new(message).style(style), area);
}

fn table_help<A: AdminApi + 'static>(app: &App<'_, A>) -> String {
    let keys = &app.config.keys;
    let hints = [
        (&keys.table.toggle, "select"),
        (&keys.table.toggle_all, "all"),
        (&keys.table.delete_selected, "delete selected"),
        (&keys.table.delete_row, "delete row"),
        (&keys.table.refresh, "refresh"),
        (&keys.global.next_page, "next page"),
        (&keys.global.import, "import"),
        (&keys.global.log, "log"),
        (&keys.global.quit, "quit"),
    ];
    hints
        .iter()
        .filter_map(|(bindings, action)| {
            bindings.first().map(|key| format!("{}: {}", key, action))
        })
        .collect::<Vec<_>>()
        .join("  ")
}

fn wizard_help(stage: Stage) -> &'static str {
    match stage {
        Stage::Upload => UPLOAD_HELP,
        Stage::Analyzed | Stage::Mapped => MAPPING_HELP,
        Stage::Previewed => CAMPAIGN_HELP,
        Stage::CampaignSelected => READY_HELP,
        Stage::Importing => IMPORTING_HELP,
        Stage::Done => DONE_HELP,
        Stage::Failed => FAILED_HELP,
    }
}

/// Stacked in the top-right corner, newest at the bottom. A click on a toast
/// dismisses it.
fn draw_toasts<A: AdminApi + 'static>(frame: &mut Frame<'_>, area: Rect, app: &mut App<'_, A>) {
    app.toast_areas.clear();
    let toasts = app.center.toasts(Instant::now());
    if toasts.is_empty() {
        return;
    }

    let width = TOAST_WIDTH.min(area.width);
    let x = area.x + area.width.saturating_sub(width);
    let mut y = area.y;
    for toast in toasts {
        let lines = wrapped_height(&toast.message, width.saturating_sub(2));
        let height = lines + 2;
        if y + height > area.y + area.height {
            break;
        }
        let rect = Rect::new(x, y, width, height);
        frame.render_widget(Clear, rect);
        app.toast_areas.push((toast.id, rect));

        let accent = kind_color(app, toast.kind);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(accent))
            .title(Span::styled(
                format!(" {} ", toast.kind.label().to_uppercase()),
                Style::default().fg(accent).add_modifier(Modifier::BOLD),
            ));
        let paragraph = Paragraph::new(toast.message.clone())
            .block(block)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, rect);
        y += height;
    }
}

fn wrapped_height(text: &str, width: u16) -> u16 {
    if width == 0 {
        return 1;
    }
    let chars = text.chars().count() as u16;
    chars.div_ceil(width).max(1)
}

fn draw_wizard<A: AdminApi + 'static>(frame: &mut Frame<'_>, area: Rect, app: &App<'_, A>) {
    let Some(view) = &app.wizard else {
        return;
    };

    let width = (area.width.saturating_mul(4) / 5).max(area.width.min(40));
    let height = (area.height.saturating_mul(4) / 5).max(area.height.min(12));
    let modal_area = Rect::new(
        area.x + area.width.saturating_sub(width) / 2,
        area.y + area.height.saturating_sub(height) / 2,
        width,
        height,
    );
    frame.render_widget(Clear, modal_area);

    let wizard = lock(&view.state);
    let stage = wizard.stage();
    let busy = if wizard.is_busy() { " (working...)" } else { "" };
    let title = format!(" IMPORT CONTACTS · {}{} ", stage.title().to_uppercase(), busy);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style(app))
        .title(Span::styled(title, header_text_style(app)));
    let inner = block.inner(modal_area);
    frame.render_widget(block, modal_area);
    if inner.width == 0 || inner.height == 0 {
        return;
    }

    match stage {
        Stage::Upload => draw_wizard_upload(frame, inner, app, view),
        Stage::Analyzed | Stage::Mapped => draw_wizard_mapping(frame, inner, app, view, &wizard),
        Stage::Previewed | Stage::CampaignSelected => {
            draw_wizard_preview(frame, inner, app, view, &wizard)
        }
        Stage::Importing => render_centered_words(frame, inner, "Importing contacts..."),
        Stage::Done => draw_wizard_summary(frame, inner, app, &wizard),
        Stage::Failed => {
            let reason = wizard.failure().unwrap_or("The import failed.");
            let lines = vec![
                Line::from(Span::styled("IMPORT FAILED", Style::default().fg(color(app.ui_colors().error)))),
                Line::from(""),
                Line::from(reason.to_string()),
            ];
            frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);
        }
    }
}

fn draw_wizard_upload<A: AdminApi + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &App<'_, A>,
    view: &WizardView,
) {
    let label = "FILE: ";
    let accepted = app.config.import.accepted_extensions.join(", ");
    let lines = vec![
        Line::from(vec![
            Span::styled(label, header_text_style(app)),
            Span::raw(view.path.value().to_string()),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            format!("Accepted: {}", accepted),
            separator_style(app),
        )),
    ];
    frame.render_widget(Paragraph::new(lines), area);

    let x = area.x.saturating_add(label.len() as u16 + view.path.visual_cursor() as u16);
    frame.set_cursor_position((x.min(area.x + area.width.saturating_sub(1)), area.y));
}

fn draw_wizard_mapping<A: AdminApi + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &App<'_, A>,
    view: &WizardView,
    wizard: &ImportWizard,
) {
    let Some(session) = wizard.session() else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Min(0)])
        .split(area);

    let identifier = if session.mapping.has_identifier() {
        Span::styled("email or phone mapped", Style::default().fg(color(app.ui_colors().success)))
    } else {
        Span::styled(
            "map at least one column to email or phone",
            Style::default().fg(color(app.ui_colors().warning)),
        )
    };
    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(
                format!(
                    "{}  {} of {} columns mapped  ",
                    session.file.name,
                    session.mapping.mapped_count(),
                    session.columns.len()
                ),
                header_text_style(app),
            ),
            identifier,
        ])),
        chunks[0],
    );

    let header = Row::new(vec![Cell::from("COLUMN"), Cell::from("FIELD"), Cell::from("SAMPLE")])
        .style(header_text_style(app));
    let rows: Vec<Row> = session
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let sample = session
                .sample
                .first()
                .and_then(|row| row.get(index))
                .cloned()
                .unwrap_or_default();
            let target = session.mapping.get(column);
            Row::new(vec![
                Cell::from(column.clone()),
                Cell::from(format!("< {} >", target.label())),
                Cell::from(sample),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(35),
            Constraint::Percentage(25),
            Constraint::Percentage(40),
        ],
    )
    .header(header)
    .highlight_style(selection_style(app));
    let mut state = TableState::default();
    state.select(Some(view.cursor));
    frame.render_stateful_widget(table, chunks[1], &mut state);
}

fn draw_wizard_preview<A: AdminApi + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &App<'_, A>,
    view: &WizardView,
    wizard: &ImportWizard,
) {
    let Some(session) = wizard.session() else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    // Preview rows as "field: value" lines with their warnings
    let mut lines: Vec<Line> = Vec::new();
    match &session.preview {
        Some(preview) if !preview.rows.is_empty() => {
            for (index, row) in preview.rows.iter().enumerate() {
                lines.push(Line::from(Span::styled(
                    format!("ROW {}", index + 1),
                    header_text_style(app),
                )));
                for (field, value) in &row.fields {
                    lines.push(Line::from(format!("  {}: {}", field, value)));
                }
                for warning in &row.warnings {
                    lines.push(Line::from(Span::styled(
                        format!("  ! {}", warning),
                        Style::default().fg(color(app.ui_colors().warning)),
                    )));
                }
            }
        }
        _ => lines.push(Line::from("The preview returned no rows.")),
    }
    let preview = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::RIGHT)
                .border_style(separator_style(app)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(preview, chunks[0]);

    let chosen = session.campaign.as_ref().map(|c| &c.id);
    let mut items = vec![ListItem::new("(no campaign)")];
    items.extend(wizard.campaigns().iter().map(|campaign| {
        let marker = if wizard.stage() == Stage::CampaignSelected && chosen == Some(&campaign.id) {
            "* "
        } else {
            "  "
        };
        ListItem::new(format!("{}{}", marker, campaign.name))
    }));
    let list = List::new(items)
        .block(
            Block::default()
                .title(Span::styled(" CAMPAIGN ", header_text_style(app)))
                .borders(Borders::NONE),
        )
        .highlight_style(selection_style(app));
    let mut state = ListState::default();
    state.select(Some(view.cursor));
    let list_area = Rect {
        x: chunks[1].x.saturating_add(1),
        width: chunks[1].width.saturating_sub(1),
        ..chunks[1]
    };
    frame.render_stateful_widget(list, list_area, &mut state);
}

fn draw_wizard_summary<A: AdminApi + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &App<'_, A>,
    wizard: &ImportWizard,
) {
    let Some(summary) = wizard.summary() else {
        return;
    };
    let mut lines = vec![
        Line::from(Span::styled("IMPORT FINISHED", header_text_style(app))),
        Line::from(""),
        Line::from(format!("Inserted: {}", summary.inserted)),
        Line::from(format!("Skipped:  {}", summary.skipped)),
        Line::from(format!("Failed:   {}", summary.failed)),
    ];
    if !summary.errors.is_empty() {
        lines.push(Line::from(""));
        for error in &summary.errors {
            lines.push(Line::from(Span::styled(
                error.clone(),
                Style::default().fg(color(app.ui_colors().error)),
            )));
        }
    }
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), area);
}

fn draw_confirm_modal<A: AdminApi + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &mut App<'_, A>,
) {
    let Some(prompt) = app.center.pending_confirm() else {
        return;
    };

    let body_text = Text::from(vec![
        Line::from(prompt.message),
        Line::from(""),
        Line::from(CONFIRM_HELP),
    ]);
    let title_line = Line::from(Span::styled("CONFIRM", header_text_style(app)));
    let popup = Popup::new(body_text)
        .title(title_line)
        .border_style(border_style(app));

    frame.render_stateful_widget_ref(popup, area, &mut app.modal_popup);
}

fn kind_color<A: AdminApi + 'static>(app: &App<'_, A>, kind: NoticeKind) -> Color {
    let colors = app.ui_colors();
    color(match kind {
        NoticeKind::Success => colors.success,
        NoticeKind::Error => colors.error,
        NoticeKind::Warning => colors.warning,
        NoticeKind::Info => colors.info,
    })
}

fn selection_style<A: AdminApi + 'static>(app: &App<'_, A>) -> Style {
    let colors = app.ui_colors();
    Style::default()
        .fg(color(colors.selection_fg))
        .bg(color(colors.selection_bg))
}

fn border_style<A: AdminApi + 'static>(app: &App<'_, A>) -> Style {
    let colors = app.ui_colors();
    Style::default().fg(color(colors.border))
}

fn header_text_style<A: AdminApi + 'static>(app: &App<'_, A>) -> Style {
    let colors = app.ui_colors();
    Style::default().fg(color(colors.separator))
}

fn separator_style<A: AdminApi + 'static>(app: &App<'_, A>) -> Style {
    let colors = app.ui_colors();
    Style::default().fg(color(colors.separator))
}

fn render_centered_words(frame: &mut Frame<'_>, area: Rect, text: &str) {
    if area.width == 0 || area.height == 0 {
        return;
    }

    let mut lines: Vec<Line> = text
        .split_whitespace()
        .map(|word| Line::from(word.to_string()))
        .collect();

    if lines.is_empty() {
        return;
    }

    if lines.len() as u16 > area.height {
        lines.truncate(area.height as usize);
    }

    let height = lines.len() as u16;
    let start_y = area.y + (area.height.saturating_sub(height)) / 2;
    let target = Rect {
        x: area.x,
        y: start_y,
        width: area.width,
        height,
    };

    frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), target);
}

fn color(rgb: RgbColor) -> Color {
    Color::Rgb(rgb.r, rgb.g, rgb.b)
}
