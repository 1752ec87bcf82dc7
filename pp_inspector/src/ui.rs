use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use ratatui::layout::{Constraint, Direction, Layout, Margin};
use ratatui::prelude::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Frame;

use pp_schema::{CycleStats, PowerStats, PowerplayRecord, SystemState};

use crate::app::DashboardUpdate;

pub struct UiState {
    pub fetched_at: Option<DateTime<Utc>>,
    pub stats: Option<CycleStats>,
    pub alerts: Vec<PowerplayRecord>,
    pub max_alerts: usize,
    pub logs: VecDeque<String>,
    pub max_logs: usize,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            fetched_at: None,
            stats: None,
            alerts: Vec::new(),
            max_alerts: 64,
            logs: VecDeque::new(),
            max_logs: 8,
        }
    }
}

impl UiState {
    pub fn apply(&mut self, update: DashboardUpdate) {
        self.fetched_at = Some(update.fetched_at);
        self.stats = Some(update.stats);
        self.alerts = update.alerts;
        self.alerts.truncate(self.max_alerts);
    }

    pub fn push_log<S: Into<String>>(&mut self, line: S) {
        let mut text: String = line.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        if text.is_empty() {
            return;
        }
        self.logs.push_front(text);
        while self.logs.len() > self.max_logs {
            self.logs.pop_back();
        }
    }
}

pub fn power_row(power: &str, stats: &PowerStats) -> String {
    format!(
        "{:<22} sys {:>4} ({:>3}E {:>3}F {:>3}S)  R {:>9}  U {:>9}  net {:>+10}  acq {:>+9}  upd {:>4}",
        power,
        stats.systems,
        stats.exploited,
        stats.fortified,
        stats.stronghold,
        stats.reinforcement_cp,
        stats.undermining_cp,
        stats.progress_cp,
        stats.acquisition_cp,
        stats.updated_systems,
    )
}

pub fn alert_row(record: &PowerplayRecord) -> String {
    let detail = match &record.state {
        SystemState::Controlled(control) => format!(
            "{} {} {:.1}%",
            control.power.as_deref().unwrap_or("-"),
            control.tier.as_str(),
            control.progress.unwrap_or(0.0) * 100.0,
        ),
        SystemState::Contested(conflicts) => conflicts
            .iter()
            .max_by(|a, b| a.progress.total_cmp(&b.progress))
            .map(|leader| format!("contested, {} {:.1}%", leader.power, leader.progress * 100.0))
            .unwrap_or_else(|| "contested".to_string()),
        SystemState::Unoccupied => "unoccupied".to_string(),
        SystemState::Unreported => "unreported".to_string(),
    };
    format!(
        "{} {:<28} {}",
        record.date.format("%m-%d %H:%M"),
        record.name,
        detail
    )
}

pub fn draw_ui(frame: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(16),
            Constraint::Min(5),
            Constraint::Length(8),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], state);
    draw_stats(frame, chunks[1], state);
    draw_alerts(frame, chunks[2], state);
    draw_logs(frame, chunks[3], state);
}

fn draw_header(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Powerplay Inspector");
    let status = match (&state.stats, state.fetched_at) {
        (Some(stats), Some(at)) => Span::styled(
            format!("Cycle {} as of {}", stats.cycle, at.format("%Y-%m-%d %H:%M:%S")),
            Style::default().fg(Color::Green),
        ),
        _ => Span::styled("Waiting for cache", Style::default().fg(Color::Yellow)),
    };
    let line = Line::from(vec![status, Span::raw(" | r refresh, q exit")]);
    let text = Paragraph::new(line).wrap(Wrap { trim: true });
    frame.render_widget(block, area);
    frame.render_widget(
        text,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_stats(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Cycle Stats");
    let mut lines = Vec::new();
    if let Some(stats) = &state.stats {
        lines.push(Line::from(Span::styled(
            power_row("All powers", &stats.all_powers),
            Style::default().fg(Color::Yellow),
        )));
        for (power, power_stats) in &stats.powers {
            lines.push(Line::from(Span::raw(power_row(power, power_stats))));
        }
    }
    let paragraph = Paragraph::new(lines);
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_alerts(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Alerts ({})", state.alerts.len()));
    let lines: Vec<Line> = state
        .alerts
        .iter()
        .map(|record| Line::from(Span::raw(alert_row(record))))
        .collect();
    let paragraph = Paragraph::new(lines);
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}

fn draw_logs(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().borders(Borders::ALL).title("Logs");
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|entry| Line::from(Span::raw(entry)))
        .collect();
    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
    frame.render_widget(block, area);
    frame.render_widget(
        paragraph,
        area.inner(&Margin {
            vertical: 1,
            horizontal: 1,
        }),
    );
}
