use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode};
use pp_schema::{CycleStats, PowerplayRecord};
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::*;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

use crate::ui::{draw_ui, UiState};

/// One poll of the cache, pushed from the async side to the UI thread.
#[derive(Debug, Clone)]
pub struct DashboardUpdate {
    pub fetched_at: DateTime<Utc>,
    pub stats: CycleStats,
    pub alerts: Vec<PowerplayRecord>,
}

pub struct InspectorApp {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    ui_state: UiState,
    receiver: UnboundedReceiver<DashboardUpdate>,
    refresh_sender: Sender<()>,
    shutdown_sender: Sender<()>,
    log_receiver: Receiver<String>,
}

impl InspectorApp {
    pub fn new(
        receiver: UnboundedReceiver<DashboardUpdate>,
        refresh_sender: Sender<()>,
        shutdown_sender: Sender<()>,
        log_receiver: Receiver<String>,
    ) -> Result<Self> {
        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        crossterm::terminal::enable_raw_mode()?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(Self {
            terminal,
            ui_state: UiState::default(),
            receiver,
            refresh_sender,
            shutdown_sender,
            log_receiver,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let mut last_draw = Instant::now();

        loop {
            while let Ok(update) = self.receiver.try_recv() {
                self.ui_state.apply(update);
            }

            while let Ok(line) = self.log_receiver.try_recv() {
                self.ui_state.push_log(line);
            }

            if last_draw.elapsed() >= Duration::from_millis(100) {
                self.terminal.draw(|frame| draw_ui(frame, &self.ui_state))?;
                last_draw = Instant::now();
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::Char('r') => {
                            if let Err(err) = self.refresh_sender.send(()) {
                                error!("Failed to request refresh: {}", err);
                            } else {
                                info!("Refresh requested");
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        self.terminal.show_cursor()?;
        crossterm::terminal::disable_raw_mode()?;
        let _ = self.shutdown_sender.send(());
        Ok(())
    }
}

pub fn channel() -> (
    UnboundedSender<DashboardUpdate>,
    UnboundedReceiver<DashboardUpdate>,
) {
    unbounded_channel()
}
