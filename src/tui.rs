// TUI Module - Terminal control panel: one gauge per LED channel
use anyhow::Result;
use crossterm::event::{poll, read, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph};
use ratatui::{Frame, Terminal};
use std::io;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

use crate::config::LampConfig;
use crate::dispatcher::{Command, Dispatch, HttpDispatcher, Reply};
use crate::panel::{Panel, PendingColor};
use crate::types::{Channel, PanelExitReason};

const INPUT_POLL: Duration = Duration::from_millis(50);

/// A finished request on its way back to the UI loop.
#[derive(Debug)]
pub enum Completion {
    Color(PendingColor, Reply),
    Rainbow(Reply),
    Status(Reply),
}

pub struct PanelApp<D: Dispatch> {
    panel: Panel,
    dispatcher: D,
    runtime: Handle,
    tx: UnboundedSender<Completion>,
    rx: UnboundedReceiver<Completion>,
    selected: usize,
    step: u8,
    coarse_step: u8,
    poll_interval: Option<Duration>,
    last_status: Option<Instant>,
    status_in_flight: bool,
    message: String,
}

impl<D: Dispatch> PanelApp<D> {
    pub fn new(config: &LampConfig, dispatcher: D, runtime: Handle) -> Self {
        let (tx, rx) = unbounded_channel();
        PanelApp {
            panel: Panel::new(config.led_count),
            dispatcher,
            runtime,
            tx,
            rx,
            selected: 0,
            step: config.slider_step,
            coarse_step: config.slider_coarse_step,
            poll_interval: (config.status_poll_ms > 0)
                .then(|| Duration::from_millis(config.status_poll_ms)),
            last_status: None,
            status_in_flight: false,
            message: "Connecting...".to_string(),
        }
    }

    // Each request runs on its own task and reports back exactly once
    fn send(&self, command: Command, wrap: impl FnOnce(Reply) -> Completion + Send + 'static) {
        let future = self.dispatcher.dispatch(command);
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            let reply = future.await;
            // The loop may already be gone on quit; the reply is abandoned then
            let _ = tx.send(wrap(reply));
        });
    }

    pub fn select(&mut self, delta: isize) {
        let count = self.panel.sliders().len();
        if count == 0 {
            return;
        }
        self.selected = (self.selected as isize + delta).rem_euclid(count as isize) as usize;
    }

    pub fn adjust(&mut self, delta: i16) {
        let Some(slider) = self.panel.sliders().get(self.selected) else {
            return;
        };
        let value = (slider.value as i16 + delta).clamp(0, 255) as u8;
        self.set_selected(value);
    }

    pub fn set_selected(&mut self, value: u8) {
        let Some(slider) = self.panel.sliders().get(self.selected) else {
            return;
        };
        if slider.value == value {
            return;
        }
        match self.panel.begin_color_change(self.selected, value) {
            Some(pending) => {
                let command = pending.command.clone();
                self.send(command, move |reply| Completion::Color(pending, reply));
            }
            None => {
                self.message = if self.panel.mode().is_color() {
                    "Slider busy".to_string()
                } else {
                    format!("Lamp is in {} mode, sliders are locked", self.panel.mode())
                };
            }
        }
    }

    pub fn rainbow(&mut self, action: &str) {
        self.message = format!("Rainbow {}...", action);
        self.send(Panel::rainbow_command(action), Completion::Rainbow);
    }

    pub fn request_status(&mut self) {
        if self.status_in_flight {
            return;
        }
        self.status_in_flight = true;
        self.last_status = Some(Instant::now());
        self.send(Command::Status, Completion::Status);
    }

    /// Periodic resync from the lamp's authoritative state.
    pub fn poll_status(&mut self) {
        let Some(interval) = self.poll_interval else {
            return;
        };
        let due = self
            .last_status
            .map_or(true, |last| last.elapsed() >= interval);
        if due {
            self.request_status();
        }
    }

    pub fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Color(pending, reply) => {
                self.panel.finish_color_change(&pending, &reply);
                if !reply.is_success() {
                    self.message = format!("Color rejected ({}), reverted", describe(&reply));
                }
            }
            Completion::Rainbow(reply) => {
                if self.panel.finish_rainbow(&reply) {
                    self.status_in_flight = false;
                    self.request_status();
                } else {
                    self.message = format!("Rainbow failed ({})", describe(&reply));
                }
            }
            Completion::Status(reply) => {
                self.status_in_flight = false;
                self.message = if self.panel.finish_status(&reply) {
                    format!("Lamp mode: {}", self.panel.mode())
                } else {
                    format!("Status failed ({})", describe(&reply))
                };
            }
        }
    }

    /// Applies every completion that has arrived so far.
    pub fn drain(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            self.apply(completion);
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<PanelExitReason> {
        let coarse = key.modifiers.contains(KeyModifiers::SHIFT);
        let step = i16::from(if coarse { self.coarse_step } else { self.step });

        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                return Some(PanelExitReason::UserQuit)
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Some(PanelExitReason::UserQuit)
            }
            KeyCode::Up | KeyCode::Char('k') => self.select(-1),
            KeyCode::Down | KeyCode::Char('j') => self.select(1),
            KeyCode::Left | KeyCode::Char('h') => self.adjust(-step),
            KeyCode::Right | KeyCode::Char('l') => self.adjust(step),
            KeyCode::PageDown => self.adjust(-(self.coarse_step as i16)),
            KeyCode::PageUp => self.adjust(self.coarse_step as i16),
            KeyCode::Home => self.set_selected(0),
            KeyCode::End => self.set_selected(255),
            KeyCode::Char('s') => self.rainbow("start"),
            KeyCode::Char('x') => self.rainbow("stop"),
            KeyCode::Char('p') => self.rainbow("pause"),
            KeyCode::Char('u') => self.request_status(),
            _ => {}
        }
        None
    }

    pub fn draw(&self, f: &mut Frame, lamp_url: &str) {
        let led_count = self.panel.sliders().iter().map(|s| s.led_id + 1).max().unwrap_or(0);
        let mut constraints = vec![Constraint::Length(3)];
        constraints.extend((0..led_count).map(|_| Constraint::Length(5)));
        constraints.push(Constraint::Min(0));
        constraints.push(Constraint::Length(3));

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(f.size());

        let mode = self.panel.mode();
        let mode_style = if mode.is_color() {
            Style::default().fg(Color::Green)
        } else {
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)
        };
        let header = Paragraph::new(Line::from(vec![
            Span::raw("Moodlamp | Mode: "),
            Span::styled(mode.to_string(), mode_style),
            Span::styled(
                "  ↑↓ select  ←→ adjust  s/x/p rainbow  u refresh  q quit",
                Style::default().fg(Color::Gray),
            ),
        ]))
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(header, chunks[0]);

        for led_id in 0..led_count {
            self.draw_led(f, chunks[1 + led_id], led_id);
        }

        let footer = Paragraph::new(format!("Lamp: {} | {}", lamp_url, self.message))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(footer, chunks[chunks.len() - 1]);
    }

    fn draw_led(&self, f: &mut Frame, area: Rect, led_id: usize) {
        let swatch = self
            .panel
            .leds()
            .get(led_id)
            .map(|c| Color::Rgb(c.r, c.g, c.b))
            .unwrap_or(Color::DarkGray);
        let block = Block::default()
            .borders(Borders::ALL)
            .title(Span::styled(format!(" LED {} ", led_id), Style::default().fg(swatch)));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1); 3])
            .split(inner);

        for (row, (index, slider)) in self
            .panel
            .sliders()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.led_id == led_id)
            .enumerate()
        {
            let color = match slider.channel {
                Channel::Red => Color::Red,
                Channel::Green => Color::Green,
                Channel::Blue => Color::Blue,
            };
            let mut style = Style::default().fg(if slider.enabled { color } else { Color::DarkGray });
            if index == self.selected {
                style = style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
            }
            let marker = if index == self.selected { '>' } else { ' ' };
            let gauge = Gauge::default()
                .gauge_style(style)
                .ratio(slider.value as f64 / 255.0)
                .label(format!("{} {} {:>3}", marker, slider.channel, slider.label));
            if let Some(area) = rows.get(row) {
                f.render_widget(gauge, *area);
            }
        }
    }
}

fn describe(reply: &Reply) -> String {
    if reply.status == 0 {
        "unreachable".to_string()
    } else {
        format!("HTTP {}", reply.status)
    }
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut PanelApp<HttpDispatcher>,
    lamp_url: &str,
) -> Result<PanelExitReason> {
    loop {
        app.drain();
        app.poll_status();
        terminal.draw(|f| app.draw(f, lamp_url))?;

        let event = match poll(INPUT_POLL).and_then(|ready| if ready { read().map(Some) } else { Ok(None) }) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "terminal input failed");
                return Ok(PanelExitReason::InputClosed);
            }
        };

        if let Some(Event::Key(key)) = event {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if let Some(reason) = app.handle_key(key) {
                return Ok(reason);
            }
        }
    }
}

pub fn run_panel(config: &LampConfig, runtime: Handle) -> Result<PanelExitReason> {
    let dispatcher = HttpDispatcher::new(&config.lamp_url)?;
    let mut app = PanelApp::new(config, dispatcher, runtime);
    app.request_status();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;

    let result = event_loop(&mut terminal, &mut app, &config.lamp_url);

    // Cleanup terminal
    terminal.show_cursor().ok();
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();

    debug!(?result, "panel closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::ScriptedDispatcher;
    use crate::types::{Mode, Rgb};
    use ratatui::backend::TestBackend;

    fn app(dispatcher: &ScriptedDispatcher) -> PanelApp<ScriptedDispatcher> {
        let config = LampConfig { status_poll_ms: 0, ..LampConfig::default() };
        PanelApp::new(&config, dispatcher.clone(), Handle::current())
    }

    async fn settle(app: &mut PanelApp<ScriptedDispatcher>) {
        let completion = app.rx.recv().await.unwrap();
        app.apply(completion);
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[tokio::test]
    async fn test_arrow_keys_move_selected_slider() {
        let dispatcher = ScriptedDispatcher::new();
        let mut app = app(&dispatcher);

        app.handle_key(key(KeyCode::Down));
        app.handle_key(KeyEvent::new(KeyCode::Right, KeyModifiers::SHIFT));
        // Slider is locked until the reply is applied
        app.handle_key(key(KeyCode::Right));
        settle(&mut app).await;

        assert_eq!(
            dispatcher.sent(),
            vec![Command::Color { id: 0, color: Rgb::new(0, 16, 0) }]
        );
        assert_eq!(app.panel.leds()[0].g, 16);
        assert!(app.panel.sliders()[1].enabled);
    }

    #[tokio::test]
    async fn test_rejected_change_is_reverted() {
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.push_reply(500, "");
        let mut app = app(&dispatcher);

        app.handle_key(key(KeyCode::End));
        assert_eq!(app.panel.leds()[0].r, 255);
        settle(&mut app).await;

        assert_eq!(app.panel.leds()[0].r, 0);
        assert_eq!(app.panel.sliders()[0].label, "0");
        assert!(app.panel.sliders()[0].enabled);
        assert!(app.message.contains("500"));
    }

    #[tokio::test]
    async fn test_rainbow_key_chains_status() {
        let dispatcher = ScriptedDispatcher::new();
        dispatcher.push_reply(200, "");
        dispatcher.push_reply(
            200,
            r#"{"mode":"rainbow","leds":[{"r":10,"g":20,"b":30},{"r":5,"g":5,"b":5}]}"#,
        );
        let mut app = app(&dispatcher);

        app.handle_key(key(KeyCode::Char('s')));
        settle(&mut app).await;
        settle(&mut app).await;

        assert_eq!(
            dispatcher.sent(),
            vec![Command::Rainbow { action: "start".to_string() }, Command::Status]
        );
        assert_eq!(app.panel.mode(), &Mode::Effect("rainbow".to_string()));

        app.handle_key(key(KeyCode::Left));
        assert_eq!(dispatcher.sent().len(), 2);
        assert!(app.message.contains("locked"));
    }

    #[tokio::test]
    async fn test_status_requests_do_not_stack() {
        let dispatcher = ScriptedDispatcher::new();
        let mut app = app(&dispatcher);

        app.request_status();
        app.request_status();
        assert_eq!(dispatcher.sent().len(), 1);

        settle(&mut app).await;
        app.request_status();
        assert_eq!(dispatcher.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_quit_keys() {
        let dispatcher = ScriptedDispatcher::new();
        let mut app = app(&dispatcher);
        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Some(PanelExitReason::UserQuit));
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(PanelExitReason::UserQuit)
        );
        assert_eq!(app.handle_key(key(KeyCode::Char('z'))), None);
    }

    #[tokio::test]
    async fn test_draw_shows_labels() {
        let dispatcher = ScriptedDispatcher::new();
        let app = app(&dispatcher);
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        terminal.draw(|f| app.draw(f, "http://lamp.test")).unwrap();

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains("LED 0"));
        assert!(text.contains("LED 1"));
        assert!(text.contains("http://lamp.test"));
    }
}
