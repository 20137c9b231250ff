use std::{str::FromStr, time::Duration};

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode};
use futures_util::StreamExt;
use ratatui::{
    layout::{
        Constraint::{self},
        Layout, Rect,
    },
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, BarChart, Block, Borders, Cell, Chart, Dataset, Paragraph, Row, Table},
    Frame,
};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::{
    history::HistoryPoint,
    portfolio::Position,
    state::StateEvent,
    valuation::{EnrichedRow, PortfolioSnapshot},
    AppCommandEvent, AppEvent,
};

#[derive(Debug, PartialEq)]
enum Mode {
    Browse,
    Add,
}

pub struct App {
    should_quit: bool,
    rx: Receiver<AppEvent>,
    tx_cmd: Sender<AppCommandEvent>,
    positions: Vec<Position>,
    snapshot: Option<PortfolioSnapshot>,
    history: Vec<HistoryPoint>,
    selected: Option<usize>,
    mode: Mode,
    input: String,
    status: Option<String>,
}

/// Parses the add form, `TICKER SHARES BUY_PRICE`.
pub fn parse_add_input(input: &str) -> Result<AppCommandEvent, String> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let [ticker, shares, buy_price] = parts.as_slice() else {
        return Err(String::from("expected TICKER SHARES BUY_PRICE"));
    };
    let shares = Decimal::from_str(shares).map_err(|e| format!("shares: {e}"))?;
    let buy_price = Decimal::from_str(buy_price).map_err(|e| format!("buy price: {e}"))?;
    Ok(AppCommandEvent::AddPosition {
        ticker: ticker.to_string(),
        shares,
        buy_price,
    })
}

impl App {
    pub fn new(rx: Receiver<AppEvent>, tx_cmd: Sender<AppCommandEvent>) -> Self {
        Self {
            should_quit: false,
            rx,
            tx_cmd,
            positions: vec![],
            snapshot: None,
            history: vec![],
            selected: None,
            mode: Mode::Browse,
            input: String::new(),
            status: None,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut terminal = ratatui::init();
        let _ = terminal.clear();

        let mut events = EventStream::new();

        let period = Duration::from_secs_f64(1.0 / 20.0);
        let mut interval = tokio::time::interval(period);

        while !self.should_quit {
            tokio::select! {
                _ = interval.tick() => { terminal.draw(|frame| self.render(frame))?; },
                Some(Ok(event)) = events.next() => self.handle_events(event),
                Some(event) = self.rx.recv() =>
                    self.handle_app_events(event)
            }
        }

        Ok(())
    }

    fn handle_app_events(&mut self, event: AppEvent) {
        match event {
            AppEvent::State(StateEvent::Positions(positions)) => {
                self.positions = positions;
                self.clamp_selection();
            }
            AppEvent::State(StateEvent::Refreshed { snapshot, history }) => {
                self.snapshot = Some(snapshot);
                self.history = history;
                self.clamp_selection();
            }
            AppEvent::CommandRejected { reason } => {
                self.status = Some(reason);
            }
        }
    }

    fn clamp_selection(&mut self) {
        self.selected = match (self.selected, self.positions.len()) {
            (_, 0) => None,
            (Some(i), len) => Some(i.min(len - 1)),
            (None, _) => None,
        };
    }

    fn send(&mut self, cmd: AppCommandEvent) {
        if self.tx_cmd.try_send(cmd).is_err() {
            self.status = Some(String::from("engine unreachable, command dropped"));
        }
    }

    fn handle_events(&mut self, event: Event) {
        let Some(key) = event.as_key_press_event() else {
            return;
        };
        match self.mode {
            Mode::Add => match key.code {
                KeyCode::Esc => {
                    self.mode = Mode::Browse;
                    self.input.clear();
                }
                KeyCode::Enter => match parse_add_input(&self.input) {
                    Ok(cmd) => {
                        self.send(cmd);
                        self.mode = Mode::Browse;
                        self.input.clear();
                        self.status = None;
                    }
                    Err(err) => self.status = Some(err),
                },
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Char(c) => self.input.push(c),
                _ => {}
            },
            Mode::Browse => match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Char('a') => {
                    self.mode = Mode::Add;
                    self.status = None;
                }
                KeyCode::Char('r') => self.send(AppCommandEvent::Refresh),
                KeyCode::Char('d') | KeyCode::Delete => {
                    if let Some(i) = self.selected {
                        self.send(AppCommandEvent::RemovePositions { indices: vec![i] });
                    }
                }
                KeyCode::Up => {
                    self.selected = match self.selected {
                        _ if self.positions.is_empty() => None,
                        Some(i) if i > 0 => Some(i - 1),
                        Some(i) => Some(i),
                        None => Some(self.positions.len() - 1),
                    };
                }
                KeyCode::Down => {
                    self.selected = match self.selected {
                        _ if self.positions.is_empty() => None,
                        Some(i) => Some((i + 1).min(self.positions.len() - 1)),
                        None => Some(0),
                    };
                }
                _ => {}
            },
        }
    }

    fn render(&self, frame: &mut Frame) {
        let [header_area, main_area, footer_area] = Layout::vertical([
            Constraint::Length(3),
            Constraint::Fill(1),
            Constraint::Length(3),
        ])
        .areas(frame.area());

        let [left_area, right_area] =
            Layout::horizontal([Constraint::Fill(3), Constraint::Fill(2)]).areas(main_area);

        let [top_right_area, bottom_right_area] =
            Layout::vertical([Constraint::Fill(1), Constraint::Fill(1)]).areas(right_area);

        self.render_header(frame, header_area);
        self.render_table(frame, left_area);
        self.render_allocation(frame, top_right_area);
        self.render_history(frame, bottom_right_area);
        self.render_footer(frame, footer_area);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title("Portfolio Dashboard")
            .borders(Borders::ALL);
        let line = match &self.snapshot {
            Some(snapshot) => {
                let gain = snapshot.total_gain_loss();
                Line::from(vec![
                    Span::raw("Total "),
                    Span::styled(
                        format!("$ {}", snapshot.total_value.round_dp(2)),
                        Style::default().fg(Color::Yellow),
                    ),
                    Span::raw("  P/L "),
                    Span::styled(
                        format!(
                            "{} ({}%)",
                            gain.round_dp(2),
                            snapshot.total_return_pct().round_dp(2)
                        ),
                        Style::default().fg(gain_color(gain)),
                    ),
                    Span::raw(format!(
                        "  as of {}",
                        snapshot.as_of.format("%Y-%m-%d %H:%M:%S")
                    )),
                ])
            }
            None => Line::from("Waiting for first refresh"),
        };
        frame.render_widget(Paragraph::new(line).block(block), area);
    }

    fn render_table(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Holdings").borders(Borders::ALL);

        let header = Row::new(vec![
            "Ticker", "Shares", "Buy", "Price", "Value", "P/L", "Return",
        ])
        .style(Style::default().add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = match &self.snapshot {
            Some(snapshot)
                if snapshot
                    .rows
                    .iter()
                    .map(|row| &row.position)
                    .eq(self.positions.iter()) =>
            {
                snapshot.rows.iter().map(Row::from).collect()
            }
            // positions changed since the last refresh
            _ => self
                .positions
                .iter()
                .map(|p| {
                    Row::new(vec![
                        Cell::from(p.ticker.to_string()),
                        Cell::from(p.shares.to_string()),
                        Cell::from(p.buy_price.to_string()),
                        Cell::from("…"),
                    ])
                })
                .collect(),
        };
        let rows: Vec<Row> = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                if Some(i) == self.selected {
                    row.style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    row
                }
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Length(8),
                Constraint::Length(10),
                Constraint::Length(10),
                Constraint::Length(11),
                Constraint::Length(12),
                Constraint::Length(11),
                Constraint::Length(9),
            ],
        )
        .header(header)
        .block(block);
        frame.render_widget(table, area);
    }

    fn render_allocation(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Allocation %").borders(Borders::ALL);
        let Some(snapshot) = &self.snapshot else {
            frame.render_widget(Paragraph::new("No data yet").block(block), area);
            return;
        };

        let bars: Vec<(String, u64)> = snapshot
            .allocations()
            .into_iter()
            .map(|a| {
                (
                    a.ticker.to_string(),
                    a.weight_pct.round().to_u64().unwrap_or(0),
                )
            })
            .collect();
        let data: Vec<(&str, u64)> = bars.iter().map(|(t, w)| (t.as_str(), *w)).collect();

        let chart = BarChart::default()
            .block(block)
            .data(data.as_slice())
            .bar_width(6)
            .bar_gap(1)
            .max(100)
            .bar_style(Style::default().fg(Color::Blue))
            .value_style(Style::default().fg(Color::Black).bg(Color::Blue));
        frame.render_widget(chart, area);
    }

    fn render_history(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Total value").borders(Borders::ALL);

        let data = history_points(&self.history);
        if data.is_empty() {
            frame.render_widget(Paragraph::new("No history yet").block(block), area);
            return;
        }

        let end = data.iter().map(|d| d.0).reduce(f64::max).unwrap_or(0.);
        let min_value = data.iter().map(|d| d.1).reduce(f64::min).unwrap_or(0.);
        let max_value = data.iter().map(|d| d.1).reduce(f64::max).unwrap_or(0.);
        let pad = ((max_value - min_value) * 0.1).max(1.0);

        let dataset = Dataset::default()
            .data(&data)
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Yellow))
            .graph_type(ratatui::widgets::GraphType::Line);

        let chart = Chart::new(vec![dataset])
            .x_axis(
                Axis::default()
                    .title("Seconds")
                    .bounds([0., end.max(1.)])
                    .labels(vec![Line::from("0"), Line::from(format!("{end:.0}"))]),
            )
            .y_axis(
                Axis::default()
                    .title("Value")
                    .bounds([min_value - pad, max_value + pad])
                    .labels(vec![
                        Line::from(format!("{:.0}", min_value - pad)),
                        Line::from(format!("{:.0}", max_value + pad)),
                    ]),
            )
            .block(block);

        frame.render_widget(chart, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL);
        let line = match (&self.mode, &self.status) {
            (Mode::Add, Some(status)) => Line::from(vec![
                Span::raw(format!("Add> {}", self.input)),
                Span::styled(format!("  {status}"), Style::default().fg(Color::Red)),
            ]),
            (Mode::Add, None) => Line::from(format!(
                "Add> {}   (TICKER SHARES BUY_PRICE, Enter to add, Esc to cancel)",
                self.input
            )),
            (Mode::Browse, Some(status)) => {
                Line::from(Span::styled(status.clone(), Style::default().fg(Color::Red)))
            }
            (Mode::Browse, None) => Line::from(
                "'q' quit  'a' add  'd' remove selected  'r' refresh  ↑/↓ select",
            ),
        };
        frame.render_widget(Paragraph::new(line).block(block), area);
    }
}

/// Line chart points: seconds since the first entry, total value.
fn history_points(history: &[HistoryPoint]) -> Vec<(f64, f64)> {
    let Some(first) = history.first() else {
        return vec![];
    };
    history
        .iter()
        .map(|point| {
            (
                (point.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0,
                point.total_value.to_f64().unwrap_or(0.),
            )
        })
        .collect()
}

fn gain_color(gain: Decimal) -> Color {
    if gain.is_sign_negative() && !gain.is_zero() {
        Color::Red
    } else {
        Color::Green
    }
}

impl From<&EnrichedRow> for Row<'_> {
    fn from(row: &EnrichedRow) -> Self {
        let price = row
            .current_price
            .map_or("stale".to_string(), |price| price.round_dp(2).to_string());
        let cells = vec![
            Cell::from(row.position.ticker.to_string()),
            Cell::from(row.position.shares.to_string()),
            Cell::from(row.position.buy_price.round_dp(2).to_string()),
            Cell::from(price),
            Cell::from(row.position_value.round_dp(2).to_string()),
            Cell::from(row.gain_loss.round_dp(2).to_string())
                .style(Style::default().fg(gain_color(row.gain_loss))),
            Cell::from(format!("{}%", row.return_pct.round_dp(2)))
                .style(Style::default().fg(gain_color(row.gain_loss))),
        ];
        let style = if row.stale {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        Row::new(cells).style(style)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_parse_add_input() {
        let cmd = parse_add_input("aapl 10 150.5").unwrap();
        assert!(matches!(
            cmd,
            AppCommandEvent::AddPosition { ref ticker, shares, buy_price }
                if ticker == "aapl" && shares == dec!(10) && buy_price == dec!(150.5)
        ));
        assert!(parse_add_input("aapl 10").is_err());
        assert!(parse_add_input("aapl ten 150").is_err());
    }

    #[test]
    fn test_history_points() {
        let start = Utc::now();
        let history = vec![
            HistoryPoint {
                timestamp: start,
                total_value: dec!(100),
            },
            HistoryPoint {
                timestamp: start + ChronoDuration::milliseconds(2500),
                total_value: dec!(120.5),
            },
        ];
        assert_eq!(history_points(&history), vec![(0.0, 100.0), (2.5, 120.5)]);
        assert!(history_points(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_keys_send_commands() {
        let (_tx, rx) = tokio::sync::mpsc::channel(4);
        let (tx_cmd, mut rx_cmd) = tokio::sync::mpsc::channel(4);
        let mut app = App::new(rx, tx_cmd);
        app.handle_app_events(AppEvent::State(StateEvent::Positions(vec![
            Position::new("AAPL", dec!(1), dec!(10)).unwrap(),
            Position::new("MSFT", dec!(1), dec!(10)).unwrap(),
        ])));

        let press = |code: KeyCode| Event::Key(crossterm::event::KeyEvent::from(code));

        app.handle_events(press(KeyCode::Down));
        app.handle_events(press(KeyCode::Down));
        app.handle_events(press(KeyCode::Char('d')));
        assert!(matches!(
            rx_cmd.recv().await,
            Some(AppCommandEvent::RemovePositions { indices }) if indices == vec![1]
        ));

        app.handle_events(press(KeyCode::Char('a')));
        for c in "tsla 2 200".chars() {
            app.handle_events(press(KeyCode::Char(c)));
        }
        app.handle_events(press(KeyCode::Enter));
        assert!(matches!(
            rx_cmd.recv().await,
            Some(AppCommandEvent::AddPosition { ref ticker, .. }) if ticker == "tsla"
        ));
        assert_eq!(app.mode, Mode::Browse);
    }
}
