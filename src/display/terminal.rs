use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use ratatui::symbols::Marker;
use ratatui::widgets::{Axis, Bar, BarChart, BarGroup, Block, Chart, Dataset, GraphType, Paragraph};
use std::io::{self, stdout};
use std::time::Duration;
use tracing::warn;

use super::{push_spectra, RenderSink, FFT_KEY, FFT_MAX_KEY, TIME_KEY};
use crate::audio::{self, reduce_to_bands, AudioPipeline, PipelineState, DB_FLOOR};
use crate::config::Config;

/// Lowest level shown on the spectrum and band graphs
const DISPLAY_MIN_DB: f32 = -100.0;
/// Highest level shown; leaves headroom for boosted playback
const DISPLAY_MAX_DB: f32 = 20.0;

const VOLUME_STEP: f32 = 0.5;

/// Keeps the latest copy of each graph and draws them with ratatui
#[derive(Default)]
pub struct TerminalSink {
    time: Vec<f32>,
    fft: Vec<f32>,
    fft_max: Vec<f32>,
}

impl RenderSink for TerminalSink {
    fn update_graph(&mut self, data: &[f32], key: &str) {
        let target = match key {
            TIME_KEY => &mut self.time,
            FFT_KEY => &mut self.fft,
            FFT_MAX_KEY => &mut self.fft_max,
            _ => return,
        };
        target.clear();
        target.extend_from_slice(data);
    }
}

impl TerminalSink {
    pub fn render(&self, frame: &mut Frame, area: Rect, status: &str) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Percentage(30),
                Constraint::Percentage(35),
                Constraint::Min(5),
            ])
            .split(area);

        frame.render_widget(
            Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
            chunks[0],
        );
        self.render_time(frame, chunks[1]);
        self.render_fft(frame, chunks[2]);
        self.render_bands(frame, chunks[3]);
    }

    fn render_time(&self, frame: &mut Frame, area: Rect) {
        // Braille gives two points per column
        let points = decimate(&self.time, area.width as usize * 2);
        let data: Vec<(f64, f64)> = points
            .iter()
            .enumerate()
            .map(|(i, &s)| (i as f64, s.clamp(-1.0, 1.0) as f64))
            .collect();

        let chart = Chart::new(vec![Dataset::default()
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&data)])
        .block(Block::bordered().title(" time "))
        .x_axis(Axis::default().bounds([0.0, data.len().max(1) as f64]))
        .y_axis(Axis::default().bounds([-1.0, 1.0]));

        frame.render_widget(chart, area);
    }

    fn render_fft(&self, frame: &mut Frame, area: Rect) {
        // Keep peaks visible when many bins share a column
        let columns = (area.width as usize * 2).max(1);
        let reduced = if self.fft.len() > columns {
            reduce_to_bands(&self.fft, columns)
        } else {
            self.fft.clone()
        };
        let data: Vec<(f64, f64)> = reduced
            .iter()
            .enumerate()
            .map(|(i, &db)| (i as f64, normalize_db(db) as f64))
            .collect();

        let chart = Chart::new(vec![Dataset::default()
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Yellow))
            .data(&data)])
        .block(Block::bordered().title(" fft (dB) "))
        .x_axis(Axis::default().bounds([0.0, data.len().max(1) as f64]))
        .y_axis(Axis::default().bounds([0.0, 1.0]));

        frame.render_widget(chart, area);
    }

    fn render_bands(&self, frame: &mut Frame, area: Rect) {
        let count = self.fft_max.len().max(1) as u16;
        let inner_width = area.width.saturating_sub(2);
        let bar_width = (inner_width / count).saturating_sub(1).max(1);

        let bars: Vec<Bar> = self
            .fft_max
            .iter()
            .map(|&db| {
                Bar::default()
                    .value((normalize_db(db) * 100.0) as u64)
                    .text_value(String::new())
                    .style(Style::default().fg(Color::Magenta))
            })
            .collect();

        let chart = BarChart::default()
            .block(Block::bordered().title(" fftMax "))
            .bar_width(bar_width)
            .bar_gap(1)
            .max(100)
            .data(BarGroup::default().bars(&bars));

        frame.render_widget(chart, area);
    }
}

/// Map a dB value onto 0.0..=1.0 for display
fn normalize_db(db: f32) -> f32 {
    ((db.max(DISPLAY_MIN_DB) - DISPLAY_MIN_DB) / (DISPLAY_MAX_DB - DISPLAY_MIN_DB)).clamp(0.0, 1.0)
}

/// Pick at most `points` evenly spaced samples
fn decimate(data: &[f32], points: usize) -> Vec<f32> {
    if points == 0 || data.len() <= points {
        return data.to_vec();
    }
    let step = data.len() as f32 / points as f32;
    (0..points)
        .map(|i| data[((i as f32 * step) as usize).min(data.len() - 1)])
        .collect()
}

fn status_line(pipeline: &AudioPipeline, sink: &TerminalSink) -> String {
    let position = match pipeline.playback_position() {
        Some((current, total)) => format!("{:.1}/{:.1}s", current, total),
        None => "live".to_string(),
    };
    let loudest = sink
        .fft_max
        .iter()
        .copied()
        .fold(DB_FLOOR, f32::max);

    let activity = match (pipeline.state(), pipeline.is_playing()) {
        (PipelineState::Idle, _) => "stopped",
        (PipelineState::Running, true) => "playing",
        (PipelineState::Running, false) => "paused",
    };

    format!(
        " {} | {} | vol {:.1} | {} Hz | max {:.0} dB | [space] pause [+/-] volume [r]estart [q]uit ",
        activity,
        position,
        pipeline.volume(),
        pipeline.sample_rate(),
        loudest
    )
}

pub async fn run(config: Config) -> Result<()> {
    // Fail before touching the terminal so errors stay readable
    let mut pipeline = audio::create_audio_pipeline(&config)?;
    audio::start(&mut pipeline, &config)?;

    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run_app(&mut terminal, &mut pipeline, &config).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    pipeline.stop();
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    pipeline: &mut AudioPipeline,
    config: &Config,
) -> Result<()> {
    let rx = pipeline.subscribe();
    let mut sink = TerminalSink::default();
    let refresh = Duration::from_secs_f64(1.0 / config.display.refresh_rate);

    loop {
        let spectra = rx.borrow().clone();
        push_spectra(&mut sink, &spectra);

        let status = status_line(pipeline, &sink);
        terminal.draw(|frame| {
            let area = frame.area();
            sink.render(frame, area, &status);
        })?;

        if event::poll(refresh)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key {
                    KeyEvent {
                        code: KeyCode::Char('q'),
                        ..
                    }
                    | KeyEvent {
                        code: KeyCode::Char('c'),
                        modifiers: KeyModifiers::CONTROL,
                        ..
                    } => {
                        break;
                    }
                    KeyEvent {
                        code: KeyCode::Char(' '),
                        ..
                    } => {
                        if let Err(e) = pipeline.toggle_playback() {
                            warn!("Could not toggle playback: {}", e);
                        }
                    }
                    KeyEvent {
                        code: KeyCode::Char('+') | KeyCode::Char('='),
                        ..
                    } => {
                        pipeline.set_volume(pipeline.volume() + VOLUME_STEP);
                    }
                    KeyEvent {
                        code: KeyCode::Char('-'),
                        ..
                    } => {
                        pipeline.set_volume((pipeline.volume() - VOLUME_STEP).max(0.0));
                    }
                    KeyEvent {
                        code: KeyCode::Char('r'),
                        ..
                    } => {
                        pipeline.seek(0.0);
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Spectra;
    use ratatui::backend::TestBackend;

    #[test]
    fn db_normalization_clamps_to_display_range() {
        assert_eq!(normalize_db(DB_FLOOR), 0.0);
        assert_eq!(normalize_db(DISPLAY_MIN_DB), 0.0);
        assert_eq!(normalize_db(DISPLAY_MAX_DB + 10.0), 1.0);
        assert!((normalize_db(-40.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn decimation_limits_points() {
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let points = decimate(&data, 10);
        assert_eq!(points.len(), 10);
        assert_eq!(points[0], 0.0);
        assert_eq!(points[9], 90.0);
        assert_eq!(decimate(&data[..5], 10).len(), 5);
    }

    #[test]
    fn sink_keeps_latest_graphs_and_renders() {
        let mut sink = TerminalSink::default();
        push_spectra(&mut sink, &Spectra::silent(512, 8));
        assert_eq!(sink.time.len(), 512);
        assert_eq!(sink.fft.len(), 256);
        assert_eq!(sink.fft_max.len(), 8);

        sink.update_graph(&[1.0, 2.0], "unknown");
        assert_eq!(sink.fft_max.len(), 8);

        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        terminal
            .draw(|frame| {
                let area = frame.area();
                sink.render(frame, area, "status");
            })
            .unwrap();
    }
}
