//! Terminal waveform display
//!
//! Redraws at a fixed rate from the analyser tap. Purely observational: it
//! reads the published status and the tap, and never touches the session.

use std::io::{self, Write};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::session::{AgentState, AgentStatus};
use crate::voice::AnalyserTap;

/// Display settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisualizerOptions {
    pub enabled: bool,
    /// Columns of the waveform
    pub width: usize,
    /// Rows of the waveform
    pub height: usize,
    /// Redraws per second
    pub fps: u32,
}

impl Default for VisualizerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 64,
            height: 9,
            fps: 30,
        }
    }
}

/// Render one frame: a status badge line followed by `height` waveform rows
///
/// The waveform is drawn only while listening or speaking; every other
/// state shows a flat line through the middle row.
#[must_use]
pub fn render_frame(status: &AgentStatus, samples: &[f32], width: usize, height: usize) -> Vec<String> {
    let width = width.max(1);
    let height = height.max(1);
    let mid = (height - 1) / 2;

    let mut grid = vec![vec![' '; width]; height];
    let active = matches!(status.state, AgentState::Listening | AgentState::Speaking);

    if active && !samples.is_empty() {
        let mut prev: Option<usize> = None;
        for (x, value) in columns(samples, width).into_iter().enumerate() {
            let row = sample_row(value, height);
            if let Some(prev) = prev {
                let (lo, hi) = if prev < row { (prev, row) } else { (row, prev) };
                for cells in &mut grid[lo..=hi] {
                    cells[x] = '│';
                }
            }
            grid[row][x] = '•';
            prev = Some(row);
        }
    } else {
        grid[mid].fill('─');
    }

    let mut frame = Vec::with_capacity(height + 1);
    frame.push(badge(status));
    frame.extend(grid.into_iter().map(|cells| cells.into_iter().collect()));
    frame
}

fn badge(status: &AgentStatus) -> String {
    let dot = match status.state {
        AgentState::Listening | AgentState::Speaking => '●',
        _ => '○',
    };
    match &status.error {
        Some(error) if status.state == AgentState::Error => {
            format!("{dot} {}: {error}", status.state.label())
        }
        _ => format!("{dot} {}", status.state.label()),
    }
}

/// Downsample to one value per column, keeping the sample farthest from 0
fn columns(samples: &[f32], width: usize) -> Vec<f32> {
    (0..width)
        .map(|x| {
            let start = x * samples.len() / width;
            let end = ((x + 1) * samples.len() / width).max(start + 1).min(samples.len());
            samples[start.min(samples.len() - 1)..end]
                .iter()
                .copied()
                .fold(0.0_f32, |acc, s| if s.abs() > acc.abs() { s } else { acc })
        })
        .collect()
}

/// Row for a sample in [-1, 1]; +1 is the top row
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample_row(value: f32, height: usize) -> usize {
    let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
    let span = (height - 1) as f32;
    let row = ((1.0 - value) / 2.0 * span).round() as usize;
    row.min(height - 1)
}

/// Background redraw loop
pub struct Visualizer {
    options: VisualizerOptions,
    status: watch::Receiver<AgentStatus>,
    tap: AnalyserTap,
}

impl Visualizer {
    #[must_use]
    pub const fn new(
        options: VisualizerOptions,
        status: watch::Receiver<AgentStatus>,
        tap: AnalyserTap,
    ) -> Self {
        Self {
            options,
            status,
            tap,
        }
    }

    /// Start redrawing on stdout; stops when the handle is dropped
    #[must_use]
    pub fn spawn(self) -> VisualizerHandle {
        let token = CancellationToken::new();
        tokio::spawn(self.run(token.clone()));
        VisualizerHandle { token }
    }

    async fn run(self, token: CancellationToken) {
        let fps = self.options.fps.clamp(1, 120);
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stdout = io::stdout();
        let mut drawn = 0;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let status = self.status.borrow().clone();
            let samples = if status.state.is_active() {
                self.tap.snapshot()
            } else {
                Vec::new()
            };
            let frame = render_frame(&status, &samples, self.options.width, self.options.height);

            if let Err(e) = draw(&mut stdout, &frame, drawn) {
                tracing::debug!(error = %e, "visualizer stopped, stdout unavailable");
                break;
            }
            drawn = frame.len();
        }
    }
}

/// Overwrite the previous frame in place
fn draw(out: &mut impl Write, frame: &[String], previous_rows: usize) -> io::Result<()> {
    if previous_rows > 0 {
        write!(out, "\x1b[{previous_rows}A")?;
    }
    for line in frame {
        writeln!(out, "\x1b[2K{line}")?;
    }
    out.flush()
}

/// Cancels the redraw loop on drop
#[derive(Debug)]
pub struct VisualizerHandle {
    token: CancellationToken,
}

impl VisualizerHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for VisualizerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
