use core::{fmt, time::Duration};
use std::{collections::VecDeque, io::BufRead};

/// Transition reported by the line sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Line detected, i.e. the low-reflectance mark on the disk.
    Active,
    /// No line, i.e. back to high reflectance.
    Inactive,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        })
    }
}

/// Receiver of the two edge callbacks. `now` is measured from an origin of the source's choosing.
pub trait EdgeHandler {
    fn on_active(&mut self, now: Duration);
    fn on_inactive(&mut self, now: Duration);

    fn on_edge(&mut self, edge: Edge, now: Duration) {
        match edge {
            Edge::Active => self.on_active(now),
            Edge::Inactive => self.on_inactive(now),
        }
    }
}

/// Producer of edges. Returns only once exhausted or broken.
pub trait EdgeSource {
    type Error;
    fn run<H: EdgeHandler>(&mut self, handler: &mut H) -> Result<(), Self::Error>;
}

/// Majority vote over the most recent raw pin levels.
///
/// Nothing is reported until the window first fills. After that, an edge is
/// emitted whenever the smoothed level flips.
#[derive(Debug, Clone)]
pub struct MajorityFilter {
    window: VecDeque<bool>,
    len: usize,
    active_low: bool,
    state: Option<bool>,
}

impl MajorityFilter {
    /// `len` must be non-zero.
    pub fn new(len: usize, active_low: bool) -> Self {
        assert_ne!(len, 0, "majority window cannot be empty");
        Self { window: VecDeque::with_capacity(len), len, active_low, state: None }
    }

    /// Feeds one raw sample (`true` for a high pin).
    pub fn push(&mut self, high: bool) -> Option<Edge> {
        if self.window.len() == self.len {
            self.window.pop_front();
        }
        self.window.push_back(high);
        if self.window.len() < self.len {
            return None;
        }

        let highs = self.window.iter().filter(|&&level| level).count();
        let smoothed = highs * 2 > self.len;
        if self.state.replace(smoothed) == Some(smoothed) {
            return None;
        }

        Some(if smoothed != self.active_low { Edge::Active } else { Edge::Inactive })
    }

    /// Current window contents, oldest first, as `0`/`1` digits.
    pub fn window(&self) -> String {
        self.window.iter().map(|&level| if level { '1' } else { '0' }).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected `<seconds> <active|inactive>`, got `{text}`")]
    Malformed { line: usize, text: String },
    #[error("line {line}: timestamp {at:?} goes backwards from {prev:?}")]
    Backwards { line: usize, at: Duration, prev: Duration },
}

/// Replays a recorded edge trace, one `<seconds> <kind>` pair per line.
pub struct ReplaySource<R> {
    reader: R,
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

/// Decimal seconds to the nanosecond, without a float round-trip.
fn parse_seconds(text: &str) -> Option<Duration> {
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = if whole.is_empty() && !fraction.is_empty() { 0 } else { whole.parse::<u64>().ok()? };
    let nanos = fraction.bytes().chain(core::iter::repeat(b'0')).take(9).fold(0, |acc, b| acc * 10 + u32::from(b - b'0'));
    Some(Duration::new(secs, nanos))
}

fn parse_line(text: &str) -> Option<(Duration, Edge)> {
    let mut parts = text.split_whitespace();
    let at = parse_seconds(parts.next()?)?;
    let edge = match parts.next()?.to_ascii_lowercase().as_str() {
        "active" | "line" => Edge::Active,
        "inactive" | "no-line" => Edge::Inactive,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((at, edge))
}

impl<R: BufRead> EdgeSource for ReplaySource<R> {
    type Error = ReplayError;

    fn run<H: EdgeHandler>(&mut self, handler: &mut H) -> Result<(), Self::Error> {
        let mut prev = Duration::ZERO;
        for (index, line) in (&mut self.reader).lines().enumerate() {
            let line = line?;
            let text = line.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let line = index + 1;
            let Some((at, edge)) = parse_line(text) else {
                return Err(ReplayError::Malformed { line, text: text.into() });
            };
            if at < prev {
                return Err(ReplayError::Backwards { line, at, prev });
            }
            prev = at;

            handler.on_edge(edge, at);
        }
        Ok(())
    }
}
