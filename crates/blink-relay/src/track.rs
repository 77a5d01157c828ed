//! Per-connection traffic trace, dumped once when the connection closes.

use blink_core::defaults::TRACK_MAX_SIZE;
use blink_pipeline::Role;

const TRACK_CHAR_UPLOAD: &str = "↑";
const TRACK_CHAR_DOWNLOAD: &str = "↓";
const TRACK_ELLIPSIS: &str = " ... ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Track {
    Endpoint(String),
    Data(TrackDirection, usize),
}

/// Packet and byte totals per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSummary {
    pub up_packets: u64,
    pub up_bytes: u64,
    pub down_packets: u64,
    pub down_bytes: u64,
}

impl TrackSummary {
    /// Client nodes read "out/in", server nodes "in/out".
    pub fn describe(&self, role: Role) -> String {
        match role {
            Role::Client => format!(
                "out/in = {}/{}, {}b/{}b",
                self.up_packets, self.down_packets, self.up_bytes, self.down_bytes
            ),
            Role::Server => format!(
                "in/out = {}/{}, {}b/{}b",
                self.down_packets, self.up_packets, self.down_bytes, self.up_bytes
            ),
        }
    }
}

/// Ordered record of endpoints and `(direction, bytes)` runs.
#[derive(Debug, Default)]
pub struct TrackLog {
    entries: Vec<Track>,
}

impl TrackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&mut self, endpoint: impl ToString) {
        self.entries.push(Track::Endpoint(endpoint.to_string()));
    }

    pub fn record(&mut self, direction: TrackDirection, bytes: usize) {
        self.entries.push(Track::Data(direction, bytes));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> TrackSummary {
        let mut summary = TrackSummary::default();
        for entry in &self.entries {
            if let Track::Data(direction, bytes) = entry {
                match direction {
                    TrackDirection::Up => {
                        summary.up_packets += 1;
                        summary.up_bytes += *bytes as u64;
                    }
                    TrackDirection::Down => {
                        summary.down_packets += 1;
                        summary.down_bytes += *bytes as u64;
                    }
                }
            }
        }
        summary
    }

    /// Tokens with repeated direction marks coalesced, trimmed to the first
    /// and last `TRACK_MAX_SIZE / 2` around a placeholder.
    pub fn abstract_line(&self) -> String {
        let mut tokens = Vec::with_capacity(self.entries.len() * 2);
        let mut last = None;
        for entry in &self.entries {
            match entry {
                Track::Endpoint(endpoint) => tokens.push(endpoint.clone()),
                Track::Data(direction, bytes) => {
                    if last != Some(*direction) {
                        last = Some(*direction);
                        tokens.push(
                            match direction {
                                TrackDirection::Up => TRACK_CHAR_UPLOAD,
                                TrackDirection::Down => TRACK_CHAR_DOWNLOAD,
                            }
                            .to_string(),
                        );
                    }
                    tokens.push(bytes.to_string());
                }
            }
        }

        let half = TRACK_MAX_SIZE / 2;
        if tokens.len() > TRACK_MAX_SIZE {
            let tail = tokens.split_off(tokens.len() - half);
            tokens.truncate(half);
            tokens.push(TRACK_ELLIPSIS.to_string());
            tokens.extend(tail);
        }
        tokens.join(" ")
    }

    /// Render and clear. `None` when nothing was recorded.
    pub fn take(&mut self, role: Role) -> Option<(TrackSummary, String)> {
        if self.entries.is_empty() {
            return None;
        }
        let summary = self.summary();
        let line = format!(
            "summary({}) abstract({})",
            summary.describe(role),
            self.abstract_line()
        );
        self.entries.clear();
        Some((summary, line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_direction_marks() {
        let mut log = TrackLog::new();
        log.endpoint("10.0.0.1:8388");
        log.endpoint("example.com:443");
        log.record(TrackDirection::Up, 10);
        log.record(TrackDirection::Up, 20);
        log.record(TrackDirection::Down, 30);
        log.record(TrackDirection::Up, 5);
        assert_eq!(
            log.abstract_line(),
            "10.0.0.1:8388 example.com:443 ↑ 10 20 ↓ 30 ↑ 5"
        );
    }

    #[test]
    fn summary_per_role() {
        let mut log = TrackLog::new();
        log.record(TrackDirection::Up, 100);
        log.record(TrackDirection::Up, 1);
        log.record(TrackDirection::Down, 50);
        let summary = log.summary();
        assert_eq!(summary.describe(Role::Client), "out/in = 2/1, 101b/50b");
        assert_eq!(summary.describe(Role::Server), "in/out = 1/2, 50b/101b");
    }

    #[test]
    fn long_traces_are_abbreviated() {
        let mut log = TrackLog::new();
        log.endpoint("peer");
        for i in 0..100 {
            log.record(TrackDirection::Up, i);
        }
        let line = log.abstract_line();
        let tokens: Vec<&str> = line.split(' ').collect();
        assert_eq!(tokens[0], "peer");
        assert_eq!(tokens[1], "↑");
        assert!(line.contains("  ...  "));
        assert!(line.ends_with("99"));
        // 20 head tokens, the placeholder and 20 tail tokens.
        let (head, tail) = line.split_once(TRACK_ELLIPSIS).unwrap();
        assert_eq!(head.trim_end().split(' ').count(), 20);
        assert_eq!(tail.trim_start().split(' ').count(), 20);
    }

    #[test]
    fn take_clears() {
        let mut log = TrackLog::new();
        assert!(log.take(Role::Client).is_none());
        log.endpoint("a:1");
        log.record(TrackDirection::Down, 3);
        let (summary, line) = log.take(Role::Server).unwrap();
        assert_eq!(summary.down_bytes, 3);
        assert_eq!(line, "summary(in/out = 1/0, 3b/0b) abstract(a:1 ↓ 3)");
        assert!(log.is_empty());
    }
}
