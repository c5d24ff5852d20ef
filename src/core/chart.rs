//! Chart data sink
//!
//! Parses the chart sample formats out of a byte stream and keeps a bounded
//! series per channel:
//! - `binary_y`: little-endian f32 per channel followed by `00 00 80 7F`
//! - `text_y`: comma separated numbers terminated by `\n`

use super::router::ByteSink;
use super::transport::{ChartsDataFormat, TransportConfig};
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Tail closing every binary sample
pub const BINARY_TAIL: [u8; 4] = [0x00, 0x00, 0x80, 0x7F];

/// Default number of points kept per channel
pub const DEFAULT_MAX_POINTS: usize = 1000;

/// Upper bound on channels per sample
pub const MAX_CHANNELS: usize = 16;

/// Unterminated input beyond this is discarded
const MAX_PENDING: usize = 64 * 1024;

#[derive(Debug, Default)]
struct State {
    pending: BytesMut,
    series: Vec<VecDeque<f64>>,
    samples: u64,
}

/// Router consumer turning chart samples into per-channel series
#[derive(Debug)]
pub struct ChartSink {
    format: ChartsDataFormat,
    max_points: usize,
    state: Mutex<State>,
}

impl ChartSink {
    /// Sink for `format` keeping [`DEFAULT_MAX_POINTS`] per channel
    pub fn new(format: ChartsDataFormat) -> Self {
        Self::with_capacity(format, DEFAULT_MAX_POINTS)
    }

    /// Sink keeping at most `max_points` per channel
    pub fn with_capacity(format: ChartsDataFormat, max_points: usize) -> Self {
        Self {
            format,
            max_points: max_points.max(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Sink for the sample format a charts-test transport produces;
    /// `None` for every other kind
    pub fn for_transport(config: &TransportConfig) -> Option<Self> {
        match config {
            TransportConfig::ChartsTest(c) => Some(Self::new(c.data_format)),
            _ => None,
        }
    }

    /// Sample format
    pub fn format(&self) -> ChartsDataFormat {
        self.format
    }

    /// Feed raw bytes; complete samples are appended to the series
    pub fn push(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.pending.extend_from_slice(bytes);

        loop {
            let sample = match self.format {
                ChartsDataFormat::BinaryY => next_binary(&mut state.pending),
                ChartsDataFormat::TextY => next_text(&mut state.pending),
            };
            let Some(sample) = sample else { break };
            if sample.is_empty() {
                continue;
            }
            self.append(&mut state, &sample);
        }

        if state.pending.len() > MAX_PENDING {
            warn!(len = state.pending.len(), "discarding unterminated chart input");
            state.pending.clear();
        }
    }

    fn append(&self, state: &mut State, values: &[f64]) {
        let channels = values.len().min(MAX_CHANNELS);
        if state.series.len() < channels {
            state.series.resize_with(channels, VecDeque::new);
        }
        for (series, value) in state.series.iter_mut().zip(&values[..channels]) {
            series.push_back(*value);
            while series.len() > self.max_points {
                series.pop_front();
            }
        }
        state.samples += 1;
    }

    /// Number of channels seen so far
    pub fn channels(&self) -> usize {
        self.state.lock().series.len()
    }

    /// Copy of one channel's series, oldest first
    pub fn series(&self, channel: usize) -> Vec<f64> {
        self.state
            .lock()
            .series
            .get(channel)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Latest value of every channel
    pub fn latest(&self) -> Vec<Option<f64>> {
        self.state
            .lock()
            .series
            .iter()
            .map(|s| s.back().copied())
            .collect()
    }

    /// Total samples parsed
    pub fn samples(&self) -> u64 {
        self.state.lock().samples
    }

    /// Drop all series and pending input
    pub fn clear(&self) {
        *self.state.lock() = State::default();
    }
}

impl ByteSink for ChartSink {
    fn input_bytes(&self, bytes: &Bytes) {
        self.push(bytes);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn next_binary(pending: &mut BytesMut) -> Option<Vec<f64>> {
    let end = find(pending, &BINARY_TAIL)?;
    let mut body = pending.split_to(end + BINARY_TAIL.len());
    body.truncate(end);

    if body.len() % 4 != 0 {
        debug!(len = body.len(), "misaligned binary sample");
        return Some(Vec::new());
    }
    let mut values = Vec::with_capacity(body.len() / 4);
    while body.has_remaining() {
        values.push(f64::from(body.get_f32_le()));
    }
    Some(values)
}

fn next_text(pending: &mut BytesMut) -> Option<Vec<f64>> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let line = pending.split_to(end + 1);
    let line = String::from_utf8_lossy(&line[..end]);

    let values: Result<Vec<f64>, _> = line
        .trim()
        .split(',')
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<f64>())
        .collect();
    match values {
        Ok(values) => Some(values),
        Err(_) => {
            debug!(line = %line.trim(), "unparsable text sample");
            Some(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(values: &[f32]) -> Vec<u8> {
        let mut out: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        out.extend_from_slice(&BINARY_TAIL);
        out
    }

    #[test]
    fn test_text_samples_across_chunks() {
        let sink = ChartSink::new(ChartsDataFormat::TextY);
        sink.push(b"1.5,2");
        assert_eq!(sink.samples(), 0);
        sink.push(b".5\n3,4\nbad,x\n");
        assert_eq!(sink.samples(), 2);
        assert_eq!(sink.channels(), 2);
        assert_eq!(sink.series(0), vec![1.5, 3.0]);
        assert_eq!(sink.series(1), vec![2.5, 4.0]);
        assert!(sink.series(5).is_empty());
    }

    #[test]
    fn test_binary_samples() {
        let sink = ChartSink::new(ChartsDataFormat::BinaryY);
        let mut bytes = binary(&[1.0, -2.0]);
        bytes.extend(binary(&[3.0, 4.0]));
        let (a, b) = bytes.split_at(5);
        sink.push(a);
        sink.push(b);
        assert_eq!(sink.samples(), 2);
        assert_eq!(sink.latest(), vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_series_are_bounded() {
        let sink = ChartSink::with_capacity(ChartsDataFormat::TextY, 3);
        for i in 0..10 {
            sink.push(format!("{i}\n").as_bytes());
        }
        assert_eq!(sink.series(0), vec![7.0, 8.0, 9.0]);
        sink.clear();
        assert_eq!(sink.channels(), 0);
    }

    #[test]
    fn test_for_transport() {
        use crate::core::transport::{ChartsTestConfig, TransportKind};

        let config = TransportConfig::ChartsTest(ChartsTestConfig {
            data_format: ChartsDataFormat::TextY,
            ..Default::default()
        });
        let sink = ChartSink::for_transport(&config).unwrap();
        assert_eq!(sink.format(), ChartsDataFormat::TextY);
        assert!(ChartSink::for_transport(&TransportConfig::default_for(TransportKind::TcpServer)).is_none());
    }

    #[cfg(feature = "charts-test")]
    #[test]
    fn test_parses_generator_output() {
        use crate::core::transport::{generate_binary_y, generate_text_y};

        let binary = ChartSink::new(ChartsDataFormat::BinaryY);
        binary.push(&generate_binary_y(4, 90));
        let text = ChartSink::new(ChartsDataFormat::TextY);
        text.push(&generate_text_y(4, 90));

        for sink in [&binary, &text] {
            let latest = sink.latest();
            assert_eq!(latest.len(), 4);
            assert!((latest[3].unwrap() - 40.0).abs() < 1e-3);
        }
    }
}
