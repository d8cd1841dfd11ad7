//! Raw traffic capture
//!
//! Append-only record of every byte exchanged with the adapter, kept for the
//! `--dump` diagnostic output. The protocol engine only ever appends to it.

use std::fmt::Write as _;

/// Direction of a captured chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to adapter
    Tx,
    /// Adapter to host
    Rx,
}

impl Direction {
    fn tag(&self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
        }
    }
}

/// Captured traffic, grouped into runs of the same direction
#[derive(Debug, Clone, Default)]
pub struct Capture {
    chunks: Vec<(Direction, Vec<u8>)>,
}

impl Capture {
    /// Empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, merging with the previous chunk if it has the same direction
    pub fn record(&mut self, direction: Direction, bytes: &[u8]) {
        match self.chunks.last_mut() {
            Some((last, data)) if *last == direction => data.extend_from_slice(bytes),
            _ => self.chunks.push((direction, bytes.to_vec())),
        }
    }

    /// All bytes received from the adapter, in order
    pub fn received(&self) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|(d, _)| *d == Direction::Rx)
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    /// True until the first byte is recorded
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Render the whole capture, one hex dump block per chunk
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (direction, data) in &self.chunks {
            let _ = writeln!(out, "{} {} bytes", direction.tag(), data.len());
            out.push_str(&hex_dump(data));
        }
        out
    }
}

/// Classic 16-bytes-per-line hex dump with offset and ASCII columns
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
