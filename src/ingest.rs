//! UDP ingest (§6 "UDP wire protocol (ingress)"): assembles fixed-layout
//! datagrams into complete RGB image lines and hands each line to §4.B.
//!
//! The packet layout itself is an external collaborator's concern; this
//! module only assumes a full line is split across [`FRAGMENTS_PER_LINE`]
//! consecutive packets, each carrying one fragment's worth of interleaved
//! RGB pixel bytes plus enough header to identify its fragment index.

use std::net::UdpSocket;

use crate::config::EngineConfig;
use crate::preprocess::preprocess_line;

/// The originating implementation's fixed fragment count per image line,
/// independent of `pixels_per_line` (§6).
pub const FRAGMENTS_PER_LINE: usize = 12;

/// Packet type byte distinguishing image-data datagrams from IMU-data ones
/// sharing the same socket (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    ImageData,
    ImuData,
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(byte: u8) -> Self {
        match byte {
            0 => PacketType::ImageData,
            1 => PacketType::ImuData,
            other => PacketType::Unknown(other),
        }
    }
}

/// One parsed datagram: its type, the fragment index within the current
/// line (only meaningful for [`PacketType::ImageData`]), and its RGB pixel
/// payload.
#[derive(Debug)]
pub struct Packet {
    pub packet_type: PacketType,
    pub fragment_index: usize,
    pub pixels: Vec<(u8, u8, u8)>,
}

/// Minimum datagram size: one type byte, one fragment-index byte, and at
/// least one RGB triple.
const MIN_PACKET_LEN: usize = 5;

/// Parses a raw datagram into a [`Packet`]. Returns `None` for anything
/// shorter than the minimum fixed header, or whose payload isn't a whole
/// number of RGB triples — both silently dropped, per §7's "UDP / ingest
/// failures are not the core's concern".
pub fn parse_packet(datagram: &[u8]) -> Option<Packet> {
    if datagram.len() < MIN_PACKET_LEN {
        return None;
    }
    let packet_type = PacketType::from(datagram[0]);
    let fragment_index = datagram[1] as usize;
    let payload = &datagram[2..];

    if payload.len() % 3 != 0 {
        return None;
    }

    let pixels = payload.chunks_exact(3).map(|c| (c[0], c[1], c[2])).collect();
    Some(Packet { packet_type, fragment_index, pixels })
}

/// Assembles fragments into complete image lines, one fragment index at a
/// time, reusing the previous complete line whenever a fragment goes
/// missing before the next one completes (§7 idempotence).
pub struct LineAssembler {
    pixels_per_fragment: usize,
    r: Vec<u8>,
    g: Vec<u8>,
    b: Vec<u8>,
    received: Vec<bool>,
    last_complete: Option<(Vec<u8>, Vec<u8>, Vec<u8>)>,
}

impl LineAssembler {
    /// `pixels_per_line` must be one of [`crate::config::VALID_PIXEL_COUNTS`].
    pub fn new(pixels_per_line: usize) -> Self {
        let pixels_per_fragment = pixels_per_line / FRAGMENTS_PER_LINE;
        Self {
            pixels_per_fragment,
            r: vec![0; pixels_per_line],
            g: vec![0; pixels_per_line],
            b: vec![0; pixels_per_line],
            received: vec![false; FRAGMENTS_PER_LINE],
            last_complete: None,
        }
    }

    /// Folds one image-data fragment into the line under assembly. Once
    /// every fragment for the current line has arrived, returns the
    /// complete `(r, g, b)` line and resets for the next one.
    pub fn ingest_fragment(&mut self, packet: &Packet) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        if packet.packet_type != PacketType::ImageData {
            return None;
        }
        if packet.fragment_index >= FRAGMENTS_PER_LINE {
            return None;
        }

        let start = packet.fragment_index * self.pixels_per_fragment;
        let count = packet.pixels.len().min(self.pixels_per_fragment);
        for (i, &(r, g, b)) in packet.pixels.iter().take(count).enumerate() {
            self.r[start + i] = r;
            self.g[start + i] = g;
            self.b[start + i] = b;
        }
        self.received[packet.fragment_index] = true;

        if self.received.iter().all(|&done| done) {
            self.received.fill(false);
            let line = (self.r.clone(), self.g.clone(), self.b.clone());
            self.last_complete = Some(line.clone());
            return Some(line);
        }

        None
    }

    /// Returns the most recently completed line, or a silent all-zero line
    /// if none has completed yet. Used when the ingest thread must produce
    /// a frame for a buffer boundary but no fragment has completed in time.
    pub fn current_or_silent(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        self.last_complete.clone().unwrap_or_else(|| {
            (vec![0; self.r.len()], vec![0; self.g.len()], vec![0; self.b.len()])
        })
    }
}

/// Runs the ingest loop on the calling thread: blocks on `socket.recv_from`,
/// assembles lines, preprocesses each complete line, and publishes it to
/// `image_buffer`. Returns only when `shutdown` is observed, checked once
/// per received datagram (§5: "one ingest thread", a plain blocking OS
/// thread, not an async task).
pub fn run(
    socket: &UdpSocket,
    config: &EngineConfig,
    image_buffer: &crate::double_buffer::ImageSynthBuffer,
    total_notes: usize,
    shutdown: &std::sync::atomic::AtomicBool,
) {
    use std::sync::atomic::Ordering::Relaxed;

    let pixels_per_line = config.pixel_count();
    let mut assembler = LineAssembler::new(pixels_per_line);
    let mut sequence = 0u64;
    let mut recv_buf = vec![0u8; 2 + pixels_per_line / FRAGMENTS_PER_LINE * 3];

    while !shutdown.load(Relaxed) {
        let (len, _addr) = match socket.recv_from(&mut recv_buf) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let Some(packet) = parse_packet(&recv_buf[..len]) else { continue };
        let Some((r, g, b)) = assembler.ingest_fragment(&packet) else { continue };

        sequence = sequence.wrapping_add(1);
        if let Ok(frame) = preprocess_line(&r, &g, &b, total_notes, config, sequence) {
            image_buffer.publish(frame);
        }
    }
}
