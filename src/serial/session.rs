use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{error, info, warn};

use super::telemetry::TelemetryHub;

/// Packet slots buffered toward the writer thread. Roughly two full frames
/// at 8 channels; beyond that the link is behind and frames are dropped
/// whole rather than queued into growing latency.
const WRITE_QUEUE_PACKETS: usize = 32;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// The write queue is full; the packet was dropped and counted.
    Backpressure,
    /// The writer thread is gone (serial link lost or shutting down).
    Disconnected,
}

/// Cloneable, non-blocking write handle to the serial link.
///
/// The render engine, the takeover server, and shutdown all funnel through
/// this handle; the single writer thread behind it preserves packet order.
#[derive(Clone)]
pub struct SerialWriter {
    tx: Sender<Vec<u8>>,
    errors: Arc<AtomicU64>,
}

impl SerialWriter {
    /// Enqueue a packet without blocking. A full queue drops the packet.
    pub fn send(&self, packet: Vec<u8>) -> Result<(), WriteError> {
        match self.tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(WriteError::Backpressure)
            }
            Err(TrySendError::Disconnected(_)) => Err(WriteError::Disconnected),
        }
    }

    /// Enqueue a packet, waiting for queue space. Used for the few packets
    /// that must not be dropped (clear-all on pause and shutdown).
    pub fn send_blocking(&self, packet: Vec<u8>) -> Result<(), WriteError> {
        self.tx.send(packet).map_err(|_| WriteError::Disconnected)
    }

    /// Transient write errors plus dropped packets since startup.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// A writer backed by a plain channel instead of a serial port, for
    /// tests and tools that inspect the emitted packet stream.
    pub fn detached(capacity: usize) -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                errors: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }
}

/// Owns the serial port: discovers the device, splits it into a writer
/// thread (draining the packet queue) and a reader thread (framing device
/// lines into the telemetry hub).
pub struct SerialSession {
    writer: SerialWriter,
    writer_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
    pub port_path: String,
}

impl SerialSession {
    /// Try `<base>0..9` and open the first device that accepts the
    /// configured baud rate. No device is fatal.
    pub fn open(
        base: &str,
        baud: u32,
        hub: Arc<TelemetryHub>,
        stop: Arc<AtomicBool>,
        link_lost: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let (port, port_path) = discover_port(base, baud)?;
        info!("Serial port {port_path} open at {baud} baud");

        let reader_port = port
            .try_clone()
            .with_context(|| format!("clone serial port {port_path}"))?;

        let (tx, rx) = bounded::<Vec<u8>>(WRITE_QUEUE_PACKETS);
        let errors = Arc::new(AtomicU64::new(0));
        let writer = SerialWriter {
            tx,
            errors: errors.clone(),
        };

        let lost_w = link_lost.clone();
        let writer_handle = std::thread::Builder::new()
            .name("serial-writer".into())
            .spawn(move || write_loop(port, rx, errors, lost_w))
            .context("spawn serial writer thread")?;

        let lost_r = link_lost;
        let reader_handle = std::thread::Builder::new()
            .name("serial-reader".into())
            .spawn(move || read_loop(reader_port, hub, stop, lost_r))
            .context("spawn serial reader thread")?;

        Ok(Self {
            writer,
            writer_handle,
            reader_handle,
            port_path,
        })
    }

    pub fn writer(&self) -> SerialWriter {
        self.writer.clone()
    }

    /// Close the session: drops the write handle so the writer thread drains
    /// its queue and exits, then joins both threads.
    pub fn close(self) {
        drop(self.writer);
        let _ = self.writer_handle.join();
        let _ = self.reader_handle.join();
    }
}

fn discover_port(base: &str, baud: u32) -> anyhow::Result<(Box<dyn serialport::SerialPort>, String)> {
    for index in 0..10 {
        let path = format!("{base}{index}");
        match serialport::new(&path, baud).timeout(READ_TIMEOUT).open() {
            Ok(port) => return Ok((port, path)),
            Err(err) => {
                tracing::debug!("Serial candidate {path}: {err}");
            }
        }
    }
    bail!("no serial device found at {base}0..9");
}

fn write_loop(
    mut port: Box<dyn serialport::SerialPort>,
    rx: Receiver<Vec<u8>>,
    errors: Arc<AtomicU64>,
    link_lost: Arc<AtomicBool>,
) {
    while let Ok(packet) = rx.recv() {
        match port.write_all(&packet) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                // OS buffer full: drop this packet, keep the link.
                errors.fetch_add(1, Ordering::Relaxed);
                warn!("Serial write timed out; dropped {} bytes", packet.len());
            }
            Err(err) => {
                error!("Serial link lost on write: {err}");
                link_lost.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}

fn read_loop(
    port: Box<dyn serialport::SerialPort>,
    hub: Arc<TelemetryHub>,
    stop: Arc<AtomicBool>,
    link_lost: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(port);
    let mut line = String::new();
    while !stop.load(Ordering::SeqCst) && !link_lost.load(Ordering::SeqCst) {
        match reader.read_line(&mut line) {
            Ok(0) => {
                error!("Serial link closed by device");
                link_lost.store(true, Ordering::SeqCst);
                return;
            }
            Ok(_) => {
                hub.handle_line(&line);
                line.clear();
            }
            // Timeout mid-line: keep the partial line and keep reading.
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Dropped non-UTF-8 device line");
                line.clear();
            }
            Err(err) => {
                error!("Serial link lost on read: {err}");
                link_lost.store(true, Ordering::SeqCst);
                return;
            }
        }
    }
}
