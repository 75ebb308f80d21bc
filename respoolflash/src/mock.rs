//! Scripted test doubles.
//!
//! Every double writes to a shared [`Journal`], so a test can assert the
//! exact order of opens, closes, signal writes, waits and loader calls.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::board::BoardVariant;
use crate::error::{Error, Result};
use crate::firmware::FirmwareSource;
use crate::guard::PortSelector;
use crate::loader::{ChipInfo, FlashLoader, LoaderFactory, WriteRequest};
use crate::port::Port;
use crate::timing::{Deadline, Delay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Open(u32),
    Close,
    Dtr(bool),
    Rts(bool),
    Sleep(Duration),
    Write(Vec<u8>),
    LoaderNew(u32),
    Handshake,
    WriteImage(usize),
    LoaderDisconnect,
    Fetch(BoardVariant),
}

#[derive(Default)]
struct JournalInner {
    ops: Vec<Op>,
    port_open: bool,
    live_loaders: usize,
}

#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<JournalInner>>);

impl Journal {
    fn lock(&self) -> MutexGuard<'_, JournalInner> {
        self.0.lock().unwrap()
    }

    fn push(&self, op: Op) {
        self.lock().ops.push(op);
    }

    fn set_port_open(&self, open: bool) {
        self.lock().port_open = open;
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| pred(op)).count()
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Sleep(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// `(dtr, rts)` pairs in the order they were set.
    pub(crate) fn signal_levels(&self) -> Vec<(bool, bool)> {
        let mut levels = Vec::new();
        let mut dtr = None;
        for op in &self.lock().ops {
            match op {
                Op::Dtr(level) => dtr = Some(*level),
                Op::Rts(rts) => {
                    if let Some(dtr) = dtr.take() {
                        levels.push((dtr, *rts));
                    }
                },
                _ => {},
            }
        }
        levels
    }

    /// All bytes written to ports, concatenated.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub(crate) fn port_open(&self) -> bool {
        self.lock().port_open
    }

    pub(crate) fn live_loaders(&self) -> usize {
        self.lock().live_loaders
    }
}

pub(crate) struct MockPort {
    journal: Journal,
    name: String,
    open: bool,
    baud_rate: u32,
    timeout: Duration,
    vid: Option<u16>,
    signal_failures: usize,
    open_failures: usize,
    control_lines: bool,
    close_fails: bool,
}

impl MockPort {
    pub(crate) fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            name: "/dev/ttyMOCK0".to_string(),
            open: false,
            baud_rate: 115_200,
            timeout: Duration::from_millis(1000),
            vid: None,
            signal_failures: 0,
            open_failures: 0,
            control_lines: true,
            close_fails: false,
        }
    }

    pub(crate) fn opened(mut self) -> Self {
        self.open = true;
        self.journal.set_port_open(true);
        self
    }

    pub(crate) fn with_vid(mut self, vid: u16) -> Self {
        self.vid = Some(vid);
        self
    }

    /// The next `n` signal writes find the port closed underneath them.
    pub(crate) fn failing_signals(mut self, n: usize) -> Self {
        self.signal_failures = n;
        self
    }

    pub(crate) fn failing_opens(mut self, n: usize) -> Self {
        self.open_failures = n;
        self
    }

    pub(crate) fn without_control_lines(mut self) -> Self {
        self.control_lines = false;
        self
    }

    pub(crate) fn failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    fn signal(&mut self, op: Op) -> Result<()> {
        if !self.open {
            return Err(Error::InvalidState("port is closed".into()));
        }
        if self.signal_failures > 0 {
            self.signal_failures -= 1;
            self.open = false;
            self.journal.set_port_open(false);
            return Err(Error::InvalidState("port closed during signal write".into()));
        }
        self.journal.push(op);
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port is closed"));
        }
        self.journal.push(Op::Write(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self, baud_rate: u32) -> Result<()> {
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(Error::Io(io::Error::other("Failed to open serial port")));
        }
        self.open = true;
        self.baud_rate = baud_rate;
        self.journal.set_port_open(true);
        self.journal.push(Op::Open(baud_rate));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.journal.set_port_open(false);
            self.journal.push(Op::Close);
        }
        if self.close_fails {
            return Err(Error::Io(io::Error::other("close failed")));
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.signal(Op::Dtr(level))
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.signal(Op::Rts(level))
    }

    fn supports_control_lines(&self) -> bool {
        self.control_lines
    }

    fn usb_vendor_id(&self) -> Option<u16> {
        self.vid
    }
}

pub(crate) struct RecordingDelay {
    journal: Journal,
}

impl RecordingDelay {
    pub(crate) fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
        }
    }
}

impl Delay for RecordingDelay {
    fn sleep(&self, duration: Duration) {
        self.journal.push(Op::Sleep(duration));
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum HandshakeScript {
    Chip(&'static str),
    Unnamed,
    Timeout,
    Fail(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteScript {
    Ok,
    Fail(&'static str),
}

/// Loader that opens its port on handshake and closes it on disconnect.
struct MockLoader {
    port: Option<Box<dyn Port>>,
    journal: Journal,
    baud_rate: u32,
    handshake: HandshakeScript,
    write: WriteScript,
}

impl FlashLoader for MockLoader {
    fn handshake(&mut self, _deadline: &Deadline) -> Result<ChipInfo> {
        self.journal.push(Op::Handshake);
        if let Some(port) = self.port.as_mut() {
            if !port.is_open() {
                port.open(self.baud_rate)?;
            }
        }
        match self.handshake {
            HandshakeScript::Chip(name) => Ok(ChipInfo {
                chip_name: Some(name.to_string()),
            }),
            HandshakeScript::Unnamed => Ok(ChipInfo::default()),
            HandshakeScript::Timeout => Err(Error::Timeout("no sync reply".into())),
            HandshakeScript::Fail(msg) => Err(Error::HandshakeFailed(msg.into())),
        }
    }

    fn write_image(
        &mut self,
        request: &WriteRequest<'_>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let total = request.data.len();
        self.journal.push(Op::WriteImage(total));
        progress(0, total);
        match self.write {
            WriteScript::Ok => {
                progress(total / 2, total);
                progress(total, total);
                Ok(())
            },
            WriteScript::Fail(detail) => Err(Error::FlashWriteFailed {
                detail: detail.into(),
            }),
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.journal.push(Op::LoaderDisconnect);
        match self.port.as_mut() {
            Some(port) => port.close(),
            None => Ok(()),
        }
    }

    fn into_port(mut self: Box<Self>) -> Box<dyn Port> {
        self.port.take().expect("mock loader holds its port")
    }
}

impl Drop for MockLoader {
    fn drop(&mut self) {
        self.journal.lock().live_loaders -= 1;
    }
}

pub(crate) struct MockLoaderFactory {
    journal: Journal,
    handshakes: Mutex<VecDeque<HandshakeScript>>,
    write: WriteScript,
}

impl MockLoaderFactory {
    /// Loaders answer with `handshakes` in order, then with a plain ESP32.
    pub(crate) fn new(
        journal: &Journal,
        handshakes: impl IntoIterator<Item = HandshakeScript>,
    ) -> Self {
        Self {
            journal: journal.clone(),
            handshakes: Mutex::new(handshakes.into_iter().collect()),
            write: WriteScript::Ok,
        }
    }

    pub(crate) fn with_write(mut self, write: WriteScript) -> Self {
        self.write = write;
        self
    }
}

impl LoaderFactory for MockLoaderFactory {
    fn construct(&self, port: Box<dyn Port>, baud_rate: u32) -> Box<dyn FlashLoader> {
        let handshake = self
            .handshakes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HandshakeScript::Chip("ESP32"));
        self.journal.push(Op::LoaderNew(baud_rate));
        self.journal.lock().live_loaders += 1;
        Box::new(MockLoader {
            port: Some(port),
            journal: self.journal.clone(),
            baud_rate,
            handshake,
            write: self.write,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum FirmwareScript {
    Image(Vec<u8>),
    Status(u16),
}

pub(crate) struct MockFirmware {
    journal: Journal,
    script: FirmwareScript,
}

impl MockFirmware {
    pub(crate) fn new(journal: &Journal, script: FirmwareScript) -> Self {
        Self {
            journal: journal.clone(),
            script,
        }
    }
}

impl FirmwareSource for MockFirmware {
    fn fetch_image(&self, variant: BoardVariant) -> Result<Vec<u8>> {
        self.journal.push(Op::Fetch(variant));
        match &self.script {
            FirmwareScript::Image(image) => Ok(image.clone()),
            FirmwareScript::Status(status) => Err(Error::FirmwareDownloadFailed { status: *status }),
        }
    }

    fn latest_version(&self) -> String {
        "1.2.3".to_string()
    }
}

/// Hands out ports in order; `None` entries are cancelled selections.
pub(crate) struct MockSelector {
    ports: VecDeque<Option<MockPort>>,
}

impl MockSelector {
    pub(crate) fn with_ports(ports: impl IntoIterator<Item = Option<MockPort>>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
        }
    }

    pub(crate) fn with_port(port: MockPort) -> Self {
        Self::with_ports([Some(port)])
    }

    pub(crate) fn cancelled() -> Self {
        Self::with_ports([None])
    }
}

impl PortSelector for MockSelector {
    fn select(&mut self) -> Result<Option<Box<dyn Port>>> {
        Ok(self
            .ports
            .pop_front()
            .flatten()
            .map(|port| Box::new(port) as Box<dyn Port>))
    }
}
