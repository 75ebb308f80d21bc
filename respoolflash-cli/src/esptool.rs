//! Flash loader backed by the `esptool` executable.
//!
//! Each operation runs esptool as a child process on the session port. The
//! loader closes its own OS handle first so the child can open the device;
//! the port identity stays with the loader and goes back to the session on
//! detach.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use respoolflash::{
    ChipInfo, Deadline, Error, FlashLoader, LoaderFactory, Port, Result, WriteRequest,
};

/// Executable names tried when none is configured.
const CANDIDATES: &[&str] = &["esptool.py", "esptool"];

/// Child process poll interval while waiting for a bounded run.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const NOT_FOUND: &str = "esptool not found - install with: pip install esptool";

/// Builds [`EsptoolLoader`]s.
///
/// The executable is looked up once, on the first handshake.
#[derive(Debug, Default)]
pub struct EsptoolLoaderFactory {
    configured: Option<PathBuf>,
    resolved: OnceLock<Option<PathBuf>>,
}

impl EsptoolLoaderFactory {
    /// Factory using `configured` when set, otherwise the first esptool on `PATH`.
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            resolved: OnceLock::new(),
        }
    }

    fn program(&self) -> Option<PathBuf> {
        self.resolved
            .get_or_init(|| self.configured.clone().or_else(find_esptool))
            .clone()
    }
}

impl LoaderFactory for EsptoolLoaderFactory {
    fn construct(&self, port: Box<dyn Port>, baud_rate: u32) -> Box<dyn FlashLoader> {
        Box::new(EsptoolLoader {
            port,
            baud_rate,
            program: self.program(),
        })
    }
}

fn find_esptool() -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .find(|candidate| {
            Command::new(candidate)
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
        .map(PathBuf::from)
}

/// One esptool-driven loader session.
pub struct EsptoolLoader {
    port: Box<dyn Port>,
    baud_rate: u32,
    program: Option<PathBuf>,
}

impl EsptoolLoader {
    fn command(&self) -> Option<Command> {
        let program = self.program.as_ref()?;
        let mut cmd = Command::new(program);
        cmd.args(["--port", self.port.name()])
            .args(["--baud", &self.baud_rate.to_string()]);
        Some(cmd)
    }

    fn release_handle(&mut self) -> Result<()> {
        if self.port.is_open() {
            debug!("Handing {} over to esptool", self.port.name());
            self.port.close()?;
        }
        Ok(())
    }
}

impl FlashLoader for EsptoolLoader {
    fn handshake(&mut self, deadline: &Deadline) -> Result<ChipInfo> {
        self.release_handle()?;
        let mut cmd = self
            .command()
            .ok_or_else(|| Error::HandshakeFailed(NOT_FOUND.to_string()))?;
        cmd.args(["--before", "default_reset", "--after", "no_reset", "chip_id"]);

        let run = run_bounded(cmd, deadline)?;
        if !run.status.success() {
            return Err(Error::HandshakeFailed(run.failure_detail()));
        }

        let chip_name = parse_chip_name(&run.stdout);
        debug!("esptool reported chip {chip_name:?}");
        Ok(ChipInfo { chip_name })
    }

    fn write_image(
        &mut self,
        request: &WriteRequest<'_>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.release_handle()?;
        let mut cmd = self.command().ok_or_else(|| Error::FlashWriteFailed {
            detail: NOT_FOUND.to_string(),
        })?;

        let mut image = tempfile::Builder::new()
            .prefix("respoolflash-")
            .suffix(".bin")
            .tempfile()?;
        image.write_all(request.data)?;
        image.flush()?;

        cmd.args(["--before", "no_reset", "--after", "no_reset", "write_flash"])
            .args(["--flash_mode", request.flash_mode.as_str()])
            .args(["--flash_freq", request.flash_freq.as_str()])
            .args(["--flash_size", request.flash_size.as_str()])
            .arg(if request.compress { "-z" } else { "-u" });
        if request.erase_all {
            cmd.arg("--erase-all");
        }
        cmd.arg(format!("{:#x}", request.address)).arg(image.path());

        let total = request.data.len();
        let mut child = spawn_piped(&mut cmd).map_err(|e| Error::FlashWriteFailed {
            detail: format!("Failed to start esptool: {e}"),
        })?;
        let stderr = collect(child.stderr.take());
        let mut stdout_tail = String::new();

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut last = None;
            // esptool redraws its progress line with '\r'
            while let Some(segment) = read_segment(&mut reader)? {
                trace!("esptool: {segment}");
                if let Some(percent) = parse_progress(&segment) {
                    if last != Some(percent) {
                        last = Some(percent);
                        progress(total * usize::from(percent) / 100, total);
                    }
                }
                if !segment.trim().is_empty() {
                    stdout_tail = segment;
                }
            }
        }

        let status = child.wait()?;
        let run = Finished {
            status,
            stdout: stdout_tail,
            stderr: join(stderr),
        };
        if !run.status.success() {
            return Err(Error::FlashWriteFailed {
                detail: run.failure_detail(),
            });
        }
        progress(total, total);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        // every esptool run has exited by now
        Ok(())
    }

    fn into_port(self: Box<Self>) -> Box<dyn Port> {
        self.port
    }
}

struct Finished {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl Finished {
    fn failure_detail(&self) -> String {
        describe_failure(&self.stdout, &self.stderr, &self.status)
    }
}

/// Last meaningful line esptool printed, preferring stderr.
fn describe_failure(stdout: &str, stderr: &str, status: &dyn fmt::Display) -> String {
    last_line(stderr)
        .or_else(|| last_line(stdout))
        .map_or_else(|| format!("esptool exited with {status}"), str::to_string)
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|l| !l.is_empty())
}

fn spawn_piped(cmd: &mut Command) -> std::io::Result<Child> {
    debug!("Running {cmd:?}");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

fn collect<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut out = String::new();
            if let Err(e) = pipe.read_to_string(&mut out) {
                warn!("Failed to read esptool output: {e}");
            }
            out
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Run `cmd` to completion, killing it once `deadline` expires.
fn run_bounded(mut cmd: Command, deadline: &Deadline) -> Result<Finished> {
    let mut child = spawn_piped(&mut cmd)
        .map_err(|e| Error::HandshakeFailed(format!("Failed to start esptool: {e}")))?;
    let stdout = collect(child.stdout.take());
    let stderr = collect(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if deadline.expired() {
            if let Err(e) = child.kill() {
                warn!("Failed to stop esptool: {e}");
            }
            let _ = child.wait();
            return Err(Error::Timeout(format!(
                "esptool did not finish within {} s",
                deadline.limit().as_secs()
            )));
        }
        thread::sleep(POLL_INTERVAL.min(deadline.remaining()));
    };

    Ok(Finished {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

/// Read up to the next `\r` or `\n`. `None` at end of stream.
fn read_segment<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut segment = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok((!segment.is_empty()).then(|| String::from_utf8_lossy(&segment).into_owned()));
        }
        if let Some(pos) = buf.iter().position(|b| *b == b'\r' || *b == b'\n') {
            segment.extend_from_slice(&buf[..pos]);
            reader.consume(pos + 1);
            return Ok(Some(String::from_utf8_lossy(&segment).into_owned()));
        }
        let len = buf.len();
        segment.extend_from_slice(buf);
        reader.consume(len);
    }
}

/// Chip name from esptool output.
///
/// The detailed `Chip is ...` / `Chip type: ...` lines win over the
/// `Detecting chip type...` line.
pub fn parse_chip_name(output: &str) -> Option<String> {
    let lines = || output.lines().map(str::trim);

    lines()
        .find_map(|line| {
            line.strip_prefix("Chip is ")
                .or_else(|| line.strip_prefix("Chip type:"))
        })
        .or_else(|| lines().find_map(|line| line.strip_prefix("Detecting chip type...")))
        .and_then(|rest| rest.split(" (").next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Percentage from an esptool progress line such as
/// `Writing at 0x00010000... (12 %)`.
pub fn parse_progress(line: &str) -> Option<u8> {
    let start = line.rfind('(')?;
    let inner = line[start + 1..].trim_end().strip_suffix(')')?;
    let number = inner.trim_end().strip_suffix('%')?.trim();
    number.parse::<u8>().ok().map(|p| p.min(100))
}
