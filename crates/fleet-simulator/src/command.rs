//! Command sources and command decoding.
//!
//! A source hands out the latest raw line for one vehicle. Decoding turns
//! that line into a [`CommandVector`]; anything unusable becomes the zero
//! command plus a [`CommandWarning`].

use fleet_domain::{CommandParseError, CommandVector, VehicleId, VehicleRecord};
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-vehicle supplier of raw command lines.
pub trait CommandSource: Send {
    /// Latest raw command, `None` when nothing usable is available.
    fn read(&mut self) -> Option<String>;

    /// The physical link could not be opened; the vehicle runs on zero commands.
    fn is_degraded(&self) -> bool {
        false
    }
}

// =============================================================================
// DECODING
// =============================================================================

/// A rejected command payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandWarning {
    pub vehicle_id: VehicleId,
    /// Clock reading at the start of the tick that saw the payload.
    pub elapsed: Duration,
    pub payload: Option<String>,
    pub reason: CommandParseError,
}

impl CommandWarning {
    pub fn emit(&self) {
        warn!(
            vehicle_id = self.vehicle_id.0,
            elapsed_s = self.elapsed.as_secs_f64(),
            payload = self.payload.as_deref().unwrap_or("<none>"),
            reason = %self.reason,
            "Invalid command data received"
        );
    }
}

/// Decode one raw payload for `vehicle_id`.
pub fn decode_command(
    vehicle_id: VehicleId,
    raw: Option<&str>,
    elapsed: Duration,
) -> Result<CommandVector, CommandWarning> {
    let parsed = match raw {
        Some(line) => line.parse::<CommandVector>(),
        None => Err(CommandParseError::Absent),
    };

    parsed.map_err(|reason| CommandWarning {
        vehicle_id,
        elapsed,
        payload: raw.map(str::to_string),
        reason,
    })
}

// =============================================================================
// SOURCES
// =============================================================================

/// How long a received line stays current when the link goes quiet.
pub const LINK_SILENCE_TIMEOUT: Duration = Duration::from_secs(1);

/// Line-oriented link (serial device, FIFO or file).
///
/// A background task keeps the most recent line with its arrival time. A line
/// older than the silence timeout reads as absent, and EOF or a read error
/// clears it, so a quiet or broken link falls back to zero commands.
#[derive(Debug)]
pub struct LineCommandSource {
    latest: watch::Receiver<Option<(String, Instant)>>,
    reader: JoinHandle<()>,
    stale_after: Duration,
}

impl LineCommandSource {
    /// Open `path` and start reading it. Must be called inside a tokio runtime.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        info!(link = %path.display(), "Command link opened");
        Ok(Self::from_reader(tokio::fs::File::from_std(file)))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, latest) = watch::channel(None);

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tx.send_replace(Some((line.trim().to_string(), Instant::now())));
                    }
                    Ok(None) => {
                        debug!("Command link reached end of stream");
                        tx.send_replace(None);
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "Command link read failed");
                        tx.send_replace(None);
                        break;
                    }
                }
            }
        });

        Self {
            latest,
            reader,
            stale_after: LINK_SILENCE_TIMEOUT,
        }
    }

    /// Override how long a line stays current without a newer one.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl CommandSource for LineCommandSource {
    fn read(&mut self) -> Option<String> {
        match &*self.latest.borrow() {
            Some((line, received)) if received.elapsed() <= self.stale_after => Some(line.clone()),
            _ => None,
        }
    }
}

impl Drop for LineCommandSource {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Stand-in for a link that failed to open.
#[derive(Debug, Clone)]
pub struct UnavailableSource {
    link: String,
}

impl UnavailableSource {
    pub fn new(link: impl Into<String>) -> Self {
        Self { link: link.into() }
    }

    pub fn link(&self) -> &str {
        &self.link
    }
}

impl CommandSource for UnavailableSource {
    fn read(&mut self) -> Option<String> {
        None
    }

    fn is_degraded(&self) -> bool {
        true
    }
}

/// Replays a fixed list of lines, then keeps returning the last one.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    script: VecDeque<String>,
    last: Option<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: lines.into_iter().map(Into::into).collect(),
            last: None,
        }
    }

    /// Same line on every read.
    pub fn constant(line: impl Into<String>) -> Self {
        Self::new([line.into()])
    }
}

impl CommandSource for ScriptedSource {
    fn read(&mut self) -> Option<String> {
        if let Some(line) = self.script.pop_front() {
            self.last = Some(line);
        }
        self.last.clone()
    }
}

// =============================================================================
// FACTORIES
// =============================================================================

/// Creates each vehicle's command source inside its group's runtime.
pub trait SourceFactory: Send + Sync {
    fn open(&self, record: &VehicleRecord) -> Box<dyn CommandSource>;
}

impl<F> SourceFactory for F
where
    F: Fn(&VehicleRecord) -> Box<dyn CommandSource> + Send + Sync,
{
    fn open(&self, record: &VehicleRecord) -> Box<dyn CommandSource> {
        self(record)
    }
}

/// Opens `record.link` as a line source, degrading on failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkSourceFactory;

impl SourceFactory for LinkSourceFactory {
    fn open(&self, record: &VehicleRecord) -> Box<dyn CommandSource> {
        match LineCommandSource::open(&record.link) {
            Ok(source) => Box::new(source),
            Err(err) => {
                warn!(
                    vehicle_id = record.vehicle_id.0,
                    link = %record.link,
                    error = %err,
                    "Command link unavailable, vehicle will run on zero commands"
                );
                Box::new(UnavailableSource::new(record.link.clone()))
            }
        }
    }
}

/// Every vehicle receives the same fixed line (dry runs).
#[derive(Debug, Clone)]
pub struct ConstantSourceFactory {
    line: String,
}

impl ConstantSourceFactory {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    pub fn zero() -> Self {
        Self::new("0,0,0,0")
    }
}

impl SourceFactory for ConstantSourceFactory {
    fn open(&self, _record: &VehicleRecord) -> Box<dyn CommandSource> {
        Box::new(ScriptedSource::constant(self.line.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_domain::GroupId;
    use tokio::io::AsyncWriteExt;

    fn record(link: &str) -> VehicleRecord {
        VehicleRecord {
            vehicle_id: VehicleId(9),
            link: link.to_string(),
            group_id: GroupId(0),
        }
    }

    #[test]
    fn test_decode_valid_command() {
        let cmd = decode_command(VehicleId(1), Some("0.1,0.2,0.3,4"), Duration::ZERO).unwrap();
        assert_eq!(cmd, CommandVector::new(0.1, 0.2, 0.3, 4.0));
    }

    #[test]
    fn test_decode_malformed_command_warns_with_vehicle_id() {
        let elapsed = Duration::from_millis(1234);
        let warning = decode_command(VehicleId(4), Some("1,2,bad,4"), elapsed).unwrap_err();

        assert_eq!(warning.vehicle_id, VehicleId(4));
        assert_eq!(warning.elapsed, elapsed);
        assert_eq!(warning.payload.as_deref(), Some("1,2,bad,4"));
        assert!(matches!(warning.reason, CommandParseError::NotANumber { .. }));
    }

    #[test]
    fn test_decode_absent_command() {
        let warning = decode_command(VehicleId(2), None, Duration::ZERO).unwrap_err();
        assert_eq!(warning.reason, CommandParseError::Absent);
        assert_eq!(warning.payload, None);
    }

    #[test]
    fn test_scripted_source_holds_last_line() {
        let mut source = ScriptedSource::new(["a", "b"]);
        assert_eq!(source.read().as_deref(), Some("a"));
        assert_eq!(source.read().as_deref(), Some("b"));
        assert_eq!(source.read().as_deref(), Some("b"));

        let mut empty = ScriptedSource::default();
        assert_eq!(empty.read(), None);
    }

    #[test]
    fn test_unavailable_source_is_degraded() {
        let mut source = UnavailableSource::new("/dev/ttyUSB7");
        assert!(source.is_degraded());
        assert_eq!(source.read(), None);
        assert_eq!(source.link(), "/dev/ttyUSB7");
    }

    #[test]
    fn test_link_factory_degrades_missing_link() {
        let source = tokio_test::block_on(async {
            LinkSourceFactory.open(&record("/nonexistent/fleet-sim/link"))
        });
        assert!(source.is_degraded());
    }

    #[test]
    fn test_closure_factory() {
        let factory = |r: &VehicleRecord| -> Box<dyn CommandSource> {
            Box::new(ScriptedSource::constant(format!("{},0,0,0", r.vehicle_id.0)))
        };
        let mut source = factory.open(&record("x"));
        assert_eq!(source.read().as_deref(), Some("9,0,0,0"));
    }

    #[tokio::test]
    async fn test_line_source_keeps_latest_line() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let mut source = LineCommandSource::from_reader(reader);
        assert_eq!(source.read(), None);

        writer.write_all(b"1,0,0,0\n 0.5,0.5,0,2 \n").await.unwrap();
        writer.flush().await.unwrap();

        let latest = wait_for(&mut source, |line| line == Some("0.5,0.5,0,2")).await;
        assert_eq!(latest.as_deref(), Some("0.5,0.5,0,2"));

        drop(writer);
        let after_eof = wait_for(&mut source, |line| line.is_none()).await;
        assert_eq!(after_eof, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_link_goes_stale() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let mut source = LineCommandSource::from_reader(reader);

        writer.write_all(b"5,5,5,5\n").await.unwrap();
        writer.flush().await.unwrap();
        let latest = wait_for(&mut source, |line| line == Some("5,5,5,5")).await;
        assert_eq!(latest.as_deref(), Some("5,5,5,5"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(source.read().as_deref(), Some("5,5,5,5"));

        // Link still open, nothing new for longer than the timeout
        tokio::time::advance(LINK_SILENCE_TIMEOUT).await;
        assert_eq!(source.read(), None);
        let warning = decode_command(VehicleId(1), source.read().as_deref(), Duration::ZERO);
        assert_eq!(warning.unwrap_err().reason, CommandParseError::Absent);

        // A fresh line makes the link current again
        writer.write_all(b"1,0,0,0\n").await.unwrap();
        writer.flush().await.unwrap();
        let latest = wait_for(&mut source, |line| line == Some("1,0,0,0")).await;
        assert_eq!(latest.as_deref(), Some("1,0,0,0"));
        drop(writer);
    }

    async fn wait_for(
        source: &mut LineCommandSource,
        done: impl Fn(Option<&str>) -> bool,
    ) -> Option<String> {
        for _ in 0..200 {
            let line = source.read();
            if done(line.as_deref()) {
                return line;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        source.read()
    }
}
