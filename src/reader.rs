//! Reader threads that drain the bot's stdout and stderr pipes.
use std::{
    io::{self, BufRead, BufReader, Read},
    sync::Arc,
    thread,
};

use tracing::{debug, warn};

use crate::logs::{LogLine, LogStream};

/// Destination for decoded lines.
///
/// Implemented by the supervisor's shared state; `generation` identifies the run
/// the reader was attached to so that late lines from a replaced process can be
/// told apart from the current one.
pub trait LineSink: Send + Sync + 'static {
    /// Receives one decoded line.
    fn ingest(&self, generation: u64, line: LogLine);
}

/// Reads `source` until end-of-stream, calling `on_line` for every line.
///
/// Lines are split on `\n` with an optional trailing `\r` removed. Invalid UTF-8
/// is replaced rather than rejected. A final line without a terminator is still
/// delivered.
pub fn pump_lines<R: Read>(source: R, mut on_line: impl FnMut(String)) -> io::Result<()> {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }

        on_line(String::from_utf8_lossy(&buf).into_owned());
    }
}

/// Spawns a thread forwarding every line of `source` into `sink`.
///
/// The thread ends on its own once the pipe closes, which happens when the
/// process exits or is killed. It never touches the process lifecycle.
pub fn spawn_reader<R, S>(
    stream: LogStream,
    generation: u64,
    source: R,
    sink: Arc<S>,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
    S: LineSink + ?Sized,
{
    thread::spawn(move || {
        debug!("Reader for {} attached (run {generation})", stream.as_ref());
        let result = pump_lines(source, |text| {
            sink.ingest(generation, LogLine::new(stream, text));
        });

        match result {
            Ok(()) => debug!("Reader for {} reached end of stream", stream.as_ref()),
            Err(err) => warn!("Reader for {} stopped on error: {err}", stream.as_ref()),
        }
    })
}
