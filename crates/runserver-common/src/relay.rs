// Line relays between the operator console and the server process.
//
// Lines are copied as raw bytes including their terminator (`\n`, `\r\n`,
// or none for a final unterminated line), so the console sees exactly what
// the server wrote.

use runserver_sdk::TraceWriter;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    /// Lines delivered to the sink.
    pub lines: u64,
    /// True if the sink failed and the rest of the source was discarded.
    pub sink_failed: bool,
}

/// Copy `source` to `sink` line by line until end-of-stream.
///
/// A failing sink does not close the source: the remaining output is read
/// and discarded so the server never blocks or dies on a broken pipe.
/// A failing source ends the relay with the error.
pub async fn relay_lines<R, W>(
    name: &'static str,
    source: R,
    mut sink: W,
    trace: Arc<dyn TraceWriter>,
) -> io::Result<RelaySummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut line = Vec::with_capacity(256);
    let mut summary = RelaySummary {
        lines: 0,
        sink_failed: false,
    };

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if summary.sink_failed {
            continue;
        }
        match write_line(&mut sink, &line).await {
            Ok(()) => summary.lines += 1,
            Err(e) => {
                trace.warning(&format!(
                    "Console {name} relay failed, discarding further server output: {e}"
                ));
                summary.sink_failed = true;
            }
        }
    }

    Ok(summary)
}

async fn write_line<W: AsyncWrite + Unpin>(sink: &mut W, line: &[u8]) -> io::Result<()> {
    sink.write_all(line).await?;
    sink.flush().await
}

/// Forward console input to the server line by line.
///
/// Ends on end-of-stream from the console, on `cancel`, or when the server
/// stops accepting input. Dropping `sink` on return closes the server's stdin.
pub async fn forward_input<R, W>(
    source: R,
    mut sink: W,
    cancel: CancellationToken,
) -> io::Result<RelaySummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut line = Vec::with_capacity(256);
    let mut lines = 0u64;

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            break;
        }
        write_line(&mut sink, &line).await?;
        lines += 1;
    }

    Ok(RelaySummary {
        lines,
        sink_failed: false,
    })
}

/// Run a relay on its own task, logging how it ended. Relay failures never
/// propagate; they only stop that one relay.
pub fn spawn_relay<F>(name: &'static str, relay: F, trace: Arc<dyn TraceWriter>) -> JoinHandle<()>
where
    F: Future<Output = io::Result<RelaySummary>> + Send + 'static,
{
    tokio::spawn(async move {
        match relay.await {
            Ok(summary) => trace.verbose(&format!(
                "Console {name} relay finished after {} lines.",
                summary.lines
            )),
            Err(e) => trace.warning(&format!("Console {name} relay stopped: {e}")),
        }
    })
}
