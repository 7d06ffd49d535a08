/// Line-oriented frame input from a file, serial device or stdin
use log::{debug, error, info};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const STDIN_PATH: &str = "-";

/// What the reader task hands to the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// The source reached end of input or failed; no more lines follow
    Closed,
}

/// Spawn a task that forwards every line of `path` to `tx`
///
/// `-` reads stdin. A serial device path works as long as the port has
/// already been configured (baud rate etc.) outside this process.
///
/// Aborting the returned task does not stop a stdin read already in flight
/// on tokio's blocking pool; that line is lost. See [`is_reopenable`].
pub fn spawn_line_reader(path: String, tx: mpsc::Sender<InputEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if path == STDIN_PATH {
            info!("Reading frames from stdin");
            forward_lines(BufReader::new(tokio::io::stdin()), &tx).await;
        } else {
            match File::open(&path).await {
                Ok(file) => {
                    info!("Reading frames from {}", path);
                    forward_lines(BufReader::new(file), &tx).await;
                }
                Err(e) => error!("Failed to open input {}: {}", path, e),
            }
        }
        let _ = tx.send(InputEvent::Closed).await;
    })
}

/// Whether the input at `path` can be closed and opened again
///
/// Stdin cannot: a fresh reader would race the abandoned one for lines.
pub fn is_reopenable(path: &str) -> bool {
    path != STDIN_PATH
}

/// Forward non-empty lines until end of input, a read error, or the
/// receiver going away
///
/// Lines that are not valid UTF-8 (receiver noise) are dropped and the
/// stream continues.
pub async fn forward_lines<R>(mut reader: R, tx: &mpsc::Sender<InputEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return,
            Ok(_) => {
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line.trim_end_matches(['\r', '\n']),
                    Err(e) => {
                        debug!("Dropping non-UTF-8 input line: {}", e);
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }
                if tx.send(InputEvent::Line(line.to_string())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("Input read error: {}", e);
                return;
            }
        }
    }
}
