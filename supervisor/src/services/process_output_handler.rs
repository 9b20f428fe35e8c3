//! Helper to handle child process stdout/stderr output
//!
//! Each pipe is read line by line on its own task. Lines are traced and
//! forwarded to the supervisor while it is still watching startup; after the
//! receiver is dropped the task keeps draining so the child never blocks on a
//! full pipe.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::traits::{OutputLine, OutputStream};
use shared::{component_debug, component_warn, ComponentId};

/// Spawn a task that forwards every line of `reader` to `tx`
pub fn spawn_output_forwarder<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut forwarding = true;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    match stream {
                        OutputStream::Stdout => {
                            component_debug!(ComponentId::Supervisor, "[service] {}", line);
                        }
                        OutputStream::Stderr => {
                            component_warn!(ComponentId::Supervisor, "[service:stderr] {}", line);
                        }
                    }
                    if forwarding && tx.send(OutputLine { stream, line }).await.is_err() {
                        forwarding = false;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    component_debug!(ComponentId::Supervisor, "Stopped reading service {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}
