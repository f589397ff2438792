//! Byte-for-byte copying between the supervisor's stdio and the child's.
//!
//! Each read is written out in full and flushed before the next read, so the
//! child and the editor see each other's bytes as soon as they are produced.
//! Nothing here looks at the data.

use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use crate::error::{Direction, TraceError};

const BUF_SIZE: usize = 64 * 1024;

/// Copies `reader` to `writer` until EOF. Returns the number of bytes copied.
///
/// Read errors and write errors both end the copy. `writer` is dropped on
/// return, which closes the pipe when it is the child's stdin.
pub fn pump<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
) -> Result<u64, TraceError> {
    let err = |source| TraceError::Passthrough { direction, source };
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(err(e)),
        };
        writer.write_all(&buf[..n]).map_err(err)?;
        writer.flush().map_err(err)?;
        total += n as u64;
    }
}

/// Runs [`pump`] on a named thread; a failure is sent to `failures`.
///
/// The returned handle finishes when the copy does.
pub fn spawn_pump<R, W>(
    name: &str,
    reader: R,
    writer: W,
    direction: Direction,
    failures: Sender<TraceError>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match pump(reader, writer, direction) {
            Ok(bytes) => log::debug!("{direction} closed after {bytes} bytes"),
            Err(e) => {
                let _ = failures.send(e);
            }
        })
}

/// Reads `reader` line by line (lossy UTF-8) and sends each line.
///
/// The channel closes at EOF or on a read error.
pub fn spawn_line_reader<R>(reader: R, lines: Sender<String>) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("stderr-reader".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if lines.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        log::warn!("Reading child stderr failed: {e}");
                        break;
                    }
                }
            }
        })
}
