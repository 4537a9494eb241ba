use std::io::{SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const TAIL_WINDOW: u64 = 64 * 1024;

/// Print the last `lines` lines of `path`, then keep printing what gets
/// appended until Ctrl+C. A truncated or rotated file is read from the start.
pub async fn follow(path: &Path, lines: usize) -> Result<()> {
    if !path.is_file() {
        bail!("No log file found at {}. Is the node running?", path.display());
    }

    let tail = read_tail(path, lines).await?;
    let mut offset = tail.end;
    let mut pending = Vec::new();
    emit(&tail.text)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("stopped following {}", path.display());
                return Ok(());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                let len = match tokio::fs::metadata(path).await {
                    Ok(meta) => meta.len(),
                    // Rotation in progress; try again on the next tick.
                    Err(_) => continue,
                };
                if len < offset {
                    offset = 0;
                    pending.clear();
                }
                if len == offset {
                    continue;
                }
                let (bytes, next) = read_from(path, offset).await?;
                offset = next;
                emit(&decode_chunk(&mut pending, bytes))?;
            }
        }
    }
}

fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// The end of a log file, as printed before following starts.
#[derive(Debug)]
pub struct Tail {
    pub text: String,
    /// File length when the tail was taken; following resumes here.
    pub end: u64,
    /// Bytes read to find the tail.
    pub scanned: u64,
}

/// The last `lines` lines of `path`, reading backwards from the end in
/// growing windows until enough line breaks are seen.
pub async fn read_tail(path: &Path, lines: usize) -> Result<Tail> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let end = file.metadata().await?.len();

    let mut window = TAIL_WINDOW;
    loop {
        let start = end.saturating_sub(window);
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = Vec::with_capacity((end - start) as usize);
        (&mut file).take(end - start).read_to_end(&mut buf).await?;

        let body = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let breaks = body.iter().filter(|b| **b == b'\n').count();
        if start == 0 || breaks >= lines {
            let text = String::from_utf8_lossy(&buf);
            return Ok(Tail {
                text: tail_lines(&text, lines).to_string(),
                end,
                scanned: buf.len() as u64,
            });
        }
        window = window.saturating_mul(2);
    }
}

/// Everything from `offset` to the end of the file, and the new end offset.
pub async fn read_from(path: &Path, offset: u64) -> Result<(Vec<u8>, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    let read = file.read_to_end(&mut buf).await?;
    Ok((buf, offset + read as u64))
}

/// Decode `bytes` appended after `pending`. A character cut off at the end is
/// held back in `pending` for the next chunk.
pub fn decode_chunk(pending: &mut Vec<u8>, bytes: Vec<u8>) -> String {
    pending.extend(bytes);
    let mut valid = 0;
    let cut = loop {
        match std::str::from_utf8(&pending[valid..]) {
            Ok(_) => break pending.len(),
            Err(e) => match e.error_len() {
                Some(bad) => valid += e.valid_up_to() + bad,
                None => break valid + e.valid_up_to(),
            },
        }
    };
    let rest = pending.split_off(cut);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

/// The last `n` lines of `text`, keeping their line endings.
pub fn tail_lines(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    match body.rmatch_indices('\n').nth(n - 1) {
        Some((idx, _)) => &text[idx + 1..],
        None => text,
    }
}
