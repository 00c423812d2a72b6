//! Tail a log file by reading backward in chunks, so huge logs never get
//! slurped whole just to show the last few lines.

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

const CHUNK_SIZE: u64 = 64 * 1024;

/// Last `max_lines` lines of `path`, reading at most `max_bytes` from the
/// end. When the byte budget runs out before the line budget is satisfied,
/// the result is prefixed with a truncation marker. Any I/O failure yields
/// an empty string; tailing is advisory.
pub fn tail_lines(path: &Path, max_lines: usize, max_bytes: u64) -> String {
    match tail_lines_inner(path, max_lines, max_bytes) {
        Ok(text) => text,
        Err(_) => String::new(),
    }
}

fn tail_lines_inner(path: &Path, max_lines: usize, max_bytes: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size == 0 || max_lines == 0 {
        return Ok(String::new());
    }

    // Overshoot the line budget a little so a partial first line in the
    // oldest chunk cannot eat into the requested count.
    let newline_target = max_lines.saturating_add(5);
    let mut collected: Vec<u8> = Vec::new();
    let mut position = size;
    let mut read_bytes: u64 = 0;

    while position > 0 && read_bytes < max_bytes {
        let chunk_len = CHUNK_SIZE.min(position).min(max_bytes - read_bytes);
        position -= chunk_len;
        file.seek(SeekFrom::Start(position))?;
        let mut chunk = vec![0u8; chunk_len as usize];
        file.read_exact(&mut chunk)?;
        read_bytes += chunk_len;

        chunk.extend_from_slice(&collected);
        collected = chunk;

        let newlines = collected.iter().filter(|b| **b == b'\n').count();
        if newlines >= newline_target {
            break;
        }
    }

    let text = String::from_utf8_lossy(&collected);
    let mut lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let total = lines.len();
    let start = total.saturating_sub(max_lines);
    let tail = lines[start..].join("\n");

    if read_bytes >= max_bytes && total > max_lines {
        return Ok(format!(
            "[output truncated: read {}KB]\n{}",
            read_bytes / 1024,
            tail
        ));
    }
    Ok(tail)
}
