use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

/// Appends log lines to a file and trims the oldest lines once the file grows
/// past `max_lines`.
///
/// Trimming is batched: it runs after a tenth of `max_lines` (at least 50)
/// new lines have been written.
#[derive(Clone)]
pub struct LineCappedFileWriter {
    path: String,
    max_lines: u32,
    pending_lines: Arc<Mutex<u32>>,
}

impl LineCappedFileWriter {
    pub fn new(path: String, max_lines: u32) -> Self {
        Self {
            path,
            max_lines,
            pending_lines: Arc::new(Mutex::new(0)),
        }
    }

    fn trim_threshold(&self) -> u32 {
        (self.max_lines / 10).max(50)
    }

    fn trim(&self) -> io::Result<()> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = contents.lines().collect();
        let keep = self.max_lines as usize;
        if lines.len() <= keep {
            return Ok(());
        }

        let mut trimmed = lines[lines.len() - keep..].join("\n");
        trimmed.push('\n');
        fs::write(&self.path, trimmed)
    }
}

impl io::Write for LineCappedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf)?;

        let mut pending = self.pending_lines.lock();
        *pending += buf.iter().filter(|&&b| b == b'\n').count() as u32;
        if *pending >= self.trim_threshold() {
            if let Err(e) = self.trim() {
                eprintln!("Failed to trim log file: {}", e);
            }
            *pending = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LineCappedFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_max_lines() {
        let path = std::env::temp_dir().join(format!("dvdemux-log-{}.log", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        let _ = fs::remove_file(&path);

        let mut writer = LineCappedFileWriter::new(path_str.clone(), 10);
        for i in 0..100 {
            writeln!(writer, "line {}", i).unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines.last(), Some(&"line 99"));
        let _ = fs::remove_file(&path);
    }
}
