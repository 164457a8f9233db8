use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

/// Log file that keeps at most `max_lines` recent lines on disk.
///
/// The tail lives in a bounded ring; lines are appended to the file as they
/// arrive and the file is rewritten from the ring once it holds a full extra
/// window, so the file never exceeds twice the limit.
#[derive(Clone)]
pub(crate) struct RingLogWriter {
    inner: Arc<Mutex<RingLog>>,
}

struct RingLog {
    path: PathBuf,
    max_lines: usize,
    tail: VecDeque<String>,
    partial: String,
    lines_on_disk: usize,
    file: Option<File>,
}

impl RingLogWriter {
    pub fn new(path: impl Into<PathBuf>, max_lines: u32) -> Self {
        let path = path.into();
        let max_lines = (max_lines as usize).max(1);
        let mut log = RingLog {
            tail: VecDeque::with_capacity(max_lines.min(4096)),
            partial: String::new(),
            lines_on_disk: 0,
            file: None,
            path,
            max_lines,
        };
        log.load_existing();
        Self {
            inner: Arc::new(Mutex::new(log)),
        }
    }
}

impl RingLog {
    /// Seed the ring from a previous run so the first compaction keeps it.
    fn load_existing(&mut self) {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return;
        };
        for line in content.lines() {
            self.push_line(line.to_owned());
        }
        self.lines_on_disk = content.lines().count();
    }

    fn push_line(&mut self, line: String) {
        if self.tail.len() == self.max_lines {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.lines_on_disk >= self.max_lines * 2 {
            self.compact()?;
        }
        if self.file.is_none() {
            self.file = Some(open_append(&self.path)?);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }

        self.partial.push_str(&String::from_utf8_lossy(buf));
        while let Some(end) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=end).collect();
            self.push_line(line.trim_end_matches(['\r', '\n']).to_owned());
            self.lines_on_disk += 1;
        }
        Ok(())
    }

    fn compact(&mut self) -> io::Result<()> {
        self.file = None;
        let mut file = File::create(&self.path)?;
        for line in &self.tail {
            writeln!(file, "{}", line)?;
        }
        self.lines_on_disk = self.tail.len();
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl io::Write for RingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RingLogWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
