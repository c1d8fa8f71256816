//! Log-file tailing for detached services.
//!
//! Each tailed file gets its own OS thread that seeks to the end and polls
//! for appended lines, pushing them onto a shared queue. The UI drains the
//! queue on its tick with a per-panel batch cap so one chatty service
//! cannot starve the other panel.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::events::PanelKind;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A tailed line waiting to be drained into its panel.
#[derive(Debug, Clone)]
pub struct TailLine {
    pub panel: PanelKind,
    pub text: String,
}

/// Owns the tailer threads and the queue they feed.
pub struct LogTailer {
    queue: Arc<Mutex<VecDeque<TailLine>>>,
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Default for LogTailer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTailer {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Starts tailing `path` into `panel`. The file does not need to exist
    /// yet; the thread waits for it to appear.
    pub fn watch(&mut self, path: PathBuf, panel: PanelKind) {
        let queue = Arc::clone(&self.queue);
        let stop = Arc::clone(&self.stop);
        let handle = thread::spawn(move || tail_loop(path, panel, queue, stop));
        self.handles.push(handle);
    }

    /// Pops up to `per_panel` queued lines for each panel, preserving the
    /// arrival order within a panel.
    pub fn drain(&self, per_panel: usize) -> Vec<TailLine> {
        let mut queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut backend = 0usize;
        let mut frontend = 0usize;
        let mut other = 0usize;
        let mut drained = Vec::new();
        let mut rest = VecDeque::new();
        while let Some(line) = queue.pop_front() {
            let count = match line.panel {
                PanelKind::Backend => &mut backend,
                PanelKind::Frontend => &mut frontend,
                PanelKind::Output => &mut other,
            };
            if *count < per_panel {
                *count += 1;
                drained.push(line);
            } else {
                rest.push_back(line);
            }
        }
        *queue = rest;
        drained
    }

    /// Signals every tailer thread to exit. Threads notice within one poll
    /// interval; they are detached rather than joined so shutdown never
    /// blocks the UI.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn tail_loop(
    path: PathBuf,
    panel: PanelKind,
    queue: Arc<Mutex<VecDeque<TailLine>>>,
    stop: Arc<AtomicBool>,
) {
    let mut reader: Option<BufReader<File>> = None;
    let mut pos: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        if reader.is_none() {
            if let Ok(file) = File::open(&path) {
                let mut buf = BufReader::new(file);
                // Start at the end, old content belongs to previous runs.
                if let Ok(end) = buf.seek(SeekFrom::End(0)) {
                    pos = end;
                    reader = Some(buf);
                }
            }
            if reader.is_none() {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        }

        let buf = reader.as_mut().unwrap();
        let mut line = String::new();
        match buf.read_line(&mut line) {
            Ok(0) => {
                // Rotation or truncation: the file shrank under us.
                let len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if len < pos {
                    if buf.seek(SeekFrom::Start(0)).is_ok() {
                        pos = 0;
                        continue;
                    }
                    reader = None;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(n) => {
                pos += n as u64;
                let text = line.trim_end().to_string();
                if let Ok(mut guard) = queue.lock() {
                    guard.push_back(TailLine { panel, text });
                }
            }
            Err(_) => {
                reader = None;
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        for _ in 0..50 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(100));
        }
        false
    }

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("devdeck-tail-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("svc.log")
    }

    #[test]
    fn picks_up_appended_lines_only() {
        let path = scratch("append");
        std::fs::write(&path, "old line\n").unwrap();

        let mut tailer = LogTailer::new();
        tailer.watch(path.clone(), PanelKind::Backend);
        thread::sleep(Duration::from_millis(400));

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "fresh line").unwrap();
        file.flush().unwrap();

        let seen: Mutex<Vec<TailLine>> = Mutex::new(Vec::new());
        assert!(wait_for(|| {
            let mut guard = seen.lock().unwrap();
            guard.extend(tailer.drain(20));
            guard.iter().any(|l| l.text == "fresh line")
        }));
        assert!(!seen.lock().unwrap().iter().any(|l| l.text == "old line"));
        tailer.shutdown();
    }

    #[test]
    fn drain_caps_each_panel_per_call() {
        let tailer = LogTailer::new();
        {
            let mut queue = tailer.queue.lock().unwrap();
            for i in 0..30 {
                queue.push_back(TailLine {
                    panel: PanelKind::Backend,
                    text: format!("be {i}"),
                });
            }
            queue.push_back(TailLine {
                panel: PanelKind::Frontend,
                text: "fe 0".into(),
            });
        }
        let batch = tailer.drain(20);
        let backend = batch.iter().filter(|l| l.panel == PanelKind::Backend).count();
        let frontend = batch.iter().filter(|l| l.panel == PanelKind::Frontend).count();
        assert_eq!(backend, 20);
        assert_eq!(frontend, 1);
        // the overflow is still queued, in order
        let rest = tailer.drain(20);
        assert_eq!(rest.len(), 10);
        assert_eq!(rest[0].text, "be 20");
    }

    #[test]
    fn truncated_file_is_reread_from_start() {
        let path = scratch("truncate");
        std::fs::write(&path, "seed\n").unwrap();

        let mut tailer = LogTailer::new();
        tailer.watch(path.clone(), PanelKind::Frontend);
        thread::sleep(Duration::from_millis(400));

        // Simulate rotation: replace with a shorter file.
        std::fs::write(&path, "x\n").unwrap();

        let mut seen = Vec::new();
        wait_for(|| {
            seen.extend(tailer.drain(20));
            seen.iter().any(|l| l.text == "x")
        });
        assert!(seen.iter().any(|l| l.text == "x"));
        tailer.shutdown();
    }
}
