/// Plain-text log file output
///
/// The writer is opened from `LoggerConfig::file_path` by `init_file_logging`
/// and shared behind a mutex. Write failures are reported once on stderr and
/// otherwise ignored so logging never fails the caller.
use super::config::get_logger_config;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static LOG_FILE: Lazy<Mutex<Option<BufWriter<fs::File>>>> = Lazy::new(|| Mutex::new(None));
static WRITE_ERROR_REPORTED: AtomicBool = AtomicBool::new(false);

pub fn init_file_logging() {
    let config = get_logger_config();
    let mut guard = LOG_FILE.lock();

    if let Some(writer) = guard.as_mut() {
        let _ = writer.flush();
    }
    *guard = None;

    let Some(path) = config.file_path else {
        return;
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory {}: {}", parent.display(), e);
                return;
            }
        }
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => *guard = Some(BufWriter::new(file)),
        Err(e) => eprintln!("Failed to open log file {}: {}", path.display(), e),
    }
}

pub fn write_to_file(line: &str) {
    let mut guard = LOG_FILE.lock();
    if let Some(writer) = guard.as_mut() {
        if let Err(e) = writeln!(writer, "{}", line) {
            if !WRITE_ERROR_REPORTED.swap(true, Ordering::Relaxed) {
                eprintln!("Log file write failed: {}", e);
            }
        }
    }
}

pub fn flush_file_logging() {
    if let Some(writer) = LOG_FILE.lock().as_mut() {
        let _ = writer.flush();
    }
}
