use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SyncRecord {
    timestamp: Instant,
    level: Level,
    target: String,
    content: String,
}

/// Receiving half of the logger. Records are printed from whichever thread
/// drains it, so real-time threads never touch stdout.
pub struct LogSink {
    receiver: Receiver<SyncRecord>,
    start: Instant,
}

pub struct Logger {
    sender: SyncSender<SyncRecord>,
    level: LevelFilter,
}

impl Logger {
    pub fn init(level: LevelFilter) -> LogSink {
        let (sender, receiver) = sync_channel(64);
        let start = Instant::now();
        let logger = Box::new(Self {
            sender,
            level,
        });
        let _ = log::set_logger(Box::leak(logger)).map(|()| log::set_max_level(level));

        LogSink {
            receiver,
            start,
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Dropped when the sink lags behind.
            let _ = self.sender.try_send(SyncRecord {
                timestamp: Instant::now(),
                level: record.level(),
                target: record.target().to_owned(),
                content: std::fmt::format(*record.args()),
            });
        }
    }

    fn flush(&self) {}
}

impl SyncRecord {
    fn line(&self, start: Instant) -> String {
        // Crate path is noise, keep the module
        let target = self.target.rsplit("::").next().unwrap_or(&self.target);
        format!(
            "[{:<9.5}] {:<5} {}: {}",
            self.timestamp.saturating_duration_since(start).as_secs_f32(),
            self.level,
            target,
            self.content
        )
    }
}

impl LogSink {
    /// Print every pending record. Call it periodically from a thread that
    /// may block on stdout.
    pub fn handle_logs(&mut self) {
        for record in self.receiver.try_iter() {
            println!("{}", record.line(self.start));
        }
    }
}
