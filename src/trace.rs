//! Chrome trace output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

struct Event<'a> {
    name: &'a str,
    tid: usize,
    start: Instant,
    end: Instant,
}

struct Writer {
    w: BufWriter<File>,
}

/// A trace file shared by all worker threads.  Each event is one complete
/// ("X") event on the track of the thread that ran it.
pub struct Trace {
    start: Instant,
    writer: Mutex<Writer>,
}

impl Trace {
    pub fn open(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            writer: Mutex::new(Writer { w }),
        })
    }

    fn write_event(&self, w: &mut BufWriter<File>, event: Event) -> std::io::Result<()> {
        let name = serde_json::to_string(event.name)?;
        write!(
            w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            event.tid,
            name,
            event.start.duration_since(self.start).as_micros(),
            event.end.duration_since(event.start).as_micros()
        )
    }

    /// Run `f`, recording how long it took under `name`.
    pub fn scope<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        let event = Event {
            name,
            tid: rayon::current_thread_index().map(|i| i + 1).unwrap_or(0),
            start,
            end: Instant::now(),
        };
        let mut writer = self.writer.lock().unwrap();
        // Tracing is a debugging aid; a failed write is not worth failing the build.
        let _ = self
            .write_event(&mut writer.w, event)
            .and_then(|_| writeln!(writer.w, ","));
        result
    }

    pub fn close(&self) -> std::io::Result<()> {
        let mut writer = self.writer.lock().unwrap();
        self.write_event(
            &mut writer.w,
            Event {
                name: "main",
                tid: 0,
                start: self.start,
                end: Instant::now(),
            },
        )?;
        writeln!(writer.w, "]")?;
        writer.w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_array() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("trace.json");
        let trace = Trace::open(path.to_str().unwrap())?;
        let v = trace.scope("compile a.c", || 42);
        assert_eq!(v, 42);
        trace.close()?;
        let text = std::fs::read_to_string(&path)?;
        let parsed: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(parsed.as_array().map(|a| a.len()), Some(2));
        Ok(())
    }

    #[test]
    fn escapes_event_names() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("trace.json");
        let trace = Trace::open(path.to_str().unwrap())?;
        let name = "compile \"odd\u{1}name\".c";
        trace.scope(name, || ());
        trace.close()?;
        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed[0]["name"].as_str(), Some(name));
        Ok(())
    }
}
