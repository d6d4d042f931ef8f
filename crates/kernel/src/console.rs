use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Destination of `print`. Defaults to stdout.
pub struct Console {
    sink: Box<dyn Write + Send>,
}

impl Console {
    pub fn stdout() -> Self {
        Self { sink: Box::new(io::stdout()) }
    }

    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self { sink }
    }

    /// A console that records everything printed, plus a handle to read it.
    pub fn capture() -> (Self, Captured) {
        let buf = Captured::default();
        (Self { sink: Box::new(buf.clone()) }, buf)
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        if let Err(err) = self.sink.write_all(bytes).and_then(|_| self.sink.flush()) {
            log::warn!("console write failed: {}", err);
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

/// Shared buffer behind [`Console::capture`].
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        match self.0.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for Captured {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().map_err(|_| io::Error::other("capture buffer poisoned"))?;
        buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
