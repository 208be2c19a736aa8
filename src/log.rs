use crate::ffi::LogPrintf;
use std::ffi::CString;
use std::fmt;
use std::rc::Rc;

/// Where rendered log lines end up.
#[derive(Clone)]
pub enum LogSink {
    /// The host's printf-style function from the plugin data table.
    Host(LogPrintf),
    Stderr,
    Capture(Rc<dyn Fn(&str)>),
}

impl LogSink {
    pub fn capture(f: impl Fn(&str) + 'static) -> Self {
        Self::Capture(Rc::new(f))
    }

    fn emit(&self, line: &str) {
        match self {
            Self::Host(printf) => {
                let line = to_c_line(line);
                // The message is passed as an argument so it is never parsed as a format string.
                unsafe { printf(c"%s".as_ptr(), line.as_ptr()) };
            }
            Self::Stderr => eprintln!("{line}"),
            Self::Capture(f) => f(line),
        }
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(_) => f.write_str("Host"),
            Self::Stderr => f.write_str("Stderr"),
            Self::Capture(_) => f.write_str("Capture"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Logger {
    sink: LogSink,
    prefix: Option<Rc<str>>,
}

impl Logger {
    pub fn new(sink: LogSink, name: &str) -> Self {
        let prefix = (!name.is_empty()).then(|| Rc::from(name));
        Self { sink, prefix }
    }

    pub fn unprefixed(sink: LogSink) -> Self {
        Self { sink, prefix: None }
    }

    pub fn stderr() -> Self {
        Self::unprefixed(LogSink::Stderr)
    }

    pub fn name(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn render(&self, message: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("[{prefix}] {message}"),
            None => message.to_string(),
        }
    }

    pub fn log(&self, message: impl AsRef<str>) {
        self.sink.emit(&self.render(message.as_ref()));
    }
}

fn to_c_line(line: &str) -> CString {
    let bytes: Vec<u8> = line.bytes().filter(|b| *b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn prefix_only_when_named() {
        let named = Logger::new(LogSink::Stderr, "Pawn.Example");
        assert_eq!(named.render("plugin loaded"), "[Pawn.Example] plugin loaded");
        let anonymous = Logger::new(LogSink::Stderr, "");
        assert_eq!(anonymous.render("plugin loaded"), "plugin loaded");
    }

    #[test]
    fn capture_sink_receives_rendered_lines() {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let sink_lines = lines.clone();
        let logger = Logger::new(LogSink::capture(move |line| sink_lines.borrow_mut().push(line.to_string())), "demo");
        logger.log("first");
        logger.log(format!("second {}", 2));
        assert_eq!(*lines.borrow(), vec!["[demo] first".to_string(), "[demo] second 2".to_string()]);
    }

    #[test]
    fn host_lines_drop_interior_nuls() {
        assert_eq!(to_c_line("a\0b").as_bytes(), b"ab");
    }
}
