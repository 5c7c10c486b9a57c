//! Per-invocation output buffer passed into command callbacks.

/// Collects everything a command callback writes during one invocation.
///
/// The session engine drains the sink after dispatch and flushes it at a
/// transport-appropriate point: per datagram for connectionless sessions,
/// streamed for interactive ones. Callbacks never write to a transport
/// directly.
#[derive(Debug, Default)]
pub struct OutputSink {
    buffer: String,
}

impl OutputSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text verbatim.
    pub fn write(&mut self, text: impl AsRef<str>) {
        self.buffer.push_str(text.as_ref());
    }

    /// Appends text followed by a newline.
    pub fn writeln(&mut self, text: impl AsRef<str>) {
        self.buffer.push_str(text.as_ref());
        self.buffer.push('\n');
    }

    /// True when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drains the buffered output, leaving the sink empty for reuse.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}
