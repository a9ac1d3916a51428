use tracing::debug;

/// Supplies the bytes for every outgoing packet. Contents are opaque to the pipeline.
pub trait PayloadSource {
    fn next_payload(&mut self) -> &[u8];
}

/// Receives every incoming packet before its buffer is freed.
pub trait PayloadSink {
    fn on_received(&mut self, data: &[u8], len: usize);
}

/// Sends the same bytes every time.
#[derive(Debug, Clone)]
pub struct StaticPayload {
    data: Vec<u8>,
}

impl StaticPayload {
    pub fn new<T: Into<Vec<u8>>>(data: T) -> StaticPayload {
        StaticPayload { data: data.into() }
    }
}

impl Default for StaticPayload {
    fn default() -> Self {
        StaticPayload::new("Hello test!")
    }
}

impl PayloadSource for StaticPayload {
    fn next_payload(&mut self) -> &[u8] {
        &self.data
    }
}

/// Logs the length of each received packet at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthLogger;

impl PayloadSink for LengthLogger {
    fn on_received(&mut self, _data: &[u8], len: usize) {
        debug!("received packet of length {} bytes", len);
    }
}

/// Counts what it is handed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingSink {
    pub packets: usize,
    pub bytes: usize,
}

impl PayloadSink for CountingSink {
    fn on_received(&mut self, _data: &[u8], len: usize) {
        self.packets += 1;
        self.bytes += len;
    }
}

impl<F> PayloadSink for F
where
    F: FnMut(&[u8], usize),
{
    fn on_received(&mut self, data: &[u8], len: usize) {
        self(data, len)
    }
}
