//! Production [`ByteSource`] backed by the `serialport` crate.
//!
//! The physical device driver is explicitly out of scope (SPEC_FULL.md §1):
//! this module only adapts a blocking serial handle with a short read
//! timeout to the [`ByteSource`] contract the frame reader needs.

use std::io::{Read, Write};
use std::time::Duration;

use crate::frame::ByteSource;

/// Opens the serial device at `path` with the given baud rate and a short
/// default read timeout, matching the "blocking-read timeout" contract
/// SPEC_FULL.md assumes of the device driver.
pub fn open(path: &str, baud: u32) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
    serialport::new(path, baud)
        .timeout(Duration::from_millis(50))
        .open()
}

/// Adapts a boxed `serialport::SerialPort` to the [`ByteSource`] contract
/// the frame reader needs.
pub struct PortByteSource {
    port: Box<dyn serialport::SerialPort>,
}

impl PortByteSource {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

impl ByteSource for PortByteSource {
    fn read_byte(&mut self, _timeout: Duration, _blocking: bool) -> std::io::Result<Option<u8>> {
        // `serialport`'s handle already enforces its own read timeout (set
        // at `open` time); a timed-out read surfaces as `ErrorKind::TimedOut`,
        // which we translate to `Ok(None)` so the frame reader's own
        // deadline bookkeeping stays authoritative.
        let mut buf = [0u8; 1];
        match self.port.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn flush_input(&mut self) {
        let _ = self.port.clear(serialport::ClearBuffer::Input);
    }
}

impl Write for PortByteSource {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}
