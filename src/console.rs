//! Console Interface
//!
//! The kernel only needs two things from the console device: write bytes,
//! and poll for one byte without blocking. The device driver behind it is
//! supplied by the embedding kernel.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt::{self, Write};

/// Byte-oriented console device.
pub trait Console {
    /// Write raw bytes to the console.
    fn write_bytes(&mut self, bytes: &[u8]);

    /// Read one byte if one is waiting.
    fn read_byte(&mut self) -> Option<u8>;
}

/// In-memory console: scripted input, captured output.
#[derive(Debug, Default)]
pub struct BufferConsole {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferConsole {
    /// Create an empty console.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be read back by `read_byte`.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Drain the captured output.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}

impl Console for BufferConsole {
    fn write_bytes(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

impl Write for BufferConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}
