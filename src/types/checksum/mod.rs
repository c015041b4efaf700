#![forbid(unsafe_code)]

/// Incremental 32-bit checksum.
pub trait Checksum {
    /// Restarts the computation.
    fn reset(&mut self);
    /// Feeds more bytes.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of everything fed since the last reset.
    fn finalize(&self) -> u32;
}

/// CRC32C (Castagnoli) over the bytes fed so far.
#[derive(Clone, Copy, Debug, Default)]
pub struct Crc32c {
    state: u32,
}

impl Checksum for Crc32c {
    fn reset(&mut self) {
        self.state = 0;
    }

    fn update(&mut self, bytes: &[u8]) {
        self.state = ::crc32c::crc32c_append(self.state, bytes);
    }

    fn finalize(&self) -> u32 {
        self.state
    }
}
