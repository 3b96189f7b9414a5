use std::io;

use serde::Serialize;

use crate::config::ConfigError;

/// Width charged per serialized character.
pub const DEFAULT_BYTES_PER_CHAR: usize = 2;

/// Default ceiling for a single request body.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Approximates the wire size of a fragment as the character count of its
/// compact JSON form times a fixed per-character width.
///
/// The estimate is monotone in content: adding a field or an element never
/// makes it smaller. It is an approximation, not a bound on the encoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSizeEstimator {
    bytes_per_char: usize,
}

impl Default for PayloadSizeEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_BYTES_PER_CHAR)
    }
}

impl PayloadSizeEstimator {
    pub const fn new(bytes_per_char: usize) -> Self {
        Self { bytes_per_char }
    }

    pub fn bytes_per_char(&self) -> usize {
        self.bytes_per_char
    }

    /// Estimated size of `fragment`. Model types always serialize; anything
    /// that cannot be measured is reported as `usize::MAX` so it never fits.
    pub fn estimate<T: Serialize + ?Sized>(&self, fragment: &T) -> usize {
        let mut counter = CharCounter::default();
        match serde_json::to_writer(&mut counter, fragment) {
            Ok(()) => counter.chars.saturating_mul(self.bytes_per_char),
            Err(_) => usize::MAX,
        }
    }

    /// Size of a JSON list holding items of the given sizes: two brackets
    /// plus one comma between neighbours.
    pub fn list_size(&self, item_sizes: impl IntoIterator<Item = usize>) -> usize {
        let mut count = 0usize;
        let mut total = 2 * self.bytes_per_char;
        for size in item_sizes {
            if count > 0 {
                total = total.saturating_add(self.bytes_per_char);
            }
            total = total.saturating_add(size);
            count += 1;
        }
        total
    }
}

/// Counts UTF-8 scalar values without buffering the serialized text.
#[derive(Default)]
struct CharCounter {
    chars: usize,
}

impl io::Write for CharCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.chars += buf.iter().filter(|byte| (**byte & 0xC0) != 0x80).count();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Maximum estimated size of one request body. A payload fits only when its
/// estimate is strictly below the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadBudget(usize);

impl Default for PayloadBudget {
    fn default() -> Self {
        Self(DEFAULT_MAX_PAYLOAD_BYTES)
    }
}

impl PayloadBudget {
    pub fn new(max_bytes: usize) -> Result<Self, ConfigError> {
        if max_bytes == 0 {
            return Err(ConfigError::InvalidSetting(
                "max payload size must be greater than zero".into(),
            ));
        }
        Ok(Self(max_bytes))
    }

    pub fn bytes(self) -> usize {
        self.0
    }

    pub fn admits(self, size: usize) -> bool {
        size < self.0
    }
}
