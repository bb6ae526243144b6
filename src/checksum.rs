//! Rolling checksum for byte-aligned block matching.
//!
//! An Adler-32 variant whose window can be slid forward one byte in O(1),
//! which is what makes scanning a whole stream against a signature tractable:
//! the hash of every window position costs a constant amount of work instead
//! of a rescan.

/// Modulus for both running sums; the largest prime below 2^16.
const BASE: u32 = 65521;

/// Rolling checksum over the most recent `window` bytes fed to it.
///
/// Two phases of use: while the window is filling, each byte goes in with
/// [`eat`](Self::eat); once `window` bytes are in, the window advances one
/// byte at a time with [`slide`](Self::slide), which removes the departing
/// byte and adds the arriving one without touching the bytes in between.
///
/// The hash packs both running sums: `(s2 << 16) | s1`, with `s1` starting
/// at 1 per the Adler convention. A freshly constructed (or
/// [`reset`](Self::reset)) checksum reports a hash of 0 until the first byte.
///
/// # Example
///
/// ```rust
/// use blocksync::RollingChecksum;
///
/// let mut a = RollingChecksum::new(3);
/// for &b in b"abc" {
///     a.eat(b);
/// }
/// let full = a.value();
///
/// // Slide to "bcd" and back-check against a fresh scan.
/// a.slide(b'd', b'a');
/// let mut fresh = RollingChecksum::new(3);
/// for &b in b"bcd" {
///     fresh.eat(b);
/// }
/// assert_eq!(a.value(), fresh.value());
/// assert_ne!(a.value(), full);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingChecksum {
    window: u32,
    s1: u32,
    s2: u32,
    hash: u32,
}

impl RollingChecksum {
    /// Create a checksum for windows of `window` bytes.
    #[must_use]
    pub const fn new(window: u32) -> Self {
        Self {
            window,
            s1: 1,
            s2: 0,
            hash: 0,
        }
    }

    /// Incorporate one byte while the window is still filling.
    #[inline]
    pub fn eat(&mut self, byte: u8) {
        self.s1 = (self.s1 + u32::from(byte)) % BASE;
        self.s2 = (self.s2 + self.s1) % BASE;
        self.hash = (self.s2 << 16) | self.s1;
    }

    /// Advance a full window one byte: `inb` enters, `outb` leaves.
    ///
    /// Exactly inverts the departing byte's contribution to both sums, so
    /// the result equals an `eat` scan of the shifted window. The `- 1`
    /// in the `s2` update compensates for `s1` starting at 1.
    #[inline]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn slide(&mut self, inb: u8, outb: u8) {
        let mut s1 = i64::from(self.hash & 0xffff);
        let mut s2 = i64::from((self.hash >> 16) & 0xffff);
        let base = i64::from(BASE);

        s1 += i64::from(inb) - i64::from(outb);
        if s1 >= base {
            s1 -= base;
        } else if s1 < 0 {
            s1 += base;
        }

        s2 = (s2 - i64::from(self.window) * i64::from(outb) + s1 - 1) % base;
        if s2 < 0 {
            s2 += base;
        }

        self.s1 = s1 as u32;
        self.s2 = s2 as u32;
        self.hash = (self.s2 << 16) | self.s1;
    }

    /// Current 32-bit hash. Pure; does not advance the window.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.hash
    }

    /// Return to the zero-byte initial state, keeping the window size.
    pub fn reset(&mut self) {
        self.s1 = 1;
        self.s2 = 0;
        self.hash = 0;
    }
}
