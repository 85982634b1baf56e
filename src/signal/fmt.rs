//! Bounded formatting for signal handlers.
//!
//! Handlers may not allocate, lock, or enter `std::fmt`, so diagnostics
//! are assembled into a fixed-capacity buffer with hand-rolled decimal
//! conversion. Overflowing the capacity truncates, it never grows.

use arrayvec::ArrayVec;

pub const LINE_CAP: usize = 256;

pub struct LineBuf {
    buf: ArrayVec<u8, LINE_CAP>,
}

impl LineBuf {
    pub fn new() -> Self {
        Self {
            buf: ArrayVec::new(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn push_str(&mut self, s: &str) {
        for &byte in s.as_bytes() {
            if self.buf.try_push(byte).is_err() {
                return;
            }
        }
    }

    pub fn push_u64(&mut self, mut val: u64) {
        // 20 digits cover u64::MAX.
        let mut digits = [0u8; 20];
        let mut len = 0;
        loop {
            digits[len] = b'0' + (val % 10) as u8;
            val /= 10;
            len += 1;
            if val == 0 {
                break;
            }
        }
        for i in (0..len).rev() {
            if self.buf.try_push(digits[i]).is_err() {
                return;
            }
        }
    }

    pub fn push_i64(&mut self, val: i64) {
        if val < 0 {
            self.push_str("-");
            self.push_u64(val.unsigned_abs());
        } else {
            self.push_u64(val as u64);
        }
    }

    /// Fixed-point with two decimal places, enough for load averages.
    pub fn push_fixed2(&mut self, val: f64) {
        if !val.is_finite() {
            self.push_str("?");
            return;
        }
        let negative = val < 0.0;
        if negative {
            self.push_str("-");
        }
        let scaled = (val.abs() * 100.0 + 0.5) as u64;
        self.push_u64(scaled / 100);
        self.push_str(".");
        let frac = scaled % 100;
        if frac < 10 {
            self.push_str("0");
        }
        self.push_u64(frac);
    }
}
