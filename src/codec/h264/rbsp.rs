// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Conversion between NAL unit payloads and raw byte sequence payloads.
//!
//! Inside a NAL unit, the encoder inserts an `emulation_prevention_three_byte`
//! after every `00 00` pair that would otherwise be followed by a byte in
//! `00..=03`, so that no start code can appear in the payload. These helpers
//! remove and insert those bytes.

use std::borrow::Cow;
use std::io;
use std::io::Write;

use crate::codec::h264::nalu_writer::EmulationPrevention;

/// Removes the emulation prevention bytes from `data`.
///
/// Every `03` that follows two zero bytes is dropped. The zero run restarts
/// after a removed byte, so `00 00 03 00 00 03` loses both `03`s. No copy is
/// made when there is nothing to remove.
pub fn unescape(data: &[u8]) -> Cow<[u8]> {
    let (rbsp, _) = unescape_counted(data);
    rbsp
}

/// Same as [`unescape`], also returning the number of removed bytes.
pub fn unescape_counted(data: &[u8]) -> (Cow<[u8]>, usize) {
    let Some(first) = find_emulation_prevention(data) else {
        return (Cow::Borrowed(data), 0);
    };

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&data[..first]);

    let mut removed = 1;
    let mut zeros = 0;

    for &byte in &data[first + 1..] {
        if zeros >= 2 && byte == 0x03 {
            removed += 1;
            zeros = 0;
            continue;
        }

        out.push(byte);

        if byte == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }

    (Cow::Owned(out), removed)
}

/// Index of the first emulation prevention byte of `data`, if any.
fn find_emulation_prevention(data: &[u8]) -> Option<usize> {
    let mut zeros = 0;

    for (i, &byte) in data.iter().enumerate() {
        if zeros >= 2 && byte == 0x03 {
            return Some(i);
        }

        if byte == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }

    None
}

/// Inserts emulation prevention bytes into `data`.
pub fn escape(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 2);
    escape_into(data, &mut out)?;
    Ok(out)
}

/// Writes `data` to `out` with emulation prevention bytes inserted.
pub fn escape_into<W: Write>(data: &[u8], out: W) -> io::Result<()> {
    EmulationPrevention::new(out, true).write_all(data)
}
