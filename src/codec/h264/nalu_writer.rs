// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.
use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;

/// Wrapper over [`std::io::Write`] inserting emulation prevention bytes.
pub(crate) struct EmulationPrevention<W: Write> {
    out: W,
    /// Number of consecutive zero bytes written so far.
    zeros: usize,

    /// Emulation prevention enabled.
    ep_enabled: bool,
}

impl<W: Write> EmulationPrevention<W> {
    pub(crate) fn new(writer: W, ep_enabled: bool) -> Self {
        Self {
            out: writer,
            zeros: 0,
            ep_enabled,
        }
    }

    fn write_byte(&mut self, curr_byte: u8) -> std::io::Result<()> {
        if self.zeros >= 2 && curr_byte <= 0x03 {
            self.out.write_all(&[0x03])?;
            self.zeros = 0;
        }

        self.out.write_all(&[curr_byte])?;

        if curr_byte == 0x00 {
            self.zeros += 1;
        } else {
            self.zeros = 0;
        }

        Ok(())
    }

    /// Writes a 4-byte start code followed by a H.264 NALU header byte.
    fn write_header(&mut self, idc: u8, type_: u8) -> NaluWriterResult<()> {
        self.out.write_all(&[
            0x00,
            0x00,
            0x00,
            0x01,
            (idc & 0b11) << 5 | (type_ & 0b11111),
        ])?;
        self.zeros = 0;

        Ok(())
    }
}

impl<W: Write> Write for EmulationPrevention<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.ep_enabled {
            self.out.write_all(buf)?;
            return Ok(buf.len());
        }

        for byte in buf {
            self.write_byte(*byte)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

#[derive(Error, Debug)]
pub enum NaluWriterError {
    #[error("value increment caused value overflow")]
    Overflow,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BitWriterError(#[from] BitWriterError),
}

pub type NaluWriterResult<T> = std::result::Result<T, NaluWriterError>;

/// A writer for H.264 bitstream. It is capable of outputing bitstream with
/// emulation-prevention.
pub struct NaluWriter<W: Write>(BitWriter<EmulationPrevention<W>>);

impl<W: Write> NaluWriter<W> {
    pub fn new(writer: W, ep_enabled: bool) -> Self {
        Self(BitWriter::new(EmulationPrevention::new(writer, ep_enabled)))
    }

    /// Writes `u(n)`, n <= 32. Returns the number of bits written.
    pub fn write_u<T: Into<u32>>(&mut self, bits: usize, value: T) -> NaluWriterResult<usize> {
        Ok(self.0.write_f(bits, value)?)
    }

    /// Writes `ue(v)`. `u32::MAX` has no 32-bit code and fails with
    /// [`NaluWriterError::Overflow`].
    pub fn write_ue<T: Into<u32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let code_num = value.into().checked_add(1).ok_or(NaluWriterError::Overflow)?;
        let bits = 32 - code_num.leading_zeros() as usize;

        self.write_u(bits - 1, 0u32)?;
        self.write_u(bits, code_num)?;
        Ok(())
    }

    /// Writes `se(v)`.
    pub fn write_se<T: Into<i32>>(&mut self, value: T) -> NaluWriterResult<()> {
        let value: i32 = value.into();
        let abs_value = value.unsigned_abs();

        if value <= 0 {
            self.write_ue(2 * abs_value)
        } else {
            self.write_ue(2 * abs_value - 1)
        }
    }

    /// Writes `rbsp_trailing_bits()`: a stop bit followed by zero bits up to
    /// the next byte boundary.
    pub fn write_trailing_bits(&mut self) -> NaluWriterResult<()> {
        self.write_u(1, true)?;
        while self.0.has_data_pending() {
            self.write_u(1, false)?;
        }

        Ok(())
    }

    /// Writes a start code and a H.264 NALU header.
    pub fn write_header(&mut self, idc: u8, type_: u8) -> NaluWriterResult<()> {
        self.0.flush()?;
        self.0.inner_mut().write_header(idc, type_)?;
        Ok(())
    }

    /// Outputs pending bits, padding the last byte with zeros.
    pub fn flush(&mut self) -> NaluWriterResult<()> {
        self.0.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_utils::BitReader;
    use crate::codec::h264::rbsp;

    #[test]
    fn first_ue_codes() {
        let codes = [
            (0u32, 0b1000_0000u8),
            (1, 0b0100_0000),
            (2, 0b0110_0000),
            (3, 0b0010_0000),
            (6, 0b0011_1000),
            (7, 0b0001_0000),
            (9, 0b0001_0100),
        ];

        for (value, code) in codes {
            let mut buf = Vec::<u8>::new();
            {
                let mut writer = NaluWriter::new(&mut buf, false);
                writer.write_ue(value).unwrap();
            }
            assert_eq!(buf, vec![code], "ue {}", value);
        }
    }

    #[test]
    fn golomb_limits() {
        let samples = [
            0u32,
            1,
            2,
            254,
            255,
            256,
            65535,
            1 << 20,
            (1 << 31) - 2,
            (1 << 31) - 1,
            u32::MAX - 1,
        ];

        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            for value in samples {
                writer.write_ue(value).unwrap();
            }
            assert!(matches!(
                writer.write_ue(u32::MAX),
                Err(NaluWriterError::Overflow)
            ));
        }

        let mut reader = BitReader::new(&buf);
        for value in samples {
            assert_eq!(reader.read_ue::<u32>().unwrap(), value);
        }

        let samples = [0i32, 1, -1, 2, -2, 1000, -1000, (1 << 30) - 1, -(1 << 30)];

        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            for value in samples {
                writer.write_se(value).unwrap();
            }
        }

        let mut reader = BitReader::new(&buf);
        for value in samples {
            assert_eq!(reader.read_se::<i32>().unwrap(), value);
        }
    }

    #[test]
    fn writer_emulation_prevention() {
        fn test(input: &[u8], bitstream: &[u8]) {
            let mut buf = Vec::<u8>::new();
            {
                let mut writer = NaluWriter::new(&mut buf, true);
                for byte in input {
                    writer.write_u(8, *byte).unwrap();
                }
            }
            assert_eq!(buf, bitstream);

            let unescaped = rbsp::unescape(&buf);
            let mut reader = BitReader::new(&unescaped);
            for byte in input {
                assert_eq!(*byte, reader.read_bits::<u8>(8).unwrap());
            }
        }

        test(&[0x00, 0x00, 0x00], &[0x00, 0x00, 0x03, 0x00]);
        test(&[0x00, 0x00, 0x01], &[0x00, 0x00, 0x03, 0x01]);
        test(&[0x00, 0x00, 0x02], &[0x00, 0x00, 0x03, 0x02]);
        test(&[0x00, 0x00, 0x03], &[0x00, 0x00, 0x03, 0x03]);
        test(&[0x00, 0x00, 0x04], &[0x00, 0x00, 0x04]);

        test(&[0x00, 0x00, 0x00, 0x00], &[0x00, 0x00, 0x03, 0x00, 0x00]);
        test(&[0x00, 0x00, 0x00, 0x01], &[0x00, 0x00, 0x03, 0x00, 0x01]);
        test(&[0x00, 0x00, 0x00, 0x02], &[0x00, 0x00, 0x03, 0x00, 0x02]);
        test(&[0x00, 0x00, 0x00, 0x03], &[0x00, 0x00, 0x03, 0x00, 0x03]);

        // The zero following an inserted byte starts a new run.
        test(
            &[0x00, 0x00, 0x00, 0x00, 0x01],
            &[0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x01],
        );
    }

    #[test]
    fn header_resets_zero_run() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, true);
            writer.write_header(3, 7).unwrap();
            writer.write_u(8, 0u8).unwrap();
            writer.write_u(8, 0x80u8).unwrap();
        }
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x00, 0x80]);
    }

    #[test]
    fn trailing_bits() {
        let mut buf = Vec::<u8>::new();
        {
            let mut writer = NaluWriter::new(&mut buf, false);
            writer.write_u(3, 0b101u8).unwrap();
            writer.write_trailing_bits().unwrap();
            writer.write_trailing_bits().unwrap();
        }
        assert_eq!(buf, vec![0b1011_0000, 0b1000_0000]);
    }
}
