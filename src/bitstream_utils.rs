// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;

use thiserror::Error;

use crate::codec::h264::extractor::NaluExtractor;
use crate::codec::h264::extractor::RawNalu;

/// A position inside a bitstream. `bit` is the number of bits already
/// consumed from the byte at `byte`, most significant bit first.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitPosition {
    pub byte: usize,
    pub bit: u8,
}

impl BitPosition {
    /// Total number of bits before this position.
    pub fn in_bits(&self) -> usize {
        self.byte * 8 + usize::from(self.bit)
    }
}

impl fmt::Display for BitPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "byte {}, bit {}", self.byte, self.bit)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadBitsError {
    #[error("more than {max} ({requested}) bits were requested")]
    TooManyBitsRequested { requested: usize, max: usize },
    #[error("reader ran out of bits: {requested} requested, {available} left")]
    NotEnoughData { requested: usize, available: usize },
    #[error("exp-golomb code does not fit in 32 bits")]
    GolombOverflow,
    #[error("non-symmetric code with zero possible values")]
    EmptyAlphabet,
    #[error("failed to convert read input to target type")]
    ConversionFailed,
}

/// A bit reader over an RBSP, i.e. a NAL unit with its emulation prevention
/// bytes already removed. The input is never modified; only the read
/// position moves.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Index of the byte holding the next unread bit.
    byte_offset: usize,
    /// Number of bits of `data[byte_offset]` already consumed, in 0..=7.
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// The data this reader was created with.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn position(&self) -> BitPosition {
        BitPosition {
            byte: self.byte_offset,
            bit: self.bit_offset,
        }
    }

    /// Number of bits consumed so far.
    pub fn bits_read(&self) -> usize {
        self.position().in_bits()
    }

    /// Returns the amount of bits left in the stream
    pub fn num_bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.bits_read())
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_offset == 0
    }

    /// Move the cursor to an absolute position. Seeking to the very end of
    /// the data is allowed.
    pub fn seek(&mut self, byte_offset: usize, bit_offset: u8) -> Result<(), ReadBitsError> {
        let target = BitPosition {
            byte: byte_offset,
            bit: bit_offset,
        };

        if bit_offset > 7 || target.in_bits() > self.data.len() * 8 {
            return Err(ReadBitsError::NotEnoughData {
                requested: target.in_bits(),
                available: self.data.len() * 8,
            });
        }

        self.byte_offset = byte_offset;
        self.bit_offset = bit_offset;
        Ok(())
    }

    fn restore(&mut self, pos: BitPosition) {
        self.byte_offset = pos.byte;
        self.bit_offset = pos.bit;
    }

    /// Peek up to 64 bits from the stream without advancing.
    pub fn peek_bits_u64(&self, num_bits: usize) -> Result<u64, ReadBitsError> {
        if num_bits > 64 {
            return Err(ReadBitsError::TooManyBitsRequested {
                requested: num_bits,
                max: 64,
            });
        }

        let available = self.num_bits_left();
        if num_bits > available {
            return Err(ReadBitsError::NotEnoughData {
                requested: num_bits,
                available,
            });
        }

        let mut out = 0u64;
        let mut byte = self.byte_offset;
        let mut bit = usize::from(self.bit_offset);
        let mut bits_left = num_bits;

        while bits_left > 0 {
            let in_byte = 8 - bit;
            let take = std::cmp::min(in_byte, bits_left);
            let chunk = (u64::from(self.data[byte]) >> (in_byte - take)) & ((1 << take) - 1);

            out = (out << take) | chunk;
            bits_left -= take;
            bit += take;
            if bit == 8 {
                bit = 0;
                byte += 1;
            }
        }

        Ok(out)
    }

    /// Peek up to 32 bits from the stream without advancing.
    pub fn peek_bits<U: TryFrom<u32>>(&self, num_bits: usize) -> Result<U, ReadBitsError> {
        if num_bits > 32 {
            return Err(ReadBitsError::TooManyBitsRequested {
                requested: num_bits,
                max: 32,
            });
        }

        let value = self.peek_bits_u64(num_bits)? as u32;
        U::try_from(value).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Read up to 64 bits from the stream.
    pub fn read_bits_u64(&mut self, num_bits: usize) -> Result<u64, ReadBitsError> {
        let value = self.peek_bits_u64(num_bits)?;
        self.advance(num_bits);
        Ok(value)
    }

    /// Read up to 32 bits from the stream. Nothing is consumed if the value
    /// does not fit in `U`.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        let value = self.peek_bits(num_bits)?;
        self.advance(num_bits);
        Ok(value)
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool, ReadBitsError> {
        Ok(self.read_bits::<u32>(1)? == 1)
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, num_bits: usize) -> Result<(), ReadBitsError> {
        let available = self.num_bits_left();
        if num_bits > available {
            return Err(ReadBitsError::NotEnoughData {
                requested: num_bits,
                available,
            });
        }

        self.advance(num_bits);
        Ok(())
    }

    fn advance(&mut self, num_bits: usize) {
        let pos = self.bits_read() + num_bits;
        self.byte_offset = pos / 8;
        self.bit_offset = (pos % 8) as u8;
    }

    /// Reads an unsigned Exp-Golomb coded number. See H264 9.1 for details.
    /// The reader is left untouched if the read fails.
    pub fn read_ue<U: TryFrom<u32>>(&mut self) -> Result<U, ReadBitsError> {
        let start = self.position();

        let value = self
            .read_ue_u32()
            .and_then(|v| U::try_from(v).map_err(|_| ReadBitsError::ConversionFailed));

        if value.is_err() {
            self.restore(start);
        }

        value
    }

    fn read_ue_u32(&mut self) -> Result<u32, ReadBitsError> {
        let mut leading_zeros = 0;

        while self.peek_bits_u64(1)? == 0 {
            self.advance(1);
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(ReadBitsError::GolombOverflow);
            }
        }

        let codeword = self.read_bits_u64(leading_zeros + 1)?;
        u32::try_from(codeword - 1).map_err(|_| ReadBitsError::GolombOverflow)
    }

    /// Reads a signed Exp-Golomb coded number. Instead of using two's
    /// complement, this scheme maps odd code numbers to positive values and
    /// even code numbers to negative values. See H264 9.1.1 for details.
    pub fn read_se<U: TryFrom<i32>>(&mut self) -> Result<U, ReadBitsError> {
        let start = self.position();
        let code_num = i64::from(self.read_ue::<u32>()?);

        let value = if code_num % 2 == 0 {
            -(code_num / 2)
        } else {
            (code_num + 1) / 2
        };

        let value = i32::try_from(value)
            .ok()
            .and_then(|v| U::try_from(v).ok())
            .ok_or(ReadBitsError::ConversionFailed);

        if value.is_err() {
            self.restore(start);
        }

        value
    }

    /// Reads a value in `0..num_values` coded with the non-symmetric
    /// (truncated binary) code.
    pub fn read_ns(&mut self, num_values: u32) -> Result<u32, ReadBitsError> {
        if num_values == 0 {
            return Err(ReadBitsError::EmptyAlphabet);
        }

        let start = self.position();
        let width = (32 - num_values.leading_zeros()) as usize;
        let threshold = ((1u64 << width) - u64::from(num_values)) as u32;

        let value = self.read_bits::<u32>(width - 1).and_then(|v| {
            if v < threshold {
                Ok(v)
            } else {
                let extra_bit = self.read_bits::<u32>(1)?;
                Ok((v << 1) - threshold + extra_bit)
            }
        });

        if value.is_err() {
            self.restore(start);
        }

        value
    }

    /// Whether the stream still has RBSP data. Implements more_rbsp_data(),
    /// i.e. whether there is anything left before the rbsp_stop_one_bit.
    pub fn has_more_rbsp_data(&self) -> bool {
        let Some(last) = self.data.iter().rposition(|b| *b != 0) else {
            return false;
        };

        let stop_bit = last * 8 + 7 - self.data[last].trailing_zeros() as usize;
        self.bits_read() < stop_bit
    }
}

/// Iterator over the NAL units of an in-memory Annex B stream.
pub struct NalIterator {
    extractor: Option<NaluExtractor>,
    pending: VecDeque<RawNalu>,
}

impl NalIterator {
    pub fn new(stream: &[u8]) -> Self {
        let mut extractor = NaluExtractor::new();
        let pending = extractor.push(stream).into();

        Self {
            extractor: Some(extractor),
            pending,
        }
    }
}

impl Iterator for NalIterator {
    type Item = RawNalu;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(nalu) = self.pending.pop_front() {
            return Some(nalu);
        }

        self.extractor.take().and_then(NaluExtractor::finish)
    }
}

#[derive(Debug, Error)]
pub enum BitWriterError {
    #[error("invalid bit count")]
    InvalidBitCount,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

pub struct BitWriter<W: Write> {
    out: W,
    nth_bit: u8,
    curr_byte: u8,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: writer,
            curr_byte: 0,
            nth_bit: 0,
        }
    }

    /// Writes fixed bit size integer (up to 32 bit)
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> BitWriterResult<usize> {
        let value = value.into();

        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount);
        }

        let mut written = 0;
        for bit in (0..bits).rev() {
            let bit = 1u32 << bit;

            self.write_bit((value & bit) == bit)?;
            written += 1;
        }

        Ok(written)
    }

    fn write_bit(&mut self, bit: bool) -> BitWriterResult<()> {
        self.curr_byte |= (bit as u8) << (7u8 - self.nth_bit);
        self.nth_bit += 1;

        if self.nth_bit == 8 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        Ok(())
    }

    /// Immediately outputs any cached bits to [`std::io::Write`]
    pub fn flush(&mut self) -> BitWriterResult<()> {
        if self.nth_bit != 0 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        self.out.flush()?;
        Ok(())
    }

    /// Returns `true` if ['Self`] hold data that wasn't written to [`std::io::Write`]
    pub fn has_data_pending(&self) -> bool {
        self.nth_bit != 0
    }

    pub(crate) fn inner_mut(&mut self) -> &mut W {
        &mut self.out
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Unable to flush bits {e:?}");
        }
    }
}
