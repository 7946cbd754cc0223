// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Syntax element reading with range checks and error context.

use std::fmt;

use thiserror::Error;

use crate::bitstream_utils::BitPosition;
use crate::bitstream_utils::BitReader;
use crate::bitstream_utils::ReadBitsError;

/// The kind of id-keyed structure a syntax element refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterSetKind {
    Sps,
    Pps,
    SubsetSps,
}

impl fmt::Display for ParameterSetKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParameterSetKind::Sps => write!(f, "SPS"),
            ParameterSetKind::Pps => write!(f, "PPS"),
            ParameterSetKind::SubsetSps => write!(f, "subset SPS"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("not enough data")]
    InsufficientData,
    #[error("value {value} is outside of [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },
    #[error("{kind} {id} has not been received")]
    UnresolvedReference { kind: ParameterSetKind, id: u32 },
    #[error("unsupported syntax: {0}")]
    Unsupported(&'static str),
}

/// A syntax parsing failure, located by structure, field and bit position.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{structure}.{field} at {position}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Syntax structure being parsed, e.g. `seq_parameter_set_data`.
    pub structure: &'static str,
    /// Syntax element that failed.
    pub field: &'static str,
    /// Position of the element, relative to the start of the RBSP.
    pub position: BitPosition,
}

impl ParseError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind, ParseErrorKind::Unsupported(_))
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// A [`BitReader`] that names what it reads.
///
/// Every read takes the name of the syntax element, and failures come back
/// as a [`ParseError`] carrying it along with the current structure.
pub struct SyntaxReader<'a> {
    r: BitReader<'a>,
    structure: &'static str,
}

impl<'a> SyntaxReader<'a> {
    pub fn new(data: &'a [u8], structure: &'static str) -> Self {
        Self {
            r: BitReader::new(data),
            structure,
        }
    }

    /// Switches to a nested syntax structure. Returns the enclosing one, to
    /// be handed back to [`SyntaxReader::leave`].
    pub fn enter(&mut self, structure: &'static str) -> &'static str {
        std::mem::replace(&mut self.structure, structure)
    }

    pub fn leave(&mut self, outer: &'static str) {
        self.structure = outer;
    }

    pub fn structure(&self) -> &'static str {
        self.structure
    }

    pub fn position(&self) -> BitPosition {
        self.r.position()
    }

    pub fn bits_read(&self) -> usize {
        self.r.bits_read()
    }

    pub fn num_bits_left(&self) -> usize {
        self.r.num_bits_left()
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.r.is_byte_aligned()
    }

    pub fn has_more_rbsp_data(&self) -> bool {
        self.r.has_more_rbsp_data()
    }

    pub fn error_at(&self, field: &'static str, position: BitPosition, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            structure: self.structure,
            field,
            position,
        }
    }

    pub fn error(&self, field: &'static str, kind: ParseErrorKind) -> ParseError {
        self.error_at(field, self.position(), kind)
    }

    fn read_error(&self, field: &'static str, position: BitPosition, e: ReadBitsError) -> ParseError {
        let kind = match e {
            ReadBitsError::GolombOverflow => ParseErrorKind::OutOfRange {
                value: i64::from(u32::MAX) + 1,
                min: 0,
                max: i64::from(u32::MAX),
            },
            _ => ParseErrorKind::InsufficientData,
        };

        self.error_at(field, position, kind)
    }

    /// Fails with `OutOfRange` unless `min <= value <= max`.
    pub fn check<T>(&self, field: &'static str, value: T, min: T, max: T) -> ParseResult<()>
    where
        T: Into<i64> + PartialOrd + Copy,
    {
        if value < min || value > max {
            return Err(self.error(
                field,
                ParseErrorKind::OutOfRange {
                    value: value.into(),
                    min: min.into(),
                    max: max.into(),
                },
            ));
        }

        Ok(())
    }

    /// Reads `u(1)`.
    pub fn flag(&mut self, field: &'static str) -> ParseResult<bool> {
        let pos = self.position();
        self.r.read_bit().map_err(|e| self.read_error(field, pos, e))
    }

    /// Reads `u(n)` for n <= 32.
    pub fn u<U: TryFrom<u32>>(&mut self, num_bits: usize, field: &'static str) -> ParseResult<U> {
        let pos = self.position();
        let value = self
            .r
            .read_bits::<u32>(num_bits)
            .map_err(|e| self.read_error(field, pos, e))?;

        U::try_from(value).map_err(|_| {
            self.error_at(
                field,
                pos,
                ParseErrorKind::OutOfRange {
                    value: value.into(),
                    min: 0,
                    max: (1i64 << num_bits) - 1,
                },
            )
        })
    }

    /// Reads `u(n)` for n <= 33 and checks the value against `[0, max]`.
    pub fn u_wide_max(&mut self, num_bits: usize, field: &'static str, max: u64) -> ParseResult<u64> {
        let pos = self.position();
        if num_bits > 33 {
            return Err(self.error_at(field, pos, ParseErrorKind::Unsupported("field wider than 33 bits")));
        }

        let value = self
            .r
            .read_bits_u64(num_bits)
            .map_err(|e| self.read_error(field, pos, e))?;

        // Both fit in an i64 after the width check.
        let max = i64::try_from(max).unwrap_or(i64::MAX);
        self.check_at(field, pos, value as i64, 0, max)?;
        Ok(value)
    }

    /// Reads `u(n)` and checks the value against `[min, max]`.
    pub fn u_range(&mut self, num_bits: usize, field: &'static str, min: u32, max: u32) -> ParseResult<u32> {
        let pos = self.position();
        let value = self.u::<u32>(num_bits, field)?;
        self.check_at(field, pos, i64::from(value), i64::from(min), i64::from(max))?;
        Ok(value)
    }

    /// Skips `num_bits` bits.
    pub fn skip(&mut self, num_bits: usize, field: &'static str) -> ParseResult<()> {
        let pos = self.position();
        self.r.skip_bits(num_bits).map_err(|e| self.read_error(field, pos, e))
    }

    /// Reads `ue(v)`.
    pub fn ue(&mut self, field: &'static str) -> ParseResult<u32> {
        let pos = self.position();
        self.r.read_ue::<u32>().map_err(|e| self.read_error(field, pos, e))
    }

    /// Reads `ue(v)`, checked against `[0, max]`.
    pub fn ue_max<U: TryFrom<u32>>(&mut self, field: &'static str, max: u32) -> ParseResult<U> {
        self.ue_range(field, 0, max)
    }

    /// Reads `ue(v)`, checked against `[min, max]`.
    pub fn ue_range<U: TryFrom<u32>>(&mut self, field: &'static str, min: u32, max: u32) -> ParseResult<U> {
        let pos = self.position();
        let value = self.ue(field)?;
        self.check_at(field, pos, i64::from(value), i64::from(min), i64::from(max))?;

        U::try_from(value).map_err(|_| {
            self.error_at(
                field,
                pos,
                ParseErrorKind::OutOfRange {
                    value: value.into(),
                    min: min.into(),
                    max: max.into(),
                },
            )
        })
    }

    /// Reads `se(v)`.
    pub fn se(&mut self, field: &'static str) -> ParseResult<i32> {
        let pos = self.position();
        let code_num = i64::from(self.ue(field)?);

        let value = if code_num % 2 == 0 {
            -(code_num / 2)
        } else {
            (code_num + 1) / 2
        };

        i32::try_from(value).map_err(|_| {
            self.error_at(
                field,
                pos,
                ParseErrorKind::OutOfRange {
                    value,
                    min: i32::MIN.into(),
                    max: i32::MAX.into(),
                },
            )
        })
    }

    /// Reads `se(v)`, checked against `[min, max]`.
    pub fn se_range<U: TryFrom<i32>>(&mut self, field: &'static str, min: i32, max: i32) -> ParseResult<U> {
        let pos = self.position();
        let value = self.se(field)?;
        self.check_at(field, pos, i64::from(value), i64::from(min), i64::from(max))?;

        U::try_from(value).map_err(|_| {
            self.error_at(
                field,
                pos,
                ParseErrorKind::OutOfRange {
                    value: value.into(),
                    min: min.into(),
                    max: max.into(),
                },
            )
        })
    }

    /// Reads a truncated binary code for a value in `0..num_values`.
    pub fn ns(&mut self, num_values: u32, field: &'static str) -> ParseResult<u32> {
        let pos = self.position();
        self.r.read_ns(num_values).map_err(|e| self.read_error(field, pos, e))
    }

    fn check_at(&self, field: &'static str, pos: BitPosition, value: i64, min: i64, max: i64) -> ParseResult<()> {
        if value < min || value > max {
            return Err(self.error_at(field, pos, ParseErrorKind::OutOfRange { value, min, max }));
        }

        Ok(())
    }
}
