// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Syntax-level parsing of H.264 Annex B byte streams.
//!
//! [`codec::h264::extractor`] splits a byte stream into NAL units, possibly on
//! a thread of its own, and [`codec::h264::parser::Parser`] decodes their
//! headers, parameter sets and slice headers. No picture is ever decoded.

pub mod bitstream_utils;
pub mod codec;
