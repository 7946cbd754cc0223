// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod extractor;
pub mod nalu;
pub mod nalu_writer;
pub mod parser;
pub mod rbsp;
pub mod slice;
pub mod svc;
pub mod syntax;

#[cfg(test)]
mod test_streams;
