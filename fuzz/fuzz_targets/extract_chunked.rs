// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![no_main]

use h264_syntax::codec::h264::extractor::NaluExtractor;
use libfuzzer_sys::fuzz_target;

fn extract<'a>(chunks: impl Iterator<Item = &'a [u8]>) -> Vec<Vec<u8>> {
    let mut extractor = NaluExtractor::new();

    let mut units = Vec::new();
    for chunk in chunks {
        units.extend(extractor.push(chunk).into_iter().map(|u| u.data.to_vec()));
    }
    units.extend(extractor.finish().map(|u| u.data.to_vec()));

    units
}

// The first byte picks the chunk size, the rest is the stream.
fuzz_target!(|data: &[u8]| {
    let Some((&chunk_size, stream)) = data.split_first() else {
        return;
    };

    let whole = extract(std::iter::once(stream));
    let chunked = extract(stream.chunks(usize::from(chunk_size).max(1)));

    assert_eq!(whole, chunked);
});
