// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Annex B NAL unit extraction.
//!
//! [`NaluExtractor`] splits a byte stream supplied in arbitrary chunks into
//! NAL units. [`ThreadedExtractor`] runs the same state machine on a worker
//! thread, connected to the producer and the consumer by bounded queues.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use bytes::Bytes;
use bytes::BytesMut;
use log::debug;
use log::warn;
use thiserror::Error;

pub(crate) const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// A NAL unit as found in the byte stream, start code included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawNalu {
    /// Offset of the first start code byte in the stream.
    pub stream_offset: u64,
    /// Either 3 or 4.
    pub start_code_len: usize,
    /// The start code followed by the NAL unit bytes.
    pub data: Bytes,
}

impl RawNalu {
    /// The NAL unit bytes, header included, start code excluded.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start_code_len..]
    }

    pub fn start_code(&self) -> &[u8] {
        &self.data[..self.start_code_len]
    }

    /// Size of the NAL unit without its start code.
    pub fn size(&self) -> usize {
        self.data.len() - self.start_code_len
    }
}

fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|window| window == [0x00, 0x00, 0x01])
}

/// Incremental Annex B splitter.
///
/// Bytes are appended with [`NaluExtractor::push`], which returns every unit
/// whose end is known, that is every unit followed by another start code.
/// The last unit is only returned by [`NaluExtractor::finish`]. The output
/// does not depend on how the stream is chunked.
#[derive(Debug, Default)]
pub struct NaluExtractor {
    /// Unconsumed bytes. Once a start code has been seen, starts with it.
    buf: BytesMut,
    /// Stream offset of `buf[0]`.
    buf_offset: u64,
    /// Length of the start code at the beginning of `buf`, if any.
    current_sc_len: Option<usize>,
    /// Where the next start code search begins in `buf`.
    scan_pos: usize,
}

impl NaluExtractor {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends `chunk` to the stream and returns the units it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawNalu> {
        self.buf.extend_from_slice(chunk);

        let mut units = Vec::new();

        while let Some(pos) = find_start_code(&self.buf[self.scan_pos..]) {
            let pos = self.scan_pos + pos;

            // A zero byte right before 00 00 01 makes it a 4-byte start code.
            let (start, len) = if pos > 0 && self.buf[pos - 1] == 0x00 {
                (pos - 1, 4)
            } else {
                (pos, 3)
            };

            let data = self.buf.split_to(start).freeze();
            let offset = self.buf_offset;
            self.buf_offset += start as u64;

            match self.current_sc_len {
                // Back to back start codes give a unit without payload. It is
                // still emitted and fails on its own when parsed.
                Some(start_code_len) => units.push(RawNalu {
                    stream_offset: offset,
                    start_code_len,
                    data,
                }),
                None if !data.is_empty() => {
                    warn!("Discarding {} bytes before the first start code", data.len())
                }
                None => (),
            }

            self.current_sc_len = Some(len);
            self.scan_pos = len;
        }

        // A start code may straddle the end of the buffer.
        self.scan_pos = std::cmp::max(self.scan_pos, self.buf.len().saturating_sub(2));

        units
    }

    /// Signals the end of the stream and returns the last unit, if any.
    ///
    /// A stream that never contained a start code is returned whole, behind
    /// a synthesized 4-byte start code.
    pub fn finish(self) -> Option<RawNalu> {
        match self.current_sc_len {
            Some(start_code_len) if self.buf.len() > start_code_len => Some(RawNalu {
                stream_offset: self.buf_offset,
                start_code_len,
                data: self.buf.freeze(),
            }),
            Some(_) => None,
            None if self.buf.is_empty() => None,
            None => {
                let mut data = BytesMut::with_capacity(START_CODE_4.len() + self.buf.len());
                data.extend_from_slice(&START_CODE_4);
                data.extend_from_slice(&self.buf);

                Some(RawNalu {
                    stream_offset: self.buf_offset,
                    start_code_len: START_CODE_4.len(),
                    data: data.freeze(),
                })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor worker is not accepting data anymore")]
    WorkerGone,
    #[error("failed to spawn extractor worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("extractor worker panicked")]
    WorkerPanicked,
}

/// Queue sizes of a [`ThreadedExtractor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Number of input chunks that can be waiting for the worker.
    pub chunk_queue_depth: usize,
    /// Number of extracted units that can be waiting for the consumer.
    pub unit_queue_depth: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            chunk_queue_depth: 16,
            unit_queue_depth: 64,
        }
    }
}

/// Producer side of a [`ThreadedExtractor`]. Can be moved to another thread.
pub struct ExtractorFeeder {
    chunks: SyncSender<Bytes>,
}

impl ExtractorFeeder {
    /// Queues a chunk for extraction. Blocks while the chunk queue is full.
    pub fn push<T: Into<Bytes>>(&self, chunk: T) -> Result<(), ExtractorError> {
        self.chunks
            .send(chunk.into())
            .map_err(|_| ExtractorError::WorkerGone)
    }

    /// Signals the end of the stream.
    pub fn finish(self) {}
}

/// A [`NaluExtractor`] running on its own thread.
///
/// Units are delivered in stream order. When the consumer falls behind the
/// unit queue fills up and the worker stops taking chunks, which in turn
/// blocks [`ThreadedExtractor::push`]. Producing and consuming from the same
/// thread therefore requires interleaving [`ThreadedExtractor::try_recv`]
/// calls, or moving the [`ExtractorFeeder`] to another thread.
pub struct ThreadedExtractor {
    feeder: Option<ExtractorFeeder>,
    units: Receiver<RawNalu>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<usize>>,
}

impl ThreadedExtractor {
    pub fn spawn(config: ExtractorConfig) -> Result<Self, ExtractorError> {
        let (chunk_tx, chunk_rx) = mpsc::sync_channel(config.chunk_queue_depth);
        let (unit_tx, unit_rx) = mpsc::sync_channel(config.unit_queue_depth);
        let cancel = Arc::new(AtomicBool::new(false));

        let worker_cancel = Arc::clone(&cancel);
        let worker = thread::Builder::new()
            .name("nalu-extractor".into())
            .spawn(move || run_worker(chunk_rx, unit_tx, worker_cancel))?;

        Ok(Self {
            feeder: Some(ExtractorFeeder { chunks: chunk_tx }),
            units: unit_rx,
            cancel,
            worker: Some(worker),
        })
    }

    /// Queues a chunk for extraction. Blocks while the chunk queue is full.
    pub fn push<T: Into<Bytes>>(&self, chunk: T) -> Result<(), ExtractorError> {
        match &self.feeder {
            Some(feeder) => feeder.push(chunk),
            None => Err(ExtractorError::WorkerGone),
        }
    }

    /// Takes the producer side, so chunks can be pushed from another thread.
    pub fn take_feeder(&mut self) -> Option<ExtractorFeeder> {
        self.feeder.take()
    }

    /// Signals the end of the stream. The worker emits the last unit and
    /// exits.
    pub fn finish(&mut self) {
        self.feeder.take();
    }

    /// Asks the worker to stop. It does so before handling the next chunk or
    /// sending the next unit; a unit is never cut short.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Waits for the next unit. Returns `None` once the worker is done and
    /// every unit has been received.
    pub fn recv(&self) -> Option<RawNalu> {
        self.units.recv().ok()
    }

    /// Returns the next unit if one is ready.
    pub fn try_recv(&self) -> Option<RawNalu> {
        match self.units.try_recv() {
            Ok(unit) => Some(unit),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking iterator over the remaining units.
    pub fn iter(&self) -> impl Iterator<Item = RawNalu> + '_ {
        self.units.iter()
    }

    /// Ends the stream and waits for the worker. Units not received yet are
    /// discarded. Returns the number of units the worker delivered.
    pub fn join(mut self) -> Result<usize, ExtractorError> {
        self.feeder.take();

        let Some(worker) = self.worker.take() else {
            return Err(ExtractorError::WorkerGone);
        };

        // Unblocks a worker waiting on a full unit queue.
        drop(self.units);

        worker.join().map_err(|_| ExtractorError::WorkerPanicked)
    }
}

fn run_worker(chunks: Receiver<Bytes>, units: SyncSender<RawNalu>, cancel: Arc<AtomicBool>) -> usize {
    let mut extractor = NaluExtractor::new();
    let mut delivered = 0;

    let cancelled = || cancel.load(Ordering::Acquire);

    while let Ok(chunk) = chunks.recv() {
        if cancelled() {
            debug!("Extraction cancelled after {} units", delivered);
            return delivered;
        }

        for unit in extractor.push(&chunk) {
            if cancelled() {
                debug!("Extraction cancelled after {} units", delivered);
                return delivered;
            }

            if units.send(unit).is_err() {
                debug!("Unit consumer went away");
                return delivered;
            }
            delivered += 1;
        }
    }

    if cancelled() {
        return delivered;
    }

    if let Some(unit) = extractor.finish() {
        if units.send(unit).is_ok() {
            delivered += 1;
        }
    }

    delivered
}
