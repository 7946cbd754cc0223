// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! nalu_dump, lists the NAL units of an H.264 Annex B stream along with a
//! summary of their syntax. The file is read in chunks on one thread, split
//! into units on another and parsed on the main one.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::thread;

use anyhow::anyhow;
use anyhow::Context;
use argh::FromArgs;
use h264_syntax::codec::h264::extractor::ExtractorConfig;
use h264_syntax::codec::h264::extractor::ThreadedExtractor;
use h264_syntax::codec::h264::parser::NaluPayload;
use h264_syntax::codec::h264::parser::Parser;

/// Lists the NAL units of an H.264 Annex B stream
#[derive(Debug, FromArgs)]
struct Args {
    /// input file
    #[argh(positional)]
    input: PathBuf,

    /// size of the chunks the input is read in. Default: 4096
    #[argh(option, default = "4096")]
    chunk_size: usize,

    /// number of extracted units that can wait for the parser. Default: 64
    #[argh(option, default = "64")]
    queue_depth: usize,

    /// print every parsed syntax element
    #[argh(switch)]
    verbose: bool,
}

fn summary(payload: &NaluPayload) -> String {
    match payload {
        NaluPayload::Sps(sps) => {
            let visible = sps.visible_rectangle();
            format!(
                "SPS {}: profile {}, level {}, {}x{} (visible {}x{})",
                sps.seq_parameter_set_id,
                sps.profile_idc,
                sps.level_idc,
                sps.width(),
                sps.height(),
                visible.max.x - visible.min.x,
                visible.max.y - visible.min.y,
            )
        }
        NaluPayload::Pps(pps) => format!(
            "PPS {}: SPS {}, {}",
            pps.pic_parameter_set_id,
            pps.seq_parameter_set_id,
            if pps.entropy_coding_mode_flag { "CABAC" } else { "CAVLC" }
        ),
        NaluPayload::SubsetSps(subset_sps) => format!(
            "subset SPS {}: profile {}{}",
            subset_sps.sps.seq_parameter_set_id,
            subset_sps.sps.profile_idc,
            if subset_sps.svc_extension.is_some() { ", SVC" } else { "" }
        ),
        NaluPayload::Slice(slice) => format!(
            "{:?} slice: PPS {}, frame_num {}, first_mb {}",
            slice.slice_type, slice.pic_parameter_set_id, slice.frame_num, slice.first_mb_in_slice
        ),
        NaluPayload::SliceExtension(header) => format!(
            "scalable {:?} slice: PPS {}, frame_num {}, ref_layer_dq_id {}",
            header.slice.slice_type,
            header.slice.pic_parameter_set_id,
            header.slice.frame_num,
            header.ref_layer_dq_id
        ),
        NaluPayload::Prefix(prefix) => format!(
            "prefix: store_ref_base_pic_flag {}",
            prefix.store_ref_base_pic_flag
        ),
        NaluPayload::None => String::new(),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();
    anyhow::ensure!(args.chunk_size > 0, "chunk size must not be zero");

    let mut input = File::open(&args.input)
        .with_context(|| format!("error opening {}", args.input.display()))?;

    let mut extractor = ThreadedExtractor::spawn(ExtractorConfig {
        unit_queue_depth: args.queue_depth,
        ..Default::default()
    })?;
    let feeder = extractor
        .take_feeder()
        .context("extractor feeder already taken")?;

    let chunk_size = args.chunk_size;
    let reader = thread::spawn(move || -> anyhow::Result<u64> {
        let mut total = 0;

        loop {
            let mut chunk = vec![0; chunk_size];
            let read = input.read(&mut chunk).context("error reading input")?;
            if read == 0 {
                break;
            }

            chunk.truncate(read);
            total += read as u64;
            feeder.push(chunk)?;
        }

        feeder.finish();
        Ok(total)
    });

    let mut parser = Parser::default();
    let mut num_failed = 0;

    for nalu in extractor.iter() {
        match parser.parse_nalu(&nalu) {
            Ok(unit) => {
                println!(
                    "{:>10} {:>8} {:<14} ref_idc {} crc {:08x} {}",
                    unit.stream_offset,
                    unit.size,
                    format!("{:?}", unit.header.type_),
                    unit.header.ref_idc,
                    unit.checksum,
                    summary(&unit.payload)
                );

                if args.verbose {
                    println!("{:#?}", unit.payload);
                }
            }
            Err(e) => {
                num_failed += 1;
                println!("{:>10} {:>8} {}", e.stream_offset, nalu.size(), e);
            }
        }
    }

    let num_bytes = reader
        .join()
        .map_err(|_| anyhow!("reader thread panicked"))??;
    let num_units = extractor.join()?;

    println!(
        "{} bytes, {} NAL units, {} failed to parse",
        num_bytes, num_units, num_failed
    );

    Ok(())
}
