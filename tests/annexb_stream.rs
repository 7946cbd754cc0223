// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::thread;

use h264_syntax::codec::h264::extractor::ExtractorConfig;
use h264_syntax::codec::h264::extractor::NaluExtractor;
use h264_syntax::codec::h264::extractor::RawNalu;
use h264_syntax::codec::h264::extractor::ThreadedExtractor;
use h264_syntax::codec::h264::nalu::NaluType;
use h264_syntax::codec::h264::nalu_writer::NaluWriter;
use h264_syntax::codec::h264::nalu_writer::NaluWriterResult;
use h264_syntax::codec::h264::parser::NalUnit;
use h264_syntax::codec::h264::parser::NaluError;
use h264_syntax::codec::h264::parser::NaluPayload;
use h264_syntax::codec::h264::parser::Parser;
use h264_syntax::codec::h264::slice::SliceType;
use h264_syntax::codec::h264::syntax::ParameterSetKind;
use h264_syntax::codec::h264::syntax::ParseErrorKind;

type Writer<'a> = NaluWriter<&'a mut Vec<u8>>;

fn unit(
    ref_idc: u8,
    nal_unit_type: u8,
    body: impl FnOnce(&mut Writer) -> NaluWriterResult<()>,
) -> Vec<u8> {
    let mut out = Vec::new();

    {
        let mut w = NaluWriter::new(&mut out, true);
        w.write_header(ref_idc, nal_unit_type).unwrap();
        body(&mut w).unwrap();
        w.write_trailing_bits().unwrap();
        w.flush().unwrap();
    }

    out
}

/// Baseline, 160x128, 4-bit frame_num and pic_order_cnt_lsb.
fn sps(w: &mut Writer) -> NaluWriterResult<()> {
    w.write_u(8, 66u32)?;
    // constraint_set0_flag and constraint_set1_flag
    w.write_u(8, 0xc0u32)?;
    w.write_u(8, 30u32)?;
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_ue(1u32)?;
    w.write_u(1, false)?;
    w.write_ue(9u32)?;
    w.write_ue(7u32)?;
    w.write_u(1, true)?;
    w.write_u(1, true)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    Ok(())
}

fn pps(w: &mut Writer) -> NaluWriterResult<()> {
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_u(1, false)?;
    w.write_u(2, 0u32)?;
    w.write_se(0)?;
    w.write_se(0)?;
    w.write_se(0)?;
    // deblocking_filter_control_present_flag
    w.write_u(1, true)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    Ok(())
}

fn idr_slice(w: &mut Writer) -> NaluWriterResult<()> {
    w.write_ue(0u32)?;
    w.write_ue(7u32)?;
    w.write_ue(0u32)?;
    w.write_u(4, 0u32)?;
    w.write_ue(0u32)?;
    w.write_u(4, 0u32)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    w.write_se(0)?;
    w.write_ue(1u32)?;
    Ok(())
}

fn p_slice(w: &mut Writer) -> NaluWriterResult<()> {
    w.write_ue(0u32)?;
    w.write_ue(5u32)?;
    w.write_ue(0u32)?;
    w.write_u(4, 1u32)?;
    w.write_u(4, 2u32)?;
    // num_ref_idx_active_override_flag, ref_pic_list_modification_flag_l0,
    // adaptive_ref_pic_marking_mode_flag
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    w.write_se(-2)?;
    w.write_ue(1u32)?;
    Ok(())
}

/// SPS, PPS, an IDR picture, an SEI message and a P picture.
fn stream() -> Vec<u8> {
    let mut stream = unit(3, 7, sps);
    stream.extend(unit(3, 8, pps));
    stream.extend(unit(3, 5, idr_slice));
    stream.extend(unit(0, 6, |w| {
        w.write_u(8, 5u32)?;
        w.write_u(8, 0u32)?;
        Ok(())
    }));
    stream.extend(unit(2, 1, p_slice));
    stream
}

fn extract(chunks: &[&[u8]]) -> Vec<RawNalu> {
    let mut extractor = NaluExtractor::new();

    let mut units = Vec::new();
    for chunk in chunks {
        units.extend(extractor.push(chunk));
    }
    units.extend(extractor.finish());

    units
}

fn parse_all(units: &[RawNalu]) -> (Parser, Vec<Result<NalUnit, NaluError>>) {
    let mut parser = Parser::default();
    let results = units.iter().map(|nalu| parser.parse_nalu(nalu)).collect();
    (parser, results)
}

#[test]
fn baseline_stream() {
    let stream = stream();
    let units = extract(&[&stream]);
    assert_eq!(units.len(), 5);
    assert!(units.iter().all(|nalu| nalu.start_code_len == 4));

    let (parser, results) = parse_all(&units);
    let results = results.into_iter().collect::<Result<Vec<_>, _>>().unwrap();

    let sps = parser.get_sps(0).unwrap();
    assert_eq!(sps.width(), 160);
    assert_eq!(sps.height(), 128);
    assert!(sps.constraint_set0_flag);
    assert!(sps.constraint_set1_flag);
    assert!(parser.get_pps(0).is_some());

    assert_eq!(
        results.iter().map(|u| u.header.type_).collect::<Vec<_>>(),
        vec![
            NaluType::Sps,
            NaluType::Pps,
            NaluType::SliceIdr,
            NaluType::Sei,
            NaluType::Slice
        ]
    );

    let mut offset = 0;
    for (unit, nalu) in results.iter().zip(&units) {
        assert_eq!(unit.stream_offset, offset);
        assert_eq!(unit.size, nalu.size());
        assert!(unit.bit_length <= unit.size * 8);
        offset += nalu.data.len() as u64;
    }
    assert_eq!(offset, stream.len() as u64);

    match &results[2].payload {
        NaluPayload::Slice(slice) => {
            assert_eq!(slice.slice_type, SliceType::I);
            assert_eq!(slice.frame_num, 0);
            assert!(!slice.dec_ref_pic_marking.long_term_reference_flag);
        }
        payload => panic!("expected a slice, got {:?}", payload),
    }

    assert_eq!(results[3].payload, NaluPayload::None);

    match &results[4].payload {
        NaluPayload::Slice(slice) => {
            assert_eq!(slice.slice_type, SliceType::P);
            assert_eq!(slice.frame_num, 1);
            assert_eq!(slice.pic_order_cnt_lsb, 2);
            assert_eq!(slice.slice_qp_delta, -2);
            assert_eq!(slice.num_ref_idx_l0_active_minus1, 0);
        }
        payload => panic!("expected a slice, got {:?}", payload),
    }
}

#[test]
fn chunking_does_not_change_units() {
    let stream = stream();
    let reference = extract(&[&stream]);

    for split in 1..stream.len() {
        let (a, b) = stream.split_at(split);
        assert_eq!(extract(&[a, b]), reference, "split at {}", split);
    }

    let bytes = stream.chunks(1).collect::<Vec<_>>();
    assert_eq!(extract(&bytes), reference);

    // Units parse the same whichever way they were extracted.
    let (_, a) = parse_all(&reference);
    let (_, b) = parse_all(&extract(&bytes));
    assert_eq!(a, b);
}

#[test]
fn threaded_extraction() {
    let stream = stream();
    let reference = extract(&[&stream]);

    let mut extractor = ThreadedExtractor::spawn(ExtractorConfig {
        chunk_queue_depth: 1,
        unit_queue_depth: 1,
    })
    .unwrap();

    let feeder = extractor.take_feeder().unwrap();
    let chunks = stream.chunks(7).map(|c| c.to_vec()).collect::<Vec<_>>();
    let producer = thread::spawn(move || {
        for chunk in chunks {
            feeder.push(chunk).unwrap();
        }
        feeder.finish();
    });

    let units = extractor.iter().collect::<Vec<_>>();
    producer.join().unwrap();

    assert_eq!(units, reference);
    assert_eq!(extractor.join().unwrap(), reference.len());
}

#[test]
fn failures_are_per_unit() {
    let mut stream = unit(3, 7, sps);
    // A slice for a PPS that never came.
    stream.extend(unit(3, 5, idr_slice));
    // num_slice_groups_minus1 = 8
    stream.extend(unit(3, 8, |w| {
        w.write_ue(1u32)?;
        w.write_ue(0u32)?;
        w.write_u(1, false)?;
        w.write_u(1, false)?;
        w.write_ue(8u32)?;
        Ok(())
    }));
    stream.extend(unit(3, 8, pps));
    stream.extend(unit(3, 5, idr_slice));

    let units = extract(&[&stream]);
    let (parser, results) = parse_all(&units);
    assert_eq!(results.len(), 5);

    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.nal_unit_type, Some(NaluType::SliceIdr));
    assert_eq!(
        err.source.kind,
        ParseErrorKind::UnresolvedReference {
            kind: ParameterSetKind::Pps,
            id: 0
        }
    );

    let err = results[2].as_ref().unwrap_err();
    assert_eq!(err.source.field, "num_slice_groups_minus1");
    assert_eq!(
        err.source.kind,
        ParseErrorKind::OutOfRange {
            value: 8,
            min: 0,
            max: 7
        }
    );
    assert!(parser.get_pps(1).is_none());

    assert!(results[3].is_ok());
    assert!(matches!(
        results[4].as_ref().unwrap().payload,
        NaluPayload::Slice(_)
    ));
}

#[test]
fn stream_without_start_code() {
    let with_start_code = unit(3, 7, sps);
    let bare = &with_start_code[4..];

    let units = extract(&[bare]);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].start_code_len, 4);
    assert_eq!(units[0].data, with_start_code);

    let (parser, results) = parse_all(&units);
    assert!(results[0].is_ok());
    assert_eq!(parser.get_sps(0).unwrap().width(), 160);
}
