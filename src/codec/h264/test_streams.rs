// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Small Annex B streams for unit tests, written with [`NaluWriter`].

use std::io::Write;

use crate::codec::h264::nalu_writer::NaluWriter;
use crate::codec::h264::nalu_writer::NaluWriterResult;

/// Returns one NAL unit: a 4-byte start code, the header, whatever `body`
/// writes and the RBSP trailing bits.
pub(crate) fn nalu(
    ref_idc: u8,
    nal_unit_type: u8,
    body: impl FnOnce(&mut NaluWriter<&mut Vec<u8>>) -> NaluWriterResult<()>,
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

/// SPS fields from `log2_max_frame_num_minus4` on: 4-bit frame_num and
/// pic_order_cnt_lsb, one reference frame, progressive, no cropping nor VUI.
pub(crate) fn write_sps_tail<W: Write>(
    w: &mut NaluWriter<W>,
    pic_width_in_mbs_minus1: u32,
    pic_height_in_map_units_minus1: u32,
) -> NaluWriterResult<()> {
    // log2_max_frame_num_minus4, pic_order_cnt_type,
    // log2_max_pic_order_cnt_lsb_minus4, max_num_ref_frames
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_ue(0u32)?;
    w.write_ue(1u32)?;
    // gaps_in_frame_num_value_allowed_flag
    w.write_u(1, false)?;
    w.write_ue(pic_width_in_mbs_minus1)?;
    w.write_ue(pic_height_in_map_units_minus1)?;
    // frame_mbs_only_flag, direct_8x8_inference_flag, frame_cropping_flag,
    // vui_parameters_present_flag
    w.write_u(1, true)?;
    w.write_u(1, true)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;

    Ok(())
}

/// Baseline profile, level 3.0, 160x128.
pub(crate) fn write_baseline_sps<W: Write>(
    w: &mut NaluWriter<W>,
    seq_parameter_set_id: u32,
) -> NaluWriterResult<()> {
    w.write_u(8, 66u32)?;
    w.write_u(8, 0u32)?;
    w.write_u(8, 30u32)?;
    w.write_ue(seq_parameter_set_id)?;

    write_sps_tail(w, 9, 7)
}

/// PPS fields from `num_ref_idx_l0_default_active_minus1` on: three default
/// L0 references, no weighted prediction, deblocking control present.
pub(crate) fn write_pps_tail<W: Write>(w: &mut NaluWriter<W>) -> NaluWriterResult<()> {
    w.write_ue(2u32)?;
    w.write_ue(0u32)?;
    // weighted_pred_flag, weighted_bipred_idc
    w.write_u(1, false)?;
    w.write_u(2, 0u32)?;
    // pic_init_qp_minus26, pic_init_qs_minus26, chroma_qp_index_offset
    w.write_se(0)?;
    w.write_se(0)?;
    w.write_se(0)?;
    // deblocking_filter_control_present_flag, constrained_intra_pred_flag,
    // redundant_pic_cnt_present_flag
    w.write_u(1, true)?;
    w.write_u(1, false)?;
    w.write_u(1, false)?;

    Ok(())
}

/// CAVLC, a single slice group.
pub(crate) fn write_basic_pps<W: Write>(
    w: &mut NaluWriter<W>,
    pic_parameter_set_id: u32,
    seq_parameter_set_id: u32,
) -> NaluWriterResult<()> {
    w.write_ue(pic_parameter_set_id)?;
    w.write_ue(seq_parameter_set_id)?;
    // entropy_coding_mode_flag, bottom_field_pic_order_in_frame_present_flag
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    // num_slice_groups_minus1
    w.write_ue(0u32)?;

    write_pps_tail(w)
}

/// An I slice header of an IDR picture for [`write_baseline_sps`] and
/// [`write_basic_pps`], with `nal_ref_idc != 0`.
pub(crate) fn write_idr_slice<W: Write>(
    w: &mut NaluWriter<W>,
    pic_parameter_set_id: u32,
    frame_num: u32,
) -> NaluWriterResult<()> {
    // first_mb_in_slice, slice_type
    w.write_ue(0u32)?;
    w.write_ue(7u32)?;
    w.write_ue(pic_parameter_set_id)?;
    w.write_u(4, frame_num)?;
    // idr_pic_id, pic_order_cnt_lsb
    w.write_ue(0u32)?;
    w.write_u(4, 0u32)?;
    // no_output_of_prior_pics_flag, long_term_reference_flag
    w.write_u(1, false)?;
    w.write_u(1, false)?;
    // slice_qp_delta, disable_deblocking_filter_idc
    w.write_se(0)?;
    w.write_ue(1u32)?;

    Ok(())
}
