// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slice header parsing, 7.3.3 and its sub-structures.

use std::rc::Rc;

use enumn::N;

use crate::bitstream_utils::BitPosition;
use crate::codec::h264::nalu::NaluHeader;
use crate::codec::h264::parser::Parser;
use crate::codec::h264::parser::Pps;
use crate::codec::h264::parser::Sps;
use crate::codec::h264::parser::MAX_PPS_ID;
use crate::codec::h264::syntax::ParseErrorKind;
use crate::codec::h264::syntax::ParseResult;
use crate::codec::h264::syntax::SyntaxReader;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SliceType {
    #[default]
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub modification_of_pic_nums_idc: u8,
    /* if modification_of_pic_nums_idc == 0 || 1 */
    pub abs_diff_pic_num_minus1: u32,
    /* if modification_of_pic_nums_idc == 2 */
    pub long_term_pic_num: u32,
}

impl RefPicListModification {
    /// Reads the modifications of one list, terminator included. There can
    /// be at most one per active reference index.
    fn parse_list(r: &mut SyntaxReader, num_ref_idx_active_minus1: u8) -> ParseResult<Vec<Self>> {
        let max_ops = u32::from(num_ref_idx_active_minus1) + 1;
        let mut list = Vec::new();

        loop {
            let mut pic_num_mod = RefPicListModification {
                modification_of_pic_nums_idc: r.ue_max("modification_of_pic_nums_idc", 3)?,
                ..Default::default()
            };

            match pic_num_mod.modification_of_pic_nums_idc {
                0 | 1 => {
                    pic_num_mod.abs_diff_pic_num_minus1 = r.ue("abs_diff_pic_num_minus1")?;
                }
                2 => {
                    pic_num_mod.long_term_pic_num = r.ue("long_term_pic_num")?;
                }
                _ => {
                    list.push(pic_num_mod);
                    return Ok(list);
                }
            }

            list.push(pic_num_mod);
            r.check("modification_of_pic_nums_idc", list.len() as u32, 0, max_ops)?;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,

    pub luma_weight_l0: [i16; 32],
    pub luma_offset_l0: [i8; 32],

    /* if seq->ChromaArrayType != 0 */
    pub chroma_weight_l0: [[i16; 2]; 32],
    pub chroma_offset_l0: [[i8; 2]; 32],

    /* if slice->slice_type % 5 == 1 */
    pub luma_weight_l1: [i16; 32],
    pub luma_offset_l1: [i8; 32],

    /* and if seq->ChromaArrayType != 0 */
    pub chroma_weight_l1: [[i16; 2]; 32],
    pub chroma_offset_l1: [[i8; 2]; 32],
}

impl PredWeightTable {
    /// `pred_weight_table()`, 7.3.3.2. Weights of entries without an
    /// explicit weight are inferred as `1 << log2_weight_denom`.
    pub fn parse(r: &mut SyntaxReader, chroma_array_type: u8, header: &SliceHeader) -> ParseResult<Self> {
        let outer = r.enter("pred_weight_table");
        let mut pt = PredWeightTable {
            luma_log2_weight_denom: r.ue_max("luma_log2_weight_denom", 7)?,
            ..Default::default()
        };

        if chroma_array_type != 0 {
            pt.chroma_log2_weight_denom = r.ue_max("chroma_log2_weight_denom", 7)?;
        }

        let num_l0 = usize::from(header.num_ref_idx_l0_active_minus1) + 1;
        pt.parse_list(r, chroma_array_type, num_l0, false)?;

        if header.slice_type.is_b() {
            let num_l1 = usize::from(header.num_ref_idx_l1_active_minus1) + 1;
            pt.parse_list(r, chroma_array_type, num_l1, true)?;
        }

        r.leave(outer);
        Ok(pt)
    }

    fn parse_list(
        &mut self,
        r: &mut SyntaxReader,
        chroma_array_type: u8,
        num_entries: usize,
        l1: bool,
    ) -> ParseResult<()> {
        let default_luma_weight = 1 << self.luma_log2_weight_denom;
        let default_chroma_weight = 1 << self.chroma_log2_weight_denom;

        let (luma_weight, luma_offset, chroma_weight, chroma_offset) = if l1 {
            (
                &mut self.luma_weight_l1,
                &mut self.luma_offset_l1,
                &mut self.chroma_weight_l1,
                &mut self.chroma_offset_l1,
            )
        } else {
            (
                &mut self.luma_weight_l0,
                &mut self.luma_offset_l0,
                &mut self.chroma_weight_l0,
                &mut self.chroma_offset_l0,
            )
        };

        for i in 0..num_entries {
            luma_weight[i] = default_luma_weight;
            if r.flag("luma_weight_flag")? {
                luma_weight[i] = r.se_range("luma_weight", -128, 127)?;
                luma_offset[i] = r.se_range("luma_offset", -128, 127)?;
            }

            if chroma_array_type != 0 {
                chroma_weight[i] = [default_chroma_weight; 2];
                if r.flag("chroma_weight_flag")? {
                    for j in 0..2 {
                        chroma_weight[i][j] = r.se_range("chroma_weight", -128, 127)?;
                        chroma_offset[i][j] = r.se_range("chroma_offset", -128, 127)?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// MaxLongTermFrameIdx, as set by memory_management_control_operation 4.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxLongTermFrameIdx {
    #[default]
    NoLongTermFrameIndices,
    Idx(u32),
}

impl MaxLongTermFrameIdx {
    pub fn from_value_plus1(max_long_term_frame_idx_plus1: u32) -> Self {
        match max_long_term_frame_idx_plus1 {
            0 => Self::NoLongTermFrameIndices,
            i @ 1.. => Self::Idx(i - 1),
        }
    }

    pub fn to_value_plus1(self) -> u32 {
        match self {
            Self::NoLongTermFrameIndices => 0,
            Self::Idx(i) => i + 1,
        }
    }
}

impl PartialEq<u32> for MaxLongTermFrameIdx {
    fn eq(&self, other: &u32) -> bool {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => false,
            MaxLongTermFrameIdx::Idx(idx) => idx.eq(other),
        }
    }
}

impl PartialOrd<u32> for MaxLongTermFrameIdx {
    fn partial_cmp(&self, other: &u32) -> Option<std::cmp::Ordering> {
        match self {
            MaxLongTermFrameIdx::NoLongTermFrameIndices => Some(std::cmp::Ordering::Less),
            MaxLongTermFrameIdx::Idx(idx) => Some(idx.cmp(other)),
        }
    }
}

/// One memory management control operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarkingInner {
    pub memory_management_control_operation: u8,
    /* if mmco == 1 || 3 */
    pub difference_of_pic_nums_minus1: u32,
    /* if mmco == 2 */
    pub long_term_pic_num: u32,
    /* if mmco == 3 || 6 */
    pub long_term_frame_idx: u32,
    /* if mmco == 4 */
    pub max_long_term_frame_idx: MaxLongTermFrameIdx,
}

impl RefPicMarkingInner {
    /// Reads operations up to the terminating 0, which is not stored.
    pub(crate) fn parse_list(r: &mut SyntaxReader) -> ParseResult<Vec<Self>> {
        let mut list = Vec::new();

        loop {
            let mut marking = RefPicMarkingInner {
                memory_management_control_operation: r
                    .ue_max("memory_management_control_operation", 6)?,
                ..Default::default()
            };

            let mmco = marking.memory_management_control_operation;
            if mmco == 0 {
                return Ok(list);
            }

            if mmco == 1 || mmco == 3 {
                marking.difference_of_pic_nums_minus1 = r.ue("difference_of_pic_nums_minus1")?;
            }

            if mmco == 2 {
                marking.long_term_pic_num = r.ue("long_term_pic_num")?;
            }

            if mmco == 3 || mmco == 6 {
                marking.long_term_frame_idx = r.ue("long_term_frame_idx")?;
            }

            if mmco == 4 {
                marking.max_long_term_frame_idx = MaxLongTermFrameIdx::from_value_plus1(
                    r.ue("max_long_term_frame_idx_plus1")?,
                );
            }

            list.push(marking);
        }
    }
}

/// `dec_ref_pic_marking()`, 7.3.3.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarking {
    pub no_output_of_prior_pics_flag: bool,
    pub long_term_reference_flag: bool,
    pub adaptive_ref_pic_marking_mode_flag: bool,
    pub inner: Vec<RefPicMarkingInner>,
}

impl RefPicMarking {
    pub fn parse(r: &mut SyntaxReader, idr_pic_flag: bool) -> ParseResult<Self> {
        let outer = r.enter("dec_ref_pic_marking");
        let mut rpm = RefPicMarking::default();

        if idr_pic_flag {
            rpm.no_output_of_prior_pics_flag = r.flag("no_output_of_prior_pics_flag")?;
            rpm.long_term_reference_flag = r.flag("long_term_reference_flag")?;
        } else {
            rpm.adaptive_ref_pic_marking_mode_flag =
                r.flag("adaptive_ref_pic_marking_mode_flag")?;

            if rpm.adaptive_ref_pic_marking_mode_flag {
                rpm.inner = RefPicMarkingInner::parse_list(r)?;
            }
        }

        r.leave(outer);
        Ok(rpm)
    }
}

/// The value of `bottom_field_pic_order_in_frame_present_flag` for which a
/// frame slice header carries `delta_pic_order_cnt_bottom`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BottomFieldPocPresence {
    WhenFlagSet,
    WhenFlagClear,
}

/// `slice_header()`, 7.3.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,

    /// `slice_type % 5`.
    pub slice_type: SliceType,

    // Specifies the picture parameter set in use
    pub pic_parameter_set_id: u8,

    pub colour_plane_id: u8,

    pub frame_num: u16,

    pub field_pic_flag: bool,

    pub bottom_field_flag: bool,

    pub idr_pic_id: u16,

    pub pic_order_cnt_lsb: u16,

    pub delta_pic_order_cnt_bottom: i32,

    pub delta_pic_order_cnt: [i32; 2],

    pub redundant_pic_cnt: u8,

    pub direct_spatial_mv_pred_flag: bool,

    pub num_ref_idx_active_override_flag: bool,

    /// Inferred from the PPS unless overridden.
    pub num_ref_idx_l0_active_minus1: u8,

    pub num_ref_idx_l1_active_minus1: u8,

    pub ref_pic_list_modification_flag_l0: bool,

    pub ref_pic_list_modification_l0: Vec<RefPicListModification>,

    pub ref_pic_list_modification_flag_l1: bool,

    pub ref_pic_list_modification_l1: Vec<RefPicListModification>,

    pub pred_weight_table: PredWeightTable,

    pub dec_ref_pic_marking: RefPicMarking,

    pub cabac_init_idc: u8,

    pub slice_qp_delta: i8,

    pub sp_for_switch_flag: bool,

    pub slice_qs_delta: i8,

    pub disable_deblocking_filter_idc: u8,

    pub slice_alpha_c0_offset_div2: i8,

    pub slice_beta_offset_div2: i8,

    pub slice_group_change_cycle: u64,

    // Calculated
    pub max_pic_num: u32,

    /// Size of the NAL unit header and slice header, in bits of RBSP.
    pub header_bit_size: usize,

    /// Size of the picture order count syntax elements, in bits.
    pub pic_order_cnt_bit_size: usize,

    /// Size of `dec_ref_pic_marking()`, in bits.
    pub dec_ref_pic_marking_bit_size: usize,
}

impl SliceHeader {
    /// Parses the slice header of a coded slice NAL unit. The parameter sets
    /// it refers to must be known to `parser`.
    pub fn parse(r: &mut SyntaxReader, nalu: &NaluHeader, parser: &Parser) -> ParseResult<Self> {
        let outer = r.enter("slice_header");

        let (mut header, pps_pos, pps) = Self::parse_start(r, parser, 9, true)?;
        let sps = parser.resolve_sps(r, pps_pos, pps)?;

        header.parse_picture_fields(
            r,
            sps,
            pps,
            nalu.idr_pic_flag(),
            BottomFieldPocPresence::WhenFlagSet,
        )?;

        if header.slice_type.is_b() {
            header.direct_spatial_mv_pred_flag = r.flag("direct_spatial_mv_pred_flag")?;
        }

        header.parse_num_ref_idx(r, pps)?;
        header.parse_ref_pic_list_modifications(r)?;

        if header.has_pred_weight_table(pps) {
            header.pred_weight_table = PredWeightTable::parse(r, sps.chroma_array_type(), &header)?;
        }

        if nalu.ref_idc != 0 {
            let start = r.bits_read();
            header.dec_ref_pic_marking = RefPicMarking::parse(r, nalu.idr_pic_flag())?;
            header.dec_ref_pic_marking_bit_size = r.bits_read() - start;
        }

        header.parse_tail(r, sps, pps, 2)?;
        header.header_bit_size = r.bits_read();

        r.leave(outer);
        Ok(header)
    }

    /// Reads `first_mb_in_slice`, `slice_type` (up to `max_slice_type`, SP
    /// and SI only with `switching_slices`) and `pic_parameter_set_id`, and
    /// resolves the PPS. Also returns where the PPS id was read.
    pub(crate) fn parse_start<'p>(
        r: &mut SyntaxReader,
        parser: &'p Parser,
        max_slice_type: u32,
        switching_slices: bool,
    ) -> ParseResult<(Self, BitPosition, &'p Rc<Pps>)> {
        let mut header = SliceHeader {
            first_mb_in_slice: r.ue("first_mb_in_slice")?,
            ..Default::default()
        };

        let pos = r.position();
        let slice_type = r.ue_max::<u8>("slice_type", max_slice_type)?;
        header.slice_type = SliceType::n(slice_type % 5)
            .filter(|t| switching_slices || !(t.is_sp() || t.is_si()))
            .ok_or_else(|| {
                r.error_at(
                    "slice_type",
                    pos,
                    ParseErrorKind::OutOfRange {
                        value: slice_type.into(),
                        min: 0,
                        max: max_slice_type.into(),
                    },
                )
            })?;

        let pps_pos = r.position();
        header.pic_parameter_set_id = r.ue_max("pic_parameter_set_id", MAX_PPS_ID)?;
        let pps = parser.resolve_pps(r, pps_pos, header.pic_parameter_set_id)?;

        Ok((header, pps_pos, pps))
    }

    /// Reads `colour_plane_id` through `redundant_pic_cnt`.
    pub(crate) fn parse_picture_fields(
        &mut self,
        r: &mut SyntaxReader,
        sps: &Sps,
        pps: &Pps,
        idr_pic_flag: bool,
        bottom_field_poc: BottomFieldPocPresence,
    ) -> ParseResult<()> {
        if sps.separate_colour_plane_flag {
            self.colour_plane_id = r.u_range(2, "colour_plane_id", 0, 2)? as u8;
        }

        self.frame_num = r.u(usize::from(sps.log2_max_frame_num_minus4) + 4, "frame_num")?;

        if !sps.frame_mbs_only_flag {
            self.field_pic_flag = r.flag("field_pic_flag")?;
            if self.field_pic_flag {
                self.bottom_field_flag = r.flag("bottom_field_flag")?;
            }
        }

        if self.field_pic_flag {
            self.max_pic_num = 2 * sps.max_frame_num();
        } else {
            self.max_pic_num = sps.max_frame_num();
        }

        if idr_pic_flag {
            self.idr_pic_id = r.ue_max("idr_pic_id", 0xffff)?;
        }

        let bottom_field_flag_matches = match bottom_field_poc {
            BottomFieldPocPresence::WhenFlagSet => pps.bottom_field_pic_order_in_frame_present_flag,
            BottomFieldPocPresence::WhenFlagClear => {
                !pps.bottom_field_pic_order_in_frame_present_flag
            }
        };

        let start = r.bits_read();
        if sps.pic_order_cnt_type == 0 {
            self.pic_order_cnt_lsb = r.u(
                usize::from(sps.log2_max_pic_order_cnt_lsb_minus4) + 4,
                "pic_order_cnt_lsb",
            )?;

            if bottom_field_flag_matches && !self.field_pic_flag {
                self.delta_pic_order_cnt_bottom = r.se("delta_pic_order_cnt_bottom")?;
            }
        }

        if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero_flag {
            self.delta_pic_order_cnt[0] = r.se("delta_pic_order_cnt")?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !self.field_pic_flag {
                self.delta_pic_order_cnt[1] = r.se("delta_pic_order_cnt")?;
            }
        }
        self.pic_order_cnt_bit_size = r.bits_read() - start;

        if pps.redundant_pic_cnt_present_flag {
            self.redundant_pic_cnt = r.ue_max("redundant_pic_cnt", 127)?;
        }

        Ok(())
    }

    /// Reads the active reference counts, or infers them from the PPS.
    pub(crate) fn parse_num_ref_idx(&mut self, r: &mut SyntaxReader, pps: &Pps) -> ParseResult<()> {
        let is_b = self.slice_type.is_b();

        if self.slice_type.is_p() || self.slice_type.is_sp() || is_b {
            self.num_ref_idx_active_override_flag = r.flag("num_ref_idx_active_override_flag")?;
            if self.num_ref_idx_active_override_flag {
                self.num_ref_idx_l0_active_minus1 = r.ue_max("num_ref_idx_l0_active_minus1", 31)?;
                if is_b {
                    self.num_ref_idx_l1_active_minus1 =
                        r.ue_max("num_ref_idx_l1_active_minus1", 31)?;
                }
            } else {
                self.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
                if is_b {
                    self.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
                }
            }
        }

        let max = if self.field_pic_flag { 31 } else { 15 };
        r.check(
            "num_ref_idx_l0_active_minus1",
            self.num_ref_idx_l0_active_minus1,
            0,
            max,
        )?;
        r.check(
            "num_ref_idx_l1_active_minus1",
            self.num_ref_idx_l1_active_minus1,
            0,
            max,
        )
    }

    /// `ref_pic_list_modification()`, 7.3.3.1.
    pub(crate) fn parse_ref_pic_list_modifications(&mut self, r: &mut SyntaxReader) -> ParseResult<()> {
        let outer = r.enter("ref_pic_list_modification");

        if !self.slice_type.is_i() && !self.slice_type.is_si() {
            self.ref_pic_list_modification_flag_l0 = r.flag("ref_pic_list_modification_flag_l0")?;
            if self.ref_pic_list_modification_flag_l0 {
                self.ref_pic_list_modification_l0 =
                    RefPicListModification::parse_list(r, self.num_ref_idx_l0_active_minus1)?;
            }
        }

        if self.slice_type.is_b() {
            self.ref_pic_list_modification_flag_l1 = r.flag("ref_pic_list_modification_flag_l1")?;
            if self.ref_pic_list_modification_flag_l1 {
                self.ref_pic_list_modification_l1 =
                    RefPicListModification::parse_list(r, self.num_ref_idx_l1_active_minus1)?;
            }
        }

        r.leave(outer);
        Ok(())
    }

    pub(crate) fn has_pred_weight_table(&self, pps: &Pps) -> bool {
        (pps.weighted_pred_flag && (self.slice_type.is_p() || self.slice_type.is_sp()))
            || (pps.weighted_bipred_idc == 1 && self.slice_type.is_b())
    }

    /// Reads `cabac_init_idc` through `slice_group_change_cycle`.
    pub(crate) fn parse_tail(
        &mut self,
        r: &mut SyntaxReader,
        sps: &Sps,
        pps: &Pps,
        max_disable_deblocking_filter_idc: u32,
    ) -> ParseResult<()> {
        if pps.entropy_coding_mode_flag && !self.slice_type.is_i() && !self.slice_type.is_si() {
            self.cabac_init_idc = r.ue_max("cabac_init_idc", 2)?;
        }

        self.slice_qp_delta = r.se_range("slice_qp_delta", -87, 77)?;

        if self.slice_type.is_sp() || self.slice_type.is_si() {
            if self.slice_type.is_sp() {
                self.sp_for_switch_flag = r.flag("sp_for_switch_flag")?;
            }

            self.slice_qs_delta = r.se_range("slice_qs_delta", -51, 51)?;
        }

        if pps.deblocking_filter_control_present_flag {
            self.disable_deblocking_filter_idc =
                r.ue_max("disable_deblocking_filter_idc", max_disable_deblocking_filter_idc)?;

            if self.disable_deblocking_filter_idc != 1 {
                self.slice_alpha_c0_offset_div2 = r.se_range("slice_alpha_c0_offset_div2", -6, 6)?;
                self.slice_beta_offset_div2 = r.se_range("slice_beta_offset_div2", -6, 6)?;
            }
        }

        if pps.has_slice_group_change_cycle() {
            let pic_size_in_map_units = sps.pic_size_in_map_units();
            let rate = u64::from(pps.slice_group_change_rate());
            let num_bits = slice_group_change_cycle_bits(pic_size_in_map_units, rate);

            self.slice_group_change_cycle = r.u_wide_max(
                num_bits,
                "slice_group_change_cycle",
                pic_size_in_map_units.div_ceil(rate),
            )?;
        }

        Ok(())
    }
}

/// Ceil(Log2(PicSizeInMapUnits / SliceGroupChangeRate + 1)), with an exact
/// division.
fn slice_group_change_cycle_bits(pic_size_in_map_units: u64, slice_group_change_rate: u64) -> usize {
    // Smallest n with 2^n * rate >= size + rate.
    let rate = slice_group_change_rate.max(1);
    let target = pic_size_in_map_units + rate;

    let mut num_bits = 0;
    while (rate << num_bits) < target {
        num_bits += 1;
    }

    num_bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::extractor::RawNalu;
    use crate::codec::h264::nalu_writer::NaluWriter;
    use crate::codec::h264::nalu_writer::NaluWriterResult;
    use crate::codec::h264::parser::NalUnit;
    use crate::codec::h264::parser::NaluError;
    use crate::codec::h264::parser::NaluPayload;
    use crate::codec::h264::test_streams;
    use crate::codec::h264::test_streams::write_basic_pps;

    type Writer<'a> = NaluWriter<&'a mut Vec<u8>>;

    /// A parser that knows a baseline SPS (id 0) and `pps` as PPS 0.
    fn parser_with(
        sps: impl FnOnce(&mut Writer) -> NaluWriterResult<()>,
        pps: impl FnOnce(&mut Writer) -> NaluWriterResult<()>,
    ) -> Parser {
        let mut stream = test_streams::nalu(3, 7, sps);
        stream.extend(test_streams::nalu(3, 8, pps));

        let mut parser = Parser::default();
        for unit in parser.parse_stream(&stream).collect::<Vec<_>>() {
            unit.unwrap();
        }

        parser
    }

    fn baseline_parser() -> Parser {
        parser_with(
            |w| test_streams::write_baseline_sps(w, 0),
            |w| write_basic_pps(w, 0, 0),
        )
    }

    fn parse_unit(
        parser: &mut Parser,
        ref_idc: u8,
        nal_unit_type: u8,
        body: impl FnOnce(&mut Writer) -> NaluWriterResult<()>,
    ) -> Result<NalUnit, NaluError> {
        let data = test_streams::nalu(ref_idc, nal_unit_type, body);
        let nalu = RawNalu {
            stream_offset: 0,
            start_code_len: 4,
            data: data.into(),
        };

        parser.parse_nalu(&nalu)
    }

    fn slice_of(unit: NalUnit) -> SliceHeader {
        match unit.payload {
            NaluPayload::Slice(slice) => *slice,
            payload => panic!("expected a slice, got {:?}", payload),
        }
    }

    #[test]
    fn p_slice_with_modifications_and_marking() {
        let mut parser = baseline_parser();

        let unit = parse_unit(&mut parser, 2, 1, |w| {
            w.write_ue(10u32)?;
            // P, all slices of the picture
            w.write_ue(5u32)?;
            w.write_ue(0u32)?;
            w.write_u(4, 9u32)?;
            w.write_u(4, 6u32)?;
            // num_ref_idx_active_override_flag
            w.write_u(1, false)?;
            // ref_pic_list_modification_flag_l0 and three operations
            w.write_u(1, true)?;
            w.write_ue(0u32)?;
            w.write_ue(2u32)?;
            w.write_ue(2u32)?;
            w.write_ue(1u32)?;
            w.write_ue(3u32)?;
            // adaptive_ref_pic_marking_mode_flag
            w.write_u(1, true)?;
            w.write_ue(1u32)?;
            w.write_ue(4u32)?;
            w.write_ue(4u32)?;
            w.write_ue(0u32)?;
            w.write_ue(3u32)?;
            w.write_ue(1u32)?;
            w.write_ue(2u32)?;
            w.write_ue(0u32)?;
            // slice_qp_delta, disable_deblocking_filter_idc and offsets
            w.write_se(-3)?;
            w.write_ue(0u32)?;
            w.write_se(2)?;
            w.write_se(-6)?;
            Ok(())
        })
        .unwrap();

        assert!(!unit.header.idr_pic_flag());
        let bit_length = unit.bit_length;
        let slice = slice_of(unit);

        assert_eq!(slice.first_mb_in_slice, 10);
        assert_eq!(slice.slice_type, SliceType::P);
        assert_eq!(slice.frame_num, 9);
        assert_eq!(slice.pic_order_cnt_lsb, 6);
        assert_eq!(slice.pic_order_cnt_bit_size, 4);
        assert_eq!(slice.max_pic_num, 16);

        // Inferred from the PPS.
        assert!(!slice.num_ref_idx_active_override_flag);
        assert_eq!(slice.num_ref_idx_l0_active_minus1, 2);

        assert!(slice.ref_pic_list_modification_flag_l0);
        assert_eq!(
            slice
                .ref_pic_list_modification_l0
                .iter()
                .map(|m| m.modification_of_pic_nums_idc)
                .collect::<Vec<_>>(),
            vec![0, 2, 1, 3]
        );
        assert_eq!(slice.ref_pic_list_modification_l0[0].abs_diff_pic_num_minus1, 2);
        assert_eq!(slice.ref_pic_list_modification_l0[1].long_term_pic_num, 1);
        assert_eq!(slice.ref_pic_list_modification_l0[2].abs_diff_pic_num_minus1, 3);

        let marking = &slice.dec_ref_pic_marking;
        assert!(marking.adaptive_ref_pic_marking_mode_flag);
        assert_eq!(marking.inner.len(), 3);
        assert_eq!(marking.inner[0].memory_management_control_operation, 1);
        assert_eq!(marking.inner[0].difference_of_pic_nums_minus1, 4);
        assert_eq!(
            marking.inner[1].max_long_term_frame_idx,
            MaxLongTermFrameIdx::NoLongTermFrameIndices
        );
        assert_eq!(marking.inner[2].difference_of_pic_nums_minus1, 1);
        assert_eq!(marking.inner[2].long_term_frame_idx, 2);
        // 1 + 3 + 5 + 5 + 1 + 5 + 3 + 3 + 1 bits
        assert_eq!(slice.dec_ref_pic_marking_bit_size, 27);

        assert_eq!(slice.slice_qp_delta, -3);
        assert_eq!(slice.disable_deblocking_filter_idc, 0);
        assert_eq!(slice.slice_alpha_c0_offset_div2, 2);
        assert_eq!(slice.slice_beta_offset_div2, -6);
        assert_eq!(slice.header_bit_size, bit_length);
    }

    #[test]
    fn too_many_list_modifications() {
        let mut parser = baseline_parser();

        let err = parse_unit(&mut parser, 0, 1, |w| {
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_u(4, 1u32)?;
            w.write_u(4, 2u32)?;
            // Override to a single reference, then two operations.
            w.write_u(1, true)?;
            w.write_ue(0u32)?;
            w.write_u(1, true)?;
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_ue(3u32)?;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.source.structure, "ref_pic_list_modification");
        assert_eq!(err.source.field, "modification_of_pic_nums_idc");
        assert_eq!(
            err.source.kind,
            ParseErrorKind::OutOfRange {
                value: 2,
                min: 0,
                max: 1
            }
        );
    }

    #[test]
    fn unterminated_marking_fails() {
        let mut parser = baseline_parser();

        let err = parse_unit(&mut parser, 1, 1, |w| {
            w.write_ue(0u32)?;
            w.write_ue(2u32)?;
            w.write_ue(0u32)?;
            w.write_u(4, 1u32)?;
            w.write_u(4, 2u32)?;
            w.write_u(1, true)?;
            for _ in 0..3 {
                w.write_ue(1u32)?;
                w.write_ue(0u32)?;
            }
            // The start of a code cut short by the end of the unit.
            w.write_u(7, 0u32)?;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.source.structure, "dec_ref_pic_marking");
        assert_eq!(err.source.kind, ParseErrorKind::InsufficientData);
    }

    #[test]
    fn b_slice_weights() {
        let mut parser = parser_with(
            |w| test_streams::write_baseline_sps(w, 0),
            |w| {
                w.write_ue(0u32)?;
                w.write_ue(0u32)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                w.write_ue(0u32)?;
                w.write_ue(0u32)?;
                w.write_ue(0u32)?;
                // weighted_pred_flag, weighted_bipred_idc = 1
                w.write_u(1, false)?;
                w.write_u(2, 1u32)?;
                w.write_se(0)?;
                w.write_se(0)?;
                w.write_se(0)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                Ok(())
            },
        );

        let unit = parse_unit(&mut parser, 0, 1, |w| {
            w.write_ue(0u32)?;
            // B
            w.write_ue(1u32)?;
            w.write_ue(0u32)?;
            w.write_u(4, 3u32)?;
            w.write_u(4, 4u32)?;
            // direct_spatial_mv_pred_flag
            w.write_u(1, true)?;
            // override: two L0 references, one L1
            w.write_u(1, true)?;
            w.write_ue(1u32)?;
            w.write_ue(0u32)?;
            // no list modifications
            w.write_u(1, false)?;
            w.write_u(1, false)?;
            // luma and chroma denominators
            w.write_ue(5u32)?;
            w.write_ue(3u32)?;
            // L0[0]: luma weight, no chroma weight
            w.write_u(1, true)?;
            w.write_se(40)?;
            w.write_se(-2)?;
            w.write_u(1, false)?;
            // L0[1]: chroma weights only
            w.write_u(1, false)?;
            w.write_u(1, true)?;
            w.write_se(7)?;
            w.write_se(1)?;
            w.write_se(9)?;
            w.write_se(-1)?;
            // L1[0]: nothing
            w.write_u(1, false)?;
            w.write_u(1, false)?;
            // slice_qp_delta
            w.write_se(0)?;
            Ok(())
        })
        .unwrap();

        let slice = slice_of(unit);
        assert_eq!(slice.slice_type, SliceType::B);
        assert!(slice.direct_spatial_mv_pred_flag);
        assert_eq!(slice.num_ref_idx_l0_active_minus1, 1);
        assert_eq!(slice.num_ref_idx_l1_active_minus1, 0);
        assert!(slice.ref_pic_list_modification_l0.is_empty());

        let pt = &slice.pred_weight_table;
        assert_eq!(pt.luma_log2_weight_denom, 5);
        assert_eq!(pt.chroma_log2_weight_denom, 3);
        assert_eq!(&pt.luma_weight_l0[..3], &[40, 32, 0]);
        assert_eq!(&pt.luma_offset_l0[..2], &[-2, 0]);
        assert_eq!(pt.chroma_weight_l0[0], [8, 8]);
        assert_eq!(pt.chroma_weight_l0[1], [7, 9]);
        assert_eq!(pt.chroma_offset_l0[1], [1, -1]);
        assert_eq!(pt.luma_weight_l1[0], 32);
        assert_eq!(pt.chroma_weight_l1[0], [8, 8]);
    }

    #[test]
    fn field_slices() {
        let mut parser = parser_with(
            |w| {
                w.write_u(8, 77u32)?;
                w.write_u(8, 0u32)?;
                w.write_u(8, 30u32)?;
                w.write_ue(0u32)?;
                // log2_max_frame_num_minus4 = 2
                w.write_ue(2u32)?;
                // pic_order_cnt_type = 1
                w.write_ue(1u32)?;
                w.write_u(1, false)?;
                w.write_se(0)?;
                w.write_se(0)?;
                w.write_ue(1u32)?;
                w.write_se(2)?;
                w.write_ue(2u32)?;
                w.write_u(1, false)?;
                w.write_ue(21u32)?;
                w.write_ue(17u32)?;
                // interlaced
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                w.write_u(1, true)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                Ok(())
            },
            |w| {
                w.write_ue(0u32)?;
                w.write_ue(0u32)?;
                w.write_u(1, false)?;
                // bottom_field_pic_order_in_frame_present_flag
                w.write_u(1, true)?;
                w.write_ue(0u32)?;
                // 20 default L0 references
                w.write_ue(19u32)?;
                w.write_ue(0u32)?;
                w.write_u(1, false)?;
                w.write_u(2, 0u32)?;
                w.write_se(0)?;
                w.write_se(0)?;
                w.write_se(0)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                // redundant_pic_cnt_present_flag
                w.write_u(1, true)?;
                Ok(())
            },
        );

        // A bottom field may use the 20 references.
        let unit = parse_unit(&mut parser, 0, 1, |w| {
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_u(6, 33u32)?;
            // field_pic_flag, bottom_field_flag
            w.write_u(1, true)?;
            w.write_u(1, true)?;
            // delta_pic_order_cnt[0] only
            w.write_se(-5)?;
            w.write_ue(3u32)?;
            w.write_u(1, false)?;
            w.write_u(1, false)?;
            w.write_se(0)?;
            Ok(())
        })
        .unwrap();

        let slice = slice_of(unit);
        assert_eq!(slice.frame_num, 33);
        assert!(slice.bottom_field_flag);
        assert_eq!(slice.max_pic_num, 128);
        assert_eq!(slice.delta_pic_order_cnt, [-5, 0]);
        assert_eq!(slice.redundant_pic_cnt, 3);
        assert_eq!(slice.num_ref_idx_l0_active_minus1, 19);

        // A frame may not, and it carries delta_pic_order_cnt[1].
        let err = parse_unit(&mut parser, 0, 1, |w| {
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_ue(0u32)?;
            w.write_u(6, 33u32)?;
            w.write_u(1, false)?;
            w.write_se(-5)?;
            w.write_se(4)?;
            w.write_ue(0u32)?;
            w.write_u(1, false)?;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(err.source.field, "num_ref_idx_l0_active_minus1");
        assert_eq!(
            err.source.kind,
            ParseErrorKind::OutOfRange {
                value: 19,
                min: 0,
                max: 15
            }
        );
    }

    #[test]
    fn slice_group_change_cycle() {
        assert_eq!(slice_group_change_cycle_bits(96, 32), 2);
        assert_eq!(slice_group_change_cycle_bits(100, 32), 3);
        assert_eq!(slice_group_change_cycle_bits(99, 8), 4);
        assert_eq!(slice_group_change_cycle_bits(1, 1), 1);
        assert_eq!(slice_group_change_cycle_bits(u64::from(u32::MAX), 1), 32);
        assert_eq!(slice_group_change_cycle_bits(1 << 32, 1), 33);

        let mut parser = parser_with(
            |w| test_streams::write_baseline_sps(w, 0),
            |w| {
                w.write_ue(0u32)?;
                w.write_ue(0u32)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                // Two groups, box-out with a rate of 7.
                w.write_ue(1u32)?;
                w.write_ue(3u32)?;
                w.write_u(1, false)?;
                w.write_ue(6u32)?;
                test_streams::write_pps_tail(w)
            },
        );

        // 80 map units, rate 7: Ceil(Log2(80 / 7 + 1)) = 4 bits.
        let unit = parse_unit(&mut parser, 0, 1, |w| {
            w.write_ue(0u32)?;
            w.write_ue(7u32)?;
            w.write_ue(0u32)?;
            w.write_u(4, 0u32)?;
            w.write_u(4, 0u32)?;
            w.write_se(0)?;
            w.write_ue(1u32)?;
            w.write_u(4, 11u32)?;
            Ok(())
        })
        .unwrap();

        assert_eq!(slice_of(unit).slice_group_change_cycle, 11);
    }

    #[test]
    fn slice_group_change_cycle_of_largest_picture() {
        let mut parser = parser_with(
            |w| {
                w.write_u(8, 66u32)?;
                w.write_u(8, 0u32)?;
                w.write_u(8, 30u32)?;
                w.write_ue(0u32)?;
                // 65536x65536 macroblocks: PicSizeInMapUnits = 2^32.
                test_streams::write_sps_tail(w, 65535, 65535)
            },
            |w| {
                w.write_ue(0u32)?;
                w.write_ue(0u32)?;
                w.write_u(1, false)?;
                w.write_u(1, false)?;
                // Two groups, box-out with a rate of 1.
                w.write_ue(1u32)?;
                w.write_ue(3u32)?;
                w.write_u(1, false)?;
                w.write_ue(0u32)?;
                test_streams::write_pps_tail(w)
            },
        );
        assert_eq!(parser.get_sps(0).unwrap().pic_size_in_map_units(), 1 << 32);

        fn write_slice(w: &mut Writer, cycle_high: u32, cycle_low: u32) -> NaluWriterResult<()> {
            w.write_ue(0u32)?;
            w.write_ue(7u32)?;
            w.write_ue(0u32)?;
            w.write_u(4, 0u32)?;
            w.write_u(4, 0u32)?;
            w.write_se(0)?;
            w.write_ue(1u32)?;
            // 33 bits.
            w.write_u(1, cycle_high)?;
            w.write_u(32, cycle_low)?;
            Ok(())
        }

        let unit = parse_unit(&mut parser, 0, 1, |w| write_slice(w, 1, 0)).unwrap();
        assert_eq!(slice_of(unit).slice_group_change_cycle, 1 << 32);

        let unit = parse_unit(&mut parser, 0, 1, |w| write_slice(w, 0, 12345)).unwrap();
        assert_eq!(slice_of(unit).slice_group_change_cycle, 12345);

        let err = parse_unit(&mut parser, 0, 1, |w| write_slice(w, 1, 1)).unwrap_err();
        assert_eq!(err.source.field, "slice_group_change_cycle");
        assert_eq!(
            err.source.kind,
            ParseErrorKind::OutOfRange {
                value: (1 << 32) + 1,
                min: 0,
                max: 1 << 32
            }
        );
    }

    #[test]
    fn slice_type_out_of_range() {
        let mut parser = baseline_parser();

        let err = parse_unit(&mut parser, 0, 1, |w| {
            w.write_ue(0u32)?;
            w.write_ue(10u32)
        })
        .unwrap_err();

        assert_eq!(err.source.structure, "slice_header");
        assert_eq!(err.source.field, "slice_type");
    }

    #[test]
    fn max_long_term_frame_idx() {
        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(0),
            MaxLongTermFrameIdx::NoLongTermFrameIndices
        );
        assert_eq!(
            MaxLongTermFrameIdx::NoLongTermFrameIndices.to_value_plus1(),
            0
        );

        assert_eq!(
            MaxLongTermFrameIdx::from_value_plus1(25),
            MaxLongTermFrameIdx::Idx(24)
        );
        assert_eq!(MaxLongTermFrameIdx::Idx(24).to_value_plus1(), 25);

        let mut max_long_term_frame_idx = MaxLongTermFrameIdx::NoLongTermFrameIndices;
        assert!(max_long_term_frame_idx != 0);
        assert!(max_long_term_frame_idx != 0);
        assert!(max_long_term_frame_idx != 1);
        assert!(max_long_term_frame_idx != 25);
        assert!(max_long_term_frame_idx < 0);
        assert!(max_long_term_frame_idx < 25);
        assert!(max_long_term_frame_idx < u32::MAX);

        max_long_term_frame_idx = MaxLongTermFrameIdx::Idx(25);
        assert!(max_long_term_frame_idx != 0);
        assert!(max_long_term_frame_idx != 1);
        assert!(max_long_term_frame_idx == 25);
        assert!(max_long_term_frame_idx > 0);
        assert!(max_long_term_frame_idx > 24);
        assert!(max_long_term_frame_idx <= 25);
        assert!(max_long_term_frame_idx < 26);
    }
}
