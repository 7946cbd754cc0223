// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameter set parsing and the per-stream parser state.

// Can't reasonably expect client code to consume everything that has been parsed.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::rc::Rc;

use enumn::N;
use log::debug;
use log::warn;
use thiserror::Error;

use crate::bitstream_utils::BitPosition;
use crate::bitstream_utils::NalIterator;
use crate::codec::h264::extractor::RawNalu;
use crate::codec::h264::nalu::NaluHeader;
use crate::codec::h264::nalu::NaluType;
use crate::codec::h264::rbsp;
use crate::codec::h264::slice::SliceHeader;
use crate::codec::h264::svc::PrefixNalUnit;
use crate::codec::h264::svc::ScalableSliceHeader;
use crate::codec::h264::svc::SpsSvcExtension;
use crate::codec::h264::svc::SubsetSps;
use crate::codec::h264::syntax::ParameterSetKind;
use crate::codec::h264::syntax::ParseError;
use crate::codec::h264::syntax::ParseErrorKind;
use crate::codec::h264::syntax::ParseResult;
use crate::codec::h264::syntax::SyntaxReader;

pub const DEFAULT_4X4_INTRA: [u8; 16] = [
    6, 13, 13, 20, 20, 20, 28, 28, 28, 28, 32, 32, 32, 37, 37, 42,
];

pub const DEFAULT_4X4_INTER: [u8; 16] = [
    10, 14, 14, 20, 20, 20, 24, 24, 24, 24, 27, 27, 27, 30, 30, 34,
];

pub const DEFAULT_8X8_INTRA: [u8; 64] = [
    6, 10, 10, 13, 11, 13, 16, 16, 16, 16, 18, 18, 18, 18, 18, 23, 23, 23, 23, 23, 23, 25, 25, 25,
    25, 25, 25, 25, 27, 27, 27, 27, 27, 27, 27, 27, 29, 29, 29, 29, 29, 29, 29, 31, 31, 31, 31, 31,
    31, 33, 33, 33, 33, 33, 36, 36, 36, 36, 38, 38, 38, 40, 40, 42,
];

pub const DEFAULT_8X8_INTER: [u8; 64] = [
    9, 13, 13, 15, 13, 15, 17, 17, 17, 17, 19, 19, 19, 19, 19, 21, 21, 21, 21, 21, 21, 22, 22, 22,
    22, 22, 22, 22, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 27, 27, 27, 27, 27,
    27, 28, 28, 28, 28, 28, 30, 30, 30, 30, 32, 32, 32, 33, 33, 35,
];

/// Flat_4x4_16 and Flat_8x8_16.
const FLAT_SCALE: u8 = 16;

pub const MAX_SPS_ID: u32 = 31;
pub const MAX_PPS_ID: u32 = 255;

/// aspect_ratio_idc value signalling an explicit sample aspect ratio.
const EXTENDED_SAR: u8 = 255;

/// The PPS cannot see the SPS it refers to, so the chroma format used to
/// size its scaling list loop is fixed to 4:2:0.
const PPS_ASSUMED_CHROMA_FORMAT_IDC: u8 = 1;

/// Lowest pic_init_qp_minus26, i.e. -(26 + QpBdOffsetY) at the largest
/// allowed luma bit depth.
const MIN_PIC_INIT_QP_MINUS26: i32 = -(26 + 6 * 6);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect<T> {
    pub min: Point<T>,
    pub max: Point<T>,
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Profile {
    Cavlc444 = 44,
    Baseline = 66,
    Main = 77,
    ScalableBaseline = 83,
    ScalableHigh = 86,
    Extended = 88,
    High = 100,
    High10 = 110,
    MultiviewHigh = 118,
    High422P = 122,
    StereoHigh = 128,
    MfcHigh = 134,
    MfcDepthHigh = 135,
    MultiviewDepthHigh = 138,
    EnhancedMultiviewDepthHigh = 139,
    High444P = 244,
}

impl Profile {
    /// Whether SPSs of this profile carry chroma format, bit depth and
    /// scaling matrix syntax.
    pub fn has_chroma_info(profile_idc: u8) -> bool {
        matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        )
    }
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    #[default]
    L1 = 10,
    L1B = 9,
    L1_1 = 11,
    L1_2 = 12,
    L1_3 = 13,
    L2_0 = 20,
    L2_1 = 21,
    L2_2 = 22,
    L3 = 30,
    L3_1 = 31,
    L3_2 = 32,
    L4 = 40,
    L4_1 = 41,
    L4_2 = 42,
    L5 = 50,
    L5_1 = 51,
    L5_2 = 52,
    L6 = 60,
    L6_1 = 61,
    L6_2 = 62,
}

/// `seq_parameter_set_data()`, 7.3.2.1.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,

    pub constraint_set0_flag: bool,
    pub constraint_set1_flag: bool,
    pub constraint_set2_flag: bool,
    pub constraint_set3_flag: bool,
    pub constraint_set4_flag: bool,
    pub constraint_set5_flag: bool,
    pub reserved_zero_2bits: u8,

    /// Kept as coded. See [`Sps::level`].
    pub level_idc: u8,

    pub seq_parameter_set_id: u8,

    /// 4:2:0 (1) unless coded.
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub qpprime_y_zero_transform_bypass_flag: bool,

    pub seq_scaling_matrix_present_flag: bool,
    pub seq_scaling_list_present_flag: [bool; 12],
    pub use_default_scaling_matrix_4x4: [bool; 6],
    pub use_default_scaling_matrix_8x8: [bool; 6],
    /// Effective lists: flat when no matrix is coded, after Table 7-2
    /// fallback otherwise.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    pub scaling_lists_8x8: [[u8; 64]; 6],

    pub log2_max_frame_num_minus4: u8,

    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub num_ref_frames_in_pic_order_cnt_cycle: u8,
    pub offset_for_ref_frame: [i32; 255],
    // Calculated
    pub expected_delta_per_pic_order_cnt_cycle: i32,

    pub max_num_ref_frames: u8,
    pub gaps_in_frame_num_value_allowed_flag: bool,

    pub pic_width_in_mbs_minus1: u16,
    pub pic_height_in_map_units_minus1: u16,

    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,

    pub frame_cropping_flag: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,

    pub vui_parameters_present_flag: bool,
    pub vui_parameters: VuiParams,
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            profile_idc: 0,
            constraint_set0_flag: false,
            constraint_set1_flag: false,
            constraint_set2_flag: false,
            constraint_set3_flag: false,
            constraint_set4_flag: false,
            constraint_set5_flag: false,
            reserved_zero_2bits: 0,
            level_idc: Level::default() as u8,
            seq_parameter_set_id: 0,
            chroma_format_idc: 1,
            separate_colour_plane_flag: false,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            qpprime_y_zero_transform_bypass_flag: false,
            seq_scaling_matrix_present_flag: false,
            seq_scaling_list_present_flag: [false; 12],
            use_default_scaling_matrix_4x4: [false; 6],
            use_default_scaling_matrix_8x8: [false; 6],
            scaling_lists_4x4: [[FLAT_SCALE; 16]; 6],
            scaling_lists_8x8: [[FLAT_SCALE; 64]; 6],
            log2_max_frame_num_minus4: 0,
            pic_order_cnt_type: 0,
            log2_max_pic_order_cnt_lsb_minus4: 0,
            delta_pic_order_always_zero_flag: false,
            offset_for_non_ref_pic: 0,
            offset_for_top_to_bottom_field: 0,
            num_ref_frames_in_pic_order_cnt_cycle: 0,
            offset_for_ref_frame: [0; 255],
            expected_delta_per_pic_order_cnt_cycle: 0,
            max_num_ref_frames: 0,
            gaps_in_frame_num_value_allowed_flag: false,
            pic_width_in_mbs_minus1: 0,
            pic_height_in_map_units_minus1: 0,
            frame_mbs_only_flag: false,
            mb_adaptive_frame_field_flag: false,
            direct_8x8_inference_flag: false,
            frame_cropping_flag: false,
            frame_crop_left_offset: 0,
            frame_crop_right_offset: 0,
            frame_crop_top_offset: 0,
            frame_crop_bottom_offset: 0,
            vui_parameters_present_flag: false,
            vui_parameters: Default::default(),
        }
    }
}

impl Sps {
    pub const fn width(&self) -> u32 {
        (self.pic_width_in_mbs_minus1 as u32 + 1) * 16
    }

    pub const fn height(&self) -> u32 {
        (self.pic_height_in_map_units_minus1 as u32 + 1)
            * 16
            * (2 - self.frame_mbs_only_flag as u32)
    }

    pub const fn chroma_array_type(&self) -> u8 {
        match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        }
    }

    /// The level, or `None` for a `level_idc` outside of Table A-1.
    pub fn level(&self) -> Option<Level> {
        Level::n(self.level_idc)
    }

    pub fn max_frame_num(&self) -> u32 {
        1 << (self.log2_max_frame_num_minus4 + 4)
    }

    pub fn max_pic_order_cnt_lsb(&self) -> u32 {
        1 << (self.log2_max_pic_order_cnt_lsb_minus4 + 4)
    }

    /// PicSizeInMapUnits. Up to 2^32 for the largest coded sizes.
    pub fn pic_size_in_map_units(&self) -> u64 {
        (u64::from(self.pic_width_in_mbs_minus1) + 1)
            * (u64::from(self.pic_height_in_map_units_minus1) + 1)
    }

    fn sub_width_height_c(&self) -> (u32, u32) {
        match (self.chroma_format_idc, self.separate_colour_plane_flag) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            (3, false) => (1, 1),
            // undefined.
            _ => (1, 1),
        }
    }

    fn crop_unit_x_y(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            0 => (1, 2 - u32::from(self.frame_mbs_only_flag)),
            _ => {
                let (sub_width_c, sub_height_c) = self.sub_width_height_c();
                (
                    sub_width_c,
                    sub_height_c * (2 - u32::from(self.frame_mbs_only_flag)),
                )
            }
        }
    }

    /// The cropped output area. Cropping offsets are validated at parse
    /// time, so the rectangle always fits in the coded size.
    pub fn visible_rectangle(&self) -> Rect<u32> {
        if !self.frame_cropping_flag {
            return Rect {
                min: Point { x: 0, y: 0 },
                max: Point {
                    x: self.width(),
                    y: self.height(),
                },
            };
        }

        let (crop_unit_x, crop_unit_y) = self.crop_unit_x_y();

        let crop_left = crop_unit_x * self.frame_crop_left_offset;
        let crop_right = crop_unit_x * self.frame_crop_right_offset;
        let crop_top = crop_unit_y * self.frame_crop_top_offset;
        let crop_bottom = crop_unit_y * self.frame_crop_bottom_offset;

        Rect {
            min: Point {
                x: crop_left,
                y: crop_top,
            },
            max: Point {
                x: self.width() - crop_right,
                y: self.height() - crop_bottom,
            },
        }
    }

    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("seq_parameter_set_data");

        let mut sps = Sps {
            profile_idc: r.u(8, "profile_idc")?,
            constraint_set0_flag: r.flag("constraint_set0_flag")?,
            constraint_set1_flag: r.flag("constraint_set1_flag")?,
            constraint_set2_flag: r.flag("constraint_set2_flag")?,
            constraint_set3_flag: r.flag("constraint_set3_flag")?,
            constraint_set4_flag: r.flag("constraint_set4_flag")?,
            constraint_set5_flag: r.flag("constraint_set5_flag")?,
            reserved_zero_2bits: r.u(2, "reserved_zero_2bits")?,
            level_idc: r.u(8, "level_idc")?,
            seq_parameter_set_id: r.ue_max("seq_parameter_set_id", MAX_SPS_ID)?,
            ..Default::default()
        };

        if Profile::has_chroma_info(sps.profile_idc) {
            sps.chroma_format_idc = r.ue_max("chroma_format_idc", 3)?;
            if sps.chroma_format_idc == 3 {
                sps.separate_colour_plane_flag = r.flag("separate_colour_plane_flag")?;
            }

            sps.bit_depth_luma_minus8 = r.ue_max("bit_depth_luma_minus8", 6)?;
            sps.bit_depth_chroma_minus8 = r.ue_max("bit_depth_chroma_minus8", 6)?;
            sps.qpprime_y_zero_transform_bypass_flag =
                r.flag("qpprime_y_zero_transform_bypass_flag")?;
            sps.seq_scaling_matrix_present_flag = r.flag("seq_scaling_matrix_present_flag")?;

            if sps.seq_scaling_matrix_present_flag {
                parse_sps_scaling_lists(r, &mut sps)?;
            }
        }

        sps.log2_max_frame_num_minus4 = r.ue_max("log2_max_frame_num_minus4", 12)?;

        sps.pic_order_cnt_type = r.ue_max("pic_order_cnt_type", 2)?;
        if sps.pic_order_cnt_type == 0 {
            sps.log2_max_pic_order_cnt_lsb_minus4 =
                r.ue_max("log2_max_pic_order_cnt_lsb_minus4", 12)?;
        } else if sps.pic_order_cnt_type == 1 {
            sps.delta_pic_order_always_zero_flag = r.flag("delta_pic_order_always_zero_flag")?;
            sps.offset_for_non_ref_pic = r.se("offset_for_non_ref_pic")?;
            sps.offset_for_top_to_bottom_field = r.se("offset_for_top_to_bottom_field")?;
            sps.num_ref_frames_in_pic_order_cnt_cycle =
                r.ue_max("num_ref_frames_in_pic_order_cnt_cycle", 254)?;

            let num = usize::from(sps.num_ref_frames_in_pic_order_cnt_cycle);
            for offset in &mut sps.offset_for_ref_frame[..num] {
                *offset = r.se("offset_for_ref_frame")?;
                sps.expected_delta_per_pic_order_cnt_cycle =
                    sps.expected_delta_per_pic_order_cnt_cycle.wrapping_add(*offset);
            }
        }

        sps.max_num_ref_frames = r.ue_max("max_num_ref_frames", 16)?;
        sps.gaps_in_frame_num_value_allowed_flag =
            r.flag("gaps_in_frame_num_value_allowed_flag")?;
        sps.pic_width_in_mbs_minus1 =
            r.ue_max("pic_width_in_mbs_minus1", u32::from(u16::MAX))?;
        sps.pic_height_in_map_units_minus1 =
            r.ue_max("pic_height_in_map_units_minus1", u32::from(u16::MAX))?;

        sps.frame_mbs_only_flag = r.flag("frame_mbs_only_flag")?;
        if !sps.frame_mbs_only_flag {
            sps.mb_adaptive_frame_field_flag = r.flag("mb_adaptive_frame_field_flag")?;
        }

        sps.direct_8x8_inference_flag = r.flag("direct_8x8_inference_flag")?;

        sps.frame_cropping_flag = r.flag("frame_cropping_flag")?;
        if sps.frame_cropping_flag {
            sps.frame_crop_left_offset = r.ue("frame_crop_left_offset")?;
            sps.frame_crop_right_offset = r.ue("frame_crop_right_offset")?;
            sps.frame_crop_top_offset = r.ue("frame_crop_top_offset")?;
            sps.frame_crop_bottom_offset = r.ue("frame_crop_bottom_offset")?;

            sps.check_cropping(r)?;
        }

        sps.vui_parameters_present_flag = r.flag("vui_parameters_present_flag")?;
        if sps.vui_parameters_present_flag {
            sps.vui_parameters = VuiParams::parse(r)?;
        }

        r.leave(outer);
        Ok(sps)
    }

    /// The cropped area must keep at least one sample in each dimension.
    fn check_cropping(&self, r: &SyntaxReader) -> ParseResult<()> {
        let (crop_unit_x, crop_unit_y) = self.crop_unit_x_y();

        let checks = [
            (
                "frame_crop_right_offset",
                self.frame_crop_left_offset,
                self.frame_crop_right_offset,
                crop_unit_x,
                self.width(),
            ),
            (
                "frame_crop_bottom_offset",
                self.frame_crop_top_offset,
                self.frame_crop_bottom_offset,
                crop_unit_y,
                self.height(),
            ),
        ];

        for (field, first, second, unit, size) in checks {
            let cropped = (u64::from(first) + u64::from(second)) * u64::from(unit);
            if cropped >= u64::from(size) {
                return Err(r.error(
                    field,
                    ParseErrorKind::OutOfRange {
                        value: i64::try_from(cropped).unwrap_or(i64::MAX),
                        min: 0,
                        max: i64::from(size) - 1,
                    },
                ));
            }
        }

        Ok(())
    }
}

/// `hrd_parameters()`, E.1.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HrdParams {
    pub cpb_cnt_minus1: u8,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,

    pub bit_rate_value_minus1: [u32; 32],
    pub cpb_size_value_minus1: [u32; 32],
    pub cbr_flag: [bool; 32],

    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
}

impl HrdParams {
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("hrd_parameters");

        let mut hrd = HrdParams {
            cpb_cnt_minus1: r.ue_max("cpb_cnt_minus1", 31)?,
            bit_rate_scale: r.u(4, "bit_rate_scale")?,
            cpb_size_scale: r.u(4, "cpb_size_scale")?,
            ..Default::default()
        };

        for sched_sel_idx in 0..=usize::from(hrd.cpb_cnt_minus1) {
            hrd.bit_rate_value_minus1[sched_sel_idx] =
                r.ue_max("bit_rate_value_minus1", u32::MAX - 1)?;
            hrd.cpb_size_value_minus1[sched_sel_idx] =
                r.ue_max("cpb_size_value_minus1", u32::MAX - 1)?;
            hrd.cbr_flag[sched_sel_idx] = r.flag("cbr_flag")?;
        }

        hrd.initial_cpb_removal_delay_length_minus1 =
            r.u(5, "initial_cpb_removal_delay_length_minus1")?;
        hrd.cpb_removal_delay_length_minus1 = r.u(5, "cpb_removal_delay_length_minus1")?;
        hrd.dpb_output_delay_length_minus1 = r.u(5, "dpb_output_delay_length_minus1")?;
        hrd.time_offset_length = r.u(5, "time_offset_length")?;

        r.leave(outer);
        Ok(hrd)
    }
}

/// `vui_parameters()`, E.1.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VuiParams {
    pub aspect_ratio_info_present_flag: bool,
    pub aspect_ratio_idc: u8,
    pub sar_width: u16,
    pub sar_height: u16,

    pub overscan_info_present_flag: bool,
    pub overscan_appropriate_flag: bool,

    pub video_signal_type_present_flag: bool,
    /// 5 (unspecified) unless coded.
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    /// 2 (unspecified) unless coded, like the two fields below.
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,

    pub chroma_loc_info_present_flag: bool,
    pub chroma_sample_loc_type_top_field: u8,
    pub chroma_sample_loc_type_bottom_field: u8,

    pub timing_info_present_flag: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,

    pub nal_hrd_parameters_present_flag: bool,
    pub nal_hrd_parameters: HrdParams,
    pub vcl_hrd_parameters_present_flag: bool,
    pub vcl_hrd_parameters: HrdParams,
    pub low_delay_hrd_flag: bool,

    pub pic_struct_present_flag: bool,

    pub bitstream_restriction_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

impl Default for VuiParams {
    fn default() -> Self {
        Self {
            aspect_ratio_info_present_flag: false,
            aspect_ratio_idc: 0,
            sar_width: 0,
            sar_height: 0,
            overscan_info_present_flag: false,
            overscan_appropriate_flag: false,
            video_signal_type_present_flag: false,
            video_format: 5,
            video_full_range_flag: false,
            colour_description_present_flag: false,
            colour_primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
            chroma_loc_info_present_flag: false,
            chroma_sample_loc_type_top_field: 0,
            chroma_sample_loc_type_bottom_field: 0,
            timing_info_present_flag: false,
            num_units_in_tick: 0,
            time_scale: 0,
            fixed_frame_rate_flag: false,
            nal_hrd_parameters_present_flag: false,
            nal_hrd_parameters: Default::default(),
            vcl_hrd_parameters_present_flag: false,
            vcl_hrd_parameters: Default::default(),
            low_delay_hrd_flag: false,
            pic_struct_present_flag: false,
            bitstream_restriction_flag: false,
            motion_vectors_over_pic_boundaries_flag: false,
            max_bytes_per_pic_denom: 0,
            max_bits_per_mb_denom: 0,
            log2_max_mv_length_horizontal: 0,
            log2_max_mv_length_vertical: 0,
            max_num_reorder_frames: 0,
            max_dec_frame_buffering: 0,
        }
    }
}

impl VuiParams {
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("vui_parameters");
        let mut vui = VuiParams::default();

        vui.aspect_ratio_info_present_flag = r.flag("aspect_ratio_info_present_flag")?;
        if vui.aspect_ratio_info_present_flag {
            vui.aspect_ratio_idc = r.u(8, "aspect_ratio_idc")?;
            if vui.aspect_ratio_idc == EXTENDED_SAR {
                vui.sar_width = r.u(16, "sar_width")?;
                vui.sar_height = r.u(16, "sar_height")?;
            }
        }

        vui.overscan_info_present_flag = r.flag("overscan_info_present_flag")?;
        if vui.overscan_info_present_flag {
            vui.overscan_appropriate_flag = r.flag("overscan_appropriate_flag")?;
        }

        vui.video_signal_type_present_flag = r.flag("video_signal_type_present_flag")?;
        if vui.video_signal_type_present_flag {
            vui.video_format = r.u(3, "video_format")?;
            vui.video_full_range_flag = r.flag("video_full_range_flag")?;
            vui.colour_description_present_flag = r.flag("colour_description_present_flag")?;
            if vui.colour_description_present_flag {
                vui.colour_primaries = r.u(8, "colour_primaries")?;
                vui.transfer_characteristics = r.u(8, "transfer_characteristics")?;
                vui.matrix_coefficients = r.u(8, "matrix_coefficients")?;
            }
        }

        vui.chroma_loc_info_present_flag = r.flag("chroma_loc_info_present_flag")?;
        if vui.chroma_loc_info_present_flag {
            vui.chroma_sample_loc_type_top_field =
                r.ue_max("chroma_sample_loc_type_top_field", 5)?;
            vui.chroma_sample_loc_type_bottom_field =
                r.ue_max("chroma_sample_loc_type_bottom_field", 5)?;
        }

        vui.timing_info_present_flag = r.flag("timing_info_present_flag")?;
        if vui.timing_info_present_flag {
            vui.num_units_in_tick = r.u_range(32, "num_units_in_tick", 1, u32::MAX)?;
            vui.time_scale = r.u_range(32, "time_scale", 1, u32::MAX)?;
            vui.fixed_frame_rate_flag = r.flag("fixed_frame_rate_flag")?;
        }

        vui.nal_hrd_parameters_present_flag = r.flag("nal_hrd_parameters_present_flag")?;
        if vui.nal_hrd_parameters_present_flag {
            vui.nal_hrd_parameters = HrdParams::parse(r)?;
        }

        vui.vcl_hrd_parameters_present_flag = r.flag("vcl_hrd_parameters_present_flag")?;
        if vui.vcl_hrd_parameters_present_flag {
            vui.vcl_hrd_parameters = HrdParams::parse(r)?;
        }

        if vui.nal_hrd_parameters_present_flag || vui.vcl_hrd_parameters_present_flag {
            vui.low_delay_hrd_flag = r.flag("low_delay_hrd_flag")?;
        }

        vui.pic_struct_present_flag = r.flag("pic_struct_present_flag")?;

        vui.bitstream_restriction_flag = r.flag("bitstream_restriction_flag")?;
        if vui.bitstream_restriction_flag {
            vui.motion_vectors_over_pic_boundaries_flag =
                r.flag("motion_vectors_over_pic_boundaries_flag")?;
            vui.max_bytes_per_pic_denom = r.ue_max("max_bytes_per_pic_denom", 16)?;
            vui.max_bits_per_mb_denom = r.ue_max("max_bits_per_mb_denom", 16)?;
            vui.log2_max_mv_length_horizontal = r.ue_max("log2_max_mv_length_horizontal", 16)?;
            vui.log2_max_mv_length_vertical = r.ue_max("log2_max_mv_length_vertical", 16)?;
            vui.max_num_reorder_frames = r.ue("max_num_reorder_frames")?;
            vui.max_dec_frame_buffering = r.ue("max_dec_frame_buffering")?;
        }

        r.leave(outer);
        Ok(vui)
    }
}

/// `pic_parameter_set_rbsp()`, 7.3.2.2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,

    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,

    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    /// Type 0, one entry per slice group.
    pub run_length_minus1: [u32; 8],
    /// Type 2, one entry per slice group but the last.
    pub top_left: [u32; 8],
    pub bottom_right: [u32; 8],
    /// Types 3 to 5.
    pub slice_group_change_direction_flag: bool,
    pub slice_group_change_rate_minus1: u32,
    /// Type 6.
    pub pic_size_in_map_units_minus1: u32,
    pub slice_group_id: Vec<u8>,

    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,

    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,

    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,

    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,

    pub transform_8x8_mode_flag: bool,

    pub pic_scaling_matrix_present_flag: bool,
    pub pic_scaling_list_present_flag: [bool; 12],
    pub use_default_scaling_matrix_4x4: [bool; 6],
    pub use_default_scaling_matrix_8x8: [bool; 6],
    /// Lists as coded, with lists that are not coded filled per fall-back
    /// rule A. Use [`Pps::scaling_lists`] for the lists in effect.
    pub scaling_lists_4x4: [[u8; 16]; 6],
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Equal to `chroma_qp_index_offset` unless coded.
    pub second_chroma_qp_index_offset: i8,
}

impl Default for Pps {
    fn default() -> Self {
        Self {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            entropy_coding_mode_flag: false,
            bottom_field_pic_order_in_frame_present_flag: false,
            num_slice_groups_minus1: 0,
            slice_group_map_type: 0,
            run_length_minus1: [0; 8],
            top_left: [0; 8],
            bottom_right: [0; 8],
            slice_group_change_direction_flag: false,
            slice_group_change_rate_minus1: 0,
            pic_size_in_map_units_minus1: 0,
            slice_group_id: Vec::new(),
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present_flag: false,
            constrained_intra_pred_flag: false,
            redundant_pic_cnt_present_flag: false,
            transform_8x8_mode_flag: false,
            pic_scaling_matrix_present_flag: false,
            pic_scaling_list_present_flag: [false; 12],
            use_default_scaling_matrix_4x4: [false; 6],
            use_default_scaling_matrix_8x8: [false; 6],
            scaling_lists_4x4: [[FLAT_SCALE; 16]; 6],
            scaling_lists_8x8: [[FLAT_SCALE; 64]; 6],
            second_chroma_qp_index_offset: 0,
        }
    }
}

impl Pps {
    /// SliceGroupChangeRate.
    pub fn slice_group_change_rate(&self) -> u32 {
        self.slice_group_change_rate_minus1.saturating_add(1)
    }

    /// Whether slices of this PPS carry `slice_group_change_cycle`.
    pub fn has_slice_group_change_cycle(&self) -> bool {
        self.num_slice_groups_minus1 > 0 && (3..=5).contains(&self.slice_group_map_type)
    }

    /// The scaling lists in effect for pictures using this PPS and `sps`.
    ///
    /// Without a picture-level matrix the sequence-level lists apply. With
    /// one, lists that were not coded fall back per rule A of Table 7-2 when
    /// the SPS has no matrix, and per rule B when it does.
    pub fn scaling_lists(&self, sps: &Sps) -> ([[u8; 16]; 6], [[u8; 64]; 6]) {
        if !self.pic_scaling_matrix_present_flag {
            return (sps.scaling_lists_4x4, sps.scaling_lists_8x8);
        }

        if !sps.seq_scaling_matrix_present_flag {
            return (self.scaling_lists_4x4, self.scaling_lists_8x8);
        }

        let mut lists_4x4 = self.scaling_lists_4x4;
        let mut lists_8x8 = self.scaling_lists_8x8;

        for i in 0..6 {
            if !self.pic_scaling_list_present_flag[i] {
                fill_fallback_scaling_list_4x4(&mut lists_4x4, i, Some(&sps.scaling_lists_4x4));
            }
        }

        for i in 0..6 {
            if !self.pic_scaling_list_present_flag[6 + i] {
                fill_fallback_scaling_list_8x8(&mut lists_8x8, i, Some(&sps.scaling_lists_8x8));
            }
        }

        (lists_4x4, lists_8x8)
    }

    /// Parses a PPS. The SPS it refers to is not needed: the few fields that
    /// depend on it are read under a 4:2:0 assumption.
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("pic_parameter_set_rbsp");

        let mut pps = Pps {
            pic_parameter_set_id: r.ue_max("pic_parameter_set_id", MAX_PPS_ID)?,
            seq_parameter_set_id: r.ue_max("seq_parameter_set_id", MAX_SPS_ID)?,
            entropy_coding_mode_flag: r.flag("entropy_coding_mode_flag")?,
            bottom_field_pic_order_in_frame_present_flag: r
                .flag("bottom_field_pic_order_in_frame_present_flag")?,
            num_slice_groups_minus1: r.ue_max("num_slice_groups_minus1", 7)?,
            ..Default::default()
        };

        if pps.num_slice_groups_minus1 > 0 {
            parse_slice_groups(r, &mut pps)?;
        }

        pps.num_ref_idx_l0_default_active_minus1 =
            r.ue_max("num_ref_idx_l0_default_active_minus1", 31)?;
        pps.num_ref_idx_l1_default_active_minus1 =
            r.ue_max("num_ref_idx_l1_default_active_minus1", 31)?;

        pps.weighted_pred_flag = r.flag("weighted_pred_flag")?;
        pps.weighted_bipred_idc = r.u_range(2, "weighted_bipred_idc", 0, 2)? as u8;

        pps.pic_init_qp_minus26 = r.se_range("pic_init_qp_minus26", MIN_PIC_INIT_QP_MINUS26, 25)?;
        pps.pic_init_qs_minus26 = r.se_range("pic_init_qs_minus26", -26, 25)?;
        pps.chroma_qp_index_offset = r.se_range("chroma_qp_index_offset", -12, 12)?;

        pps.deblocking_filter_control_present_flag =
            r.flag("deblocking_filter_control_present_flag")?;
        pps.constrained_intra_pred_flag = r.flag("constrained_intra_pred_flag")?;
        pps.redundant_pic_cnt_present_flag = r.flag("redundant_pic_cnt_present_flag")?;

        if r.has_more_rbsp_data() {
            pps.transform_8x8_mode_flag = r.flag("transform_8x8_mode_flag")?;
            pps.pic_scaling_matrix_present_flag = r.flag("pic_scaling_matrix_present_flag")?;

            if pps.pic_scaling_matrix_present_flag {
                parse_pps_scaling_lists(r, &mut pps)?;
            }

            pps.second_chroma_qp_index_offset =
                r.se_range("second_chroma_qp_index_offset", -12, 12)?;
        } else {
            pps.second_chroma_qp_index_offset = pps.chroma_qp_index_offset;
        }

        r.leave(outer);
        Ok(pps)
    }
}

fn parse_slice_groups(r: &mut SyntaxReader, pps: &mut Pps) -> ParseResult<()> {
    let num_groups = usize::from(pps.num_slice_groups_minus1) + 1;

    pps.slice_group_map_type = r.ue_max("slice_group_map_type", 6)?;
    match pps.slice_group_map_type {
        0 => {
            for run_length in &mut pps.run_length_minus1[..num_groups] {
                *run_length = r.ue("run_length_minus1")?;
            }
        }
        2 => {
            for group in 0..num_groups - 1 {
                let top_left = r.ue("top_left")?;
                let bottom_right = r.ue("bottom_right")?;
                r.check("bottom_right", bottom_right, top_left, u32::MAX)?;

                pps.top_left[group] = top_left;
                pps.bottom_right[group] = bottom_right;
            }
        }
        3..=5 => {
            pps.slice_group_change_direction_flag = r.flag("slice_group_change_direction_flag")?;
            pps.slice_group_change_rate_minus1 = r.ue("slice_group_change_rate_minus1")?;
        }
        6 => {
            pps.pic_size_in_map_units_minus1 = r.ue("pic_size_in_map_units_minus1")?;

            // Ceil(Log2(num_slice_groups_minus1 + 1))
            let id_bits = (u8::BITS - pps.num_slice_groups_minus1.leading_zeros()) as usize;
            let num_ids = u64::from(pps.pic_size_in_map_units_minus1) + 1;

            // Refuse to allocate for ids that cannot be there.
            if num_ids * id_bits as u64 > r.num_bits_left() as u64 {
                return Err(r.error("slice_group_id", ParseErrorKind::InsufficientData));
            }

            pps.slice_group_id = Vec::with_capacity(num_ids as usize);
            for _ in 0..num_ids {
                let id = r.u_range(
                    id_bits,
                    "slice_group_id",
                    0,
                    u32::from(pps.num_slice_groups_minus1),
                )?;
                pps.slice_group_id.push(id as u8);
            }
        }
        // 1: dispersed, nothing to read.
        _ => (),
    }

    Ok(())
}

fn default_scaling_list_4x4(i: usize) -> [u8; 16] {
    if i < 3 {
        DEFAULT_4X4_INTRA
    } else {
        DEFAULT_4X4_INTER
    }
}

fn default_scaling_list_8x8(i: usize) -> [u8; 64] {
    if i % 2 == 0 {
        DEFAULT_8X8_INTRA
    } else {
        DEFAULT_8X8_INTER
    }
}

/// Fills list `i` of a set that did not code it, per Table 7-2. `base` holds
/// the sequence-level lists for fall-back rule B; rule A applies without it.
fn fill_fallback_scaling_list_4x4(
    lists: &mut [[u8; 16]; 6],
    i: usize,
    base: Option<&[[u8; 16]; 6]>,
) {
    lists[i] = match (i, base) {
        (0 | 3, Some(base)) => base[i],
        (0 | 3, None) => default_scaling_list_4x4(i),
        _ => lists[i - 1],
    };
}

fn fill_fallback_scaling_list_8x8(
    lists: &mut [[u8; 64]; 6],
    i: usize,
    base: Option<&[[u8; 64]; 6]>,
) {
    lists[i] = match (i, base) {
        (0 | 1, Some(base)) => base[i],
        (0 | 1, None) => default_scaling_list_8x8(i),
        _ => lists[i - 2],
    };
}

/// `scaling_list()`, 7.3.2.1.1.1. Returns `useDefaultScalingMatrixFlag`;
/// `list` is only meaningful when it is false.
fn parse_scaling_list(r: &mut SyntaxReader, list: &mut [u8]) -> ParseResult<bool> {
    let mut last_scale = 8u8;
    let mut next_scale = 8u8;

    for (j, entry) in list.iter_mut().enumerate() {
        if next_scale != 0 {
            let delta_scale: i32 = r.se_range("delta_scale", -128, 127)?;
            next_scale = ((i32::from(last_scale) + delta_scale + 256) % 256) as u8;

            if j == 0 && next_scale == 0 {
                return Ok(true);
            }
        }

        *entry = if next_scale == 0 {
            last_scale
        } else {
            next_scale
        };
        last_scale = *entry;
    }

    Ok(false)
}

/// Reads `count` lists, the first six 4x4 and the rest 8x8, filling the ones
/// that are not coded per fall-back rule A.
#[allow(clippy::too_many_arguments)]
fn parse_scaling_lists(
    r: &mut SyntaxReader,
    count: usize,
    present_field: &'static str,
    present: &mut [bool; 12],
    use_default_4x4: &mut [bool; 6],
    use_default_8x8: &mut [bool; 6],
    lists_4x4: &mut [[u8; 16]; 6],
    lists_8x8: &mut [[u8; 64]; 6],
) -> ParseResult<()> {
    let outer = r.enter("scaling_list");

    for i in 0..12 {
        present[i] = i < count && r.flag(present_field)?;

        if i < 6 {
            if !present[i] {
                fill_fallback_scaling_list_4x4(lists_4x4, i, None);
            } else if parse_scaling_list(r, &mut lists_4x4[i])? {
                use_default_4x4[i] = true;
                lists_4x4[i] = default_scaling_list_4x4(i);
            }
        } else {
            let i = i - 6;
            if !present[6 + i] {
                fill_fallback_scaling_list_8x8(lists_8x8, i, None);
            } else if parse_scaling_list(r, &mut lists_8x8[i])? {
                use_default_8x8[i] = true;
                lists_8x8[i] = default_scaling_list_8x8(i);
            }
        }
    }

    r.leave(outer);
    Ok(())
}

fn parse_sps_scaling_lists(r: &mut SyntaxReader, sps: &mut Sps) -> ParseResult<()> {
    let count = if sps.chroma_format_idc != 3 { 8 } else { 12 };

    parse_scaling_lists(
        r,
        count,
        "seq_scaling_list_present_flag",
        &mut sps.seq_scaling_list_present_flag,
        &mut sps.use_default_scaling_matrix_4x4,
        &mut sps.use_default_scaling_matrix_8x8,
        &mut sps.scaling_lists_4x4,
        &mut sps.scaling_lists_8x8,
    )
}

fn parse_pps_scaling_lists(r: &mut SyntaxReader, pps: &mut Pps) -> ParseResult<()> {
    let lists_8x8 = if PPS_ASSUMED_CHROMA_FORMAT_IDC != 3 { 2 } else { 6 };
    let count = 6 + usize::from(pps.transform_8x8_mode_flag) * lists_8x8;

    parse_scaling_lists(
        r,
        count,
        "pic_scaling_list_present_flag",
        &mut pps.pic_scaling_list_present_flag,
        &mut pps.use_default_scaling_matrix_4x4,
        &mut pps.use_default_scaling_matrix_8x8,
        &mut pps.scaling_lists_4x4,
        &mut pps.scaling_lists_8x8,
    )
}

/// The parsed content of a NAL unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NaluPayload {
    Sps(Rc<Sps>),
    Pps(Rc<Pps>),
    SubsetSps(Rc<SubsetSps>),
    Slice(Box<SliceHeader>),
    SliceExtension(Box<ScalableSliceHeader>),
    Prefix(PrefixNalUnit),
    /// Types without a payload parser, and syntax that is not handled.
    None,
}

/// A parsed NAL unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NalUnit {
    /// Offset of the start code in the stream.
    pub stream_offset: u64,
    pub start_code_len: usize,
    /// Size of the NAL unit as coded, start code excluded.
    pub size: usize,
    /// Number of bits parsed from the unit once unescaped, header included.
    pub bit_length: usize,
    /// Number of emulation prevention bytes removed before parsing.
    pub epb_count: usize,
    /// CRC-32 of the NAL unit as coded, start code excluded.
    pub checksum: u32,
    pub header: NaluHeader,
    pub payload: NaluPayload,
}

/// A NAL unit that failed to parse.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("NAL unit at offset {stream_offset} ({nal_unit_type:?}): {source}")]
pub struct NaluError {
    pub stream_offset: u64,
    /// `None` if the header itself could not be parsed.
    pub nal_unit_type: Option<NaluType>,
    pub source: ParseError,
}

/// Parser state for one stream: the parameter sets received so far.
///
/// Parameter sets are replaced when a new one with the same id is parsed.
/// Units are expected to be parsed in stream order.
#[derive(Debug, Default)]
pub struct Parser {
    active_spses: BTreeMap<u8, Rc<Sps>>,
    active_ppses: BTreeMap<u8, Rc<Pps>>,
    active_subset_spses: BTreeMap<u8, Rc<SubsetSps>>,
}

impl Parser {
    pub fn get_sps(&self, sps_id: u8) -> Option<&Rc<Sps>> {
        self.active_spses.get(&sps_id)
    }

    pub fn get_pps(&self, pps_id: u8) -> Option<&Rc<Pps>> {
        self.active_ppses.get(&pps_id)
    }

    pub fn get_subset_sps(&self, sps_id: u8) -> Option<&Rc<SubsetSps>> {
        self.active_subset_spses.get(&sps_id)
    }

    pub fn insert_sps(&mut self, sps: Sps) -> &Rc<Sps> {
        let key = sps.seq_parameter_set_id;
        self.active_spses.insert(key, Rc::new(sps));
        &self.active_spses[&key]
    }

    pub fn insert_pps(&mut self, pps: Pps) -> &Rc<Pps> {
        let key = pps.pic_parameter_set_id;
        self.active_ppses.insert(key, Rc::new(pps));
        &self.active_ppses[&key]
    }

    pub fn insert_subset_sps(&mut self, subset_sps: SubsetSps) -> &Rc<SubsetSps> {
        let key = subset_sps.sps.seq_parameter_set_id;
        self.active_subset_spses.insert(key, Rc::new(subset_sps));
        &self.active_subset_spses[&key]
    }

    /// Looks up the PPS read at `pos` by a slice header.
    pub(crate) fn resolve_pps(
        &self,
        r: &SyntaxReader,
        pos: BitPosition,
        pps_id: u8,
    ) -> ParseResult<&Rc<Pps>> {
        self.get_pps(pps_id).ok_or_else(|| {
            r.error_at(
                "pic_parameter_set_id",
                pos,
                ParseErrorKind::UnresolvedReference {
                    kind: ParameterSetKind::Pps,
                    id: u32::from(pps_id),
                },
            )
        })
    }

    /// Looks up the SPS `pps` refers to.
    pub(crate) fn resolve_sps(
        &self,
        r: &SyntaxReader,
        pos: BitPosition,
        pps: &Pps,
    ) -> ParseResult<&Rc<Sps>> {
        self.get_sps(pps.seq_parameter_set_id).ok_or_else(|| {
            r.error_at(
                "pic_parameter_set_id",
                pos,
                ParseErrorKind::UnresolvedReference {
                    kind: ParameterSetKind::Sps,
                    id: u32::from(pps.seq_parameter_set_id),
                },
            )
        })
    }

    /// Looks up the subset SPS `pps` refers to. Only subset SPSs with an SVC
    /// extension resolve.
    pub(crate) fn resolve_svc_subset_sps(
        &self,
        r: &SyntaxReader,
        pos: BitPosition,
        pps: &Pps,
    ) -> ParseResult<(&Sps, &SpsSvcExtension)> {
        self.get_subset_sps(pps.seq_parameter_set_id)
            .and_then(|subset_sps| Some((&subset_sps.sps, subset_sps.svc_extension.as_ref()?)))
            .ok_or_else(|| {
                r.error_at(
                    "pic_parameter_set_id",
                    pos,
                    ParseErrorKind::UnresolvedReference {
                        kind: ParameterSetKind::SubsetSps,
                        id: u32::from(pps.seq_parameter_set_id),
                    },
                )
            })
    }

    /// Parses one NAL unit. Parameter sets are stored on success and become
    /// visible to the units that follow.
    pub fn parse_nalu(&mut self, nalu: &RawNalu) -> Result<NalUnit, NaluError> {
        let raw = nalu.payload();
        let (rbsp, epb_count) = rbsp::unescape_counted(raw);
        let mut r = SyntaxReader::new(&rbsp, "nal_unit");

        let header = NaluHeader::parse(&mut r).map_err(|source| NaluError {
            stream_offset: nalu.stream_offset,
            nal_unit_type: None,
            source,
        })?;

        let payload = match self.parse_payload(&mut r, &header) {
            Ok(payload) => payload,
            Err(e) if e.is_unsupported() => {
                warn!(
                    "Skipping NAL unit at offset {}: {}",
                    nalu.stream_offset, e
                );
                NaluPayload::None
            }
            Err(source) => {
                return Err(NaluError {
                    stream_offset: nalu.stream_offset,
                    nal_unit_type: Some(header.type_),
                    source,
                })
            }
        };

        Ok(NalUnit {
            stream_offset: nalu.stream_offset,
            start_code_len: nalu.start_code_len,
            size: raw.len(),
            bit_length: r.bits_read(),
            epb_count,
            checksum: crc32fast::hash(raw),
            header,
            payload,
        })
    }

    /// Parses every NAL unit of an in-memory Annex B stream, in order.
    pub fn parse_stream<'a>(
        &'a mut self,
        stream: &[u8],
    ) -> impl Iterator<Item = Result<NalUnit, NaluError>> + 'a {
        NalIterator::new(stream).map(move |nalu| self.parse_nalu(&nalu))
    }

    fn parse_payload(
        &mut self,
        r: &mut SyntaxReader,
        header: &NaluHeader,
    ) -> ParseResult<NaluPayload> {
        let payload = match header.type_ {
            NaluType::Slice | NaluType::SliceIdr => {
                NaluPayload::Slice(Box::new(SliceHeader::parse(r, header, self)?))
            }
            NaluType::Sps => {
                let sps = self.insert_sps(Sps::parse(r)?);
                debug!(
                    "SPS {}: profile {}, level {}, {}x{}",
                    sps.seq_parameter_set_id,
                    sps.profile_idc,
                    sps.level_idc,
                    sps.width(),
                    sps.height()
                );
                NaluPayload::Sps(Rc::clone(sps))
            }
            NaluType::Pps => {
                let pps = self.insert_pps(Pps::parse(r)?);
                debug!(
                    "PPS {} for SPS {}",
                    pps.pic_parameter_set_id, pps.seq_parameter_set_id
                );
                NaluPayload::Pps(Rc::clone(pps))
            }
            NaluType::SubsetSps => {
                let subset_sps = self.insert_subset_sps(SubsetSps::parse(r)?);
                debug!(
                    "Subset SPS {}: profile {}",
                    subset_sps.sps.seq_parameter_set_id, subset_sps.sps.profile_idc
                );
                NaluPayload::SubsetSps(Rc::clone(subset_sps))
            }
            NaluType::PrefixUnit => match header.svc_extension() {
                Some(svc) => NaluPayload::Prefix(PrefixNalUnit::parse(r, header.ref_idc, svc)?),
                None => NaluPayload::None,
            },
            NaluType::SliceExt if header.svc_extension().is_some() => NaluPayload::SliceExtension(
                Box::new(ScalableSliceHeader::parse(r, header, self)?),
            ),
            NaluType::SliceExt | NaluType::SliceDepth => {
                return Err(r.error(
                    "nal_unit_type",
                    ParseErrorKind::Unsupported("multiview slice extension"),
                ))
            }
            type_ => {
                debug!("No payload parser for {:?}", type_);
                NaluPayload::None
            }
        };

        Ok(payload)
    }
}
