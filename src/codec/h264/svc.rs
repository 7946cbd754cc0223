// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Subset sequence parameter sets and the Annex G (SVC) syntax structures.

use crate::codec::h264::nalu::NaluHeader;
use crate::codec::h264::nalu::SvcHeaderExtension;
use crate::codec::h264::parser::HrdParams;
use crate::codec::h264::parser::Parser;
use crate::codec::h264::parser::Profile;
use crate::codec::h264::parser::Sps;
use crate::codec::h264::slice::BottomFieldPocPresence;
use crate::codec::h264::slice::PredWeightTable;
use crate::codec::h264::slice::RefPicMarking;
use crate::codec::h264::slice::SliceHeader;
use crate::codec::h264::syntax::ParseErrorKind;
use crate::codec::h264::syntax::ParseResult;
use crate::codec::h264::syntax::SyntaxReader;

/// `seq_parameter_set_svc_extension()`, G.7.3.2.1.4.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpsSvcExtension {
    pub inter_layer_deblocking_filter_control_present_flag: bool,
    pub extended_spatial_scalability_idc: u8,
    pub chroma_phase_x_plus1_flag: bool,
    pub chroma_phase_y_plus1: u8,
    pub seq_ref_layer_chroma_phase_x_plus1_flag: bool,
    pub seq_ref_layer_chroma_phase_y_plus1: u8,
    pub seq_scaled_ref_layer_left_offset: i32,
    pub seq_scaled_ref_layer_top_offset: i32,
    pub seq_scaled_ref_layer_right_offset: i32,
    pub seq_scaled_ref_layer_bottom_offset: i32,
    pub seq_tcoeff_level_prediction_flag: bool,
    pub adaptive_tcoeff_level_prediction_flag: bool,
    pub slice_header_restriction_flag: bool,
}

impl Default for SpsSvcExtension {
    fn default() -> Self {
        Self {
            inter_layer_deblocking_filter_control_present_flag: false,
            extended_spatial_scalability_idc: 0,
            chroma_phase_x_plus1_flag: true,
            chroma_phase_y_plus1: 1,
            seq_ref_layer_chroma_phase_x_plus1_flag: true,
            seq_ref_layer_chroma_phase_y_plus1: 1,
            seq_scaled_ref_layer_left_offset: 0,
            seq_scaled_ref_layer_top_offset: 0,
            seq_scaled_ref_layer_right_offset: 0,
            seq_scaled_ref_layer_bottom_offset: 0,
            seq_tcoeff_level_prediction_flag: false,
            adaptive_tcoeff_level_prediction_flag: false,
            slice_header_restriction_flag: false,
        }
    }
}

impl SpsSvcExtension {
    pub fn parse(r: &mut SyntaxReader, sps: &Sps) -> ParseResult<Self> {
        let outer = r.enter("seq_parameter_set_svc_extension");
        let chroma_array_type = sps.chroma_array_type();

        let mut ext = SpsSvcExtension {
            inter_layer_deblocking_filter_control_present_flag: r
                .flag("inter_layer_deblocking_filter_control_present_flag")?,
            extended_spatial_scalability_idc: r.u_range(
                2,
                "extended_spatial_scalability_idc",
                0,
                2,
            )? as u8,
            ..Default::default()
        };

        if chroma_array_type == 1 || chroma_array_type == 2 {
            ext.chroma_phase_x_plus1_flag = r.flag("chroma_phase_x_plus1_flag")?;
        }

        if chroma_array_type == 1 {
            ext.chroma_phase_y_plus1 = r.u_range(2, "chroma_phase_y_plus1", 0, 2)? as u8;
        }

        ext.seq_ref_layer_chroma_phase_x_plus1_flag = ext.chroma_phase_x_plus1_flag;
        ext.seq_ref_layer_chroma_phase_y_plus1 = ext.chroma_phase_y_plus1;

        if ext.extended_spatial_scalability_idc == 1 {
            if chroma_array_type > 0 {
                ext.seq_ref_layer_chroma_phase_x_plus1_flag =
                    r.flag("seq_ref_layer_chroma_phase_x_plus1_flag")?;
                ext.seq_ref_layer_chroma_phase_y_plus1 =
                    r.u_range(2, "seq_ref_layer_chroma_phase_y_plus1", 0, 2)? as u8;
            }

            ext.seq_scaled_ref_layer_left_offset =
                r.se_range("seq_scaled_ref_layer_left_offset", -32768, 32767)?;
            ext.seq_scaled_ref_layer_top_offset =
                r.se_range("seq_scaled_ref_layer_top_offset", -32768, 32767)?;
            ext.seq_scaled_ref_layer_right_offset =
                r.se_range("seq_scaled_ref_layer_right_offset", -32768, 32767)?;
            ext.seq_scaled_ref_layer_bottom_offset =
                r.se_range("seq_scaled_ref_layer_bottom_offset", -32768, 32767)?;
        }

        ext.seq_tcoeff_level_prediction_flag = r.flag("seq_tcoeff_level_prediction_flag")?;
        if ext.seq_tcoeff_level_prediction_flag {
            ext.adaptive_tcoeff_level_prediction_flag =
                r.flag("adaptive_tcoeff_level_prediction_flag")?;
        }

        ext.slice_header_restriction_flag = r.flag("slice_header_restriction_flag")?;

        r.leave(outer);
        Ok(ext)
    }
}

/// One layer of `svc_vui_parameters_extension()`, G.14.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SvcVuiEntry {
    pub dependency_id: u8,
    pub quality_id: u8,
    pub temporal_id: u8,
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
}

/// `svc_vui_parameters_extension()`, G.14.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SvcVuiExtension {
    pub entries: Vec<SvcVuiEntry>,
}

impl SvcVuiExtension {
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("svc_vui_parameters_extension");

        let num_entries = r.ue_max::<u32>("vui_ext_num_entries_minus1", 1023)? + 1;
        let mut entries = Vec::new();

        for _ in 0..num_entries {
            let mut entry = SvcVuiEntry {
                dependency_id: r.u(3, "vui_ext_dependency_id")?,
                quality_id: r.u(4, "vui_ext_quality_id")?,
                temporal_id: r.u(3, "vui_ext_temporal_id")?,
                timing_info_present_flag: r.flag("vui_ext_timing_info_present_flag")?,
                ..Default::default()
            };

            if entry.timing_info_present_flag {
                entry.num_units_in_tick =
                    r.u_range(32, "vui_ext_num_units_in_tick", 1, u32::MAX)?;
                entry.time_scale = r.u_range(32, "vui_ext_time_scale", 1, u32::MAX)?;
                entry.fixed_frame_rate_flag = r.flag("vui_ext_fixed_frame_rate_flag")?;
            }

            entry.nal_hrd_parameters_present_flag =
                r.flag("vui_ext_nal_hrd_parameters_present_flag")?;
            if entry.nal_hrd_parameters_present_flag {
                entry.nal_hrd_parameters = HrdParams::parse(r)?;
            }

            entry.vcl_hrd_parameters_present_flag =
                r.flag("vui_ext_vcl_hrd_parameters_present_flag")?;
            if entry.vcl_hrd_parameters_present_flag {
                entry.vcl_hrd_parameters = HrdParams::parse(r)?;
            }

            if entry.nal_hrd_parameters_present_flag || entry.vcl_hrd_parameters_present_flag {
                entry.low_delay_hrd_flag = r.flag("vui_ext_low_delay_hrd_flag")?;
            }

            entry.pic_struct_present_flag = r.flag("vui_ext_pic_struct_present_flag")?;
            entries.push(entry);
        }

        r.leave(outer);
        Ok(Self { entries })
    }
}

/// `subset_seq_parameter_set_rbsp()`, 7.3.2.1.3.
///
/// The SVC extension is parsed in full. For the MVC and 3D-AVC profiles only
/// the leading marker bits are checked, the rest of the unit is left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubsetSps {
    pub sps: Sps,

    /* profile_idc == 83 || 86 */
    pub svc_extension: Option<SpsSvcExtension>,
    pub svc_vui_parameters_present_flag: bool,
    pub svc_vui_parameters_extension: Option<SvcVuiExtension>,

    /* profile_idc == 118 || 128 || 134 || 139 */
    pub mvc_bit_equal_to_one: bool,
    /* profile_idc == 139 */
    pub avc_3d_bit_equal_to_one: bool,

    pub additional_extension2_flag: bool,
}

impl SubsetSps {
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("subset_seq_parameter_set_rbsp");

        let mut subset_sps = SubsetSps {
            sps: Sps::parse(r)?,
            ..Default::default()
        };

        match Profile::n(subset_sps.sps.profile_idc) {
            Some(Profile::ScalableBaseline | Profile::ScalableHigh) => {
                subset_sps.svc_extension = Some(SpsSvcExtension::parse(r, &subset_sps.sps)?);

                subset_sps.svc_vui_parameters_present_flag =
                    r.flag("svc_vui_parameters_present_flag")?;
                if subset_sps.svc_vui_parameters_present_flag {
                    subset_sps.svc_vui_parameters_extension = Some(SvcVuiExtension::parse(r)?);
                }

                subset_sps.additional_extension2_flag = r.flag("additional_extension2_flag")?;
            }
            Some(Profile::MultiviewHigh | Profile::StereoHigh | Profile::MfcHigh) => {
                subset_sps.mvc_bit_equal_to_one = r.u_range(1, "bit_equal_to_one", 1, 1)? == 1;
            }
            Some(Profile::EnhancedMultiviewDepthHigh) => {
                subset_sps.mvc_bit_equal_to_one = r.u_range(1, "bit_equal_to_one", 1, 1)? == 1;
                subset_sps.avc_3d_bit_equal_to_one =
                    r.u_range(1, "bit_equal_to_one", 1, 1)? == 1;
            }
            _ => {
                subset_sps.additional_extension2_flag = r.flag("additional_extension2_flag")?;
            }
        }

        r.leave(outer);
        Ok(subset_sps)
    }
}

/// One `memory_management_base_control_operation`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefBasePicMarkingInner {
    pub memory_management_base_control_operation: u8,
    /* if mmbco == 1 */
    pub difference_of_base_pic_nums_minus1: u32,
    /* if mmbco == 2 */
    pub long_term_base_pic_num: u32,
}

/// `dec_ref_base_pic_marking()`, G.7.3.3.5.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecRefBasePicMarking {
    pub adaptive_ref_base_pic_marking_mode_flag: bool,
    /// Operations, without the terminating 0.
    pub inner: Vec<RefBasePicMarkingInner>,
}

impl DecRefBasePicMarking {
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("dec_ref_base_pic_marking");

        let mut marking = DecRefBasePicMarking {
            adaptive_ref_base_pic_marking_mode_flag: r
                .flag("adaptive_ref_base_pic_marking_mode_flag")?,
            ..Default::default()
        };

        if marking.adaptive_ref_base_pic_marking_mode_flag {
            loop {
                let mut op = RefBasePicMarkingInner {
                    memory_management_base_control_operation: r
                        .ue_max("memory_management_base_control_operation", 2)?,
                    ..Default::default()
                };

                match op.memory_management_base_control_operation {
                    0 => break,
                    1 => {
                        op.difference_of_base_pic_nums_minus1 =
                            r.ue("difference_of_base_pic_nums_minus1")?
                    }
                    _ => op.long_term_base_pic_num = r.ue("long_term_base_pic_num")?,
                }

                marking.inner.push(op);
            }
        }

        r.leave(outer);
        Ok(marking)
    }
}

/// Reads `store_ref_base_pic_flag` and, when it applies,
/// `dec_ref_base_pic_marking()`.
fn parse_base_pic_marking(
    r: &mut SyntaxReader,
    svc: &SvcHeaderExtension,
) -> ParseResult<(bool, Option<DecRefBasePicMarking>)> {
    let store_ref_base_pic_flag = r.flag("store_ref_base_pic_flag")?;

    let marking = if (svc.use_ref_base_pic_flag || store_ref_base_pic_flag) && !svc.idr_flag {
        Some(DecRefBasePicMarking::parse(r)?)
    } else {
        None
    };

    Ok((store_ref_base_pic_flag, marking))
}

/// `prefix_nal_unit_svc()`, G.7.3.2.12.1. Extension data is not parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixNalUnit {
    pub store_ref_base_pic_flag: bool,
    pub dec_ref_base_pic_marking: Option<DecRefBasePicMarking>,
    pub additional_prefix_nal_unit_extension_flag: bool,
}

impl PrefixNalUnit {
    pub fn parse(r: &mut SyntaxReader, ref_idc: u8, svc: &SvcHeaderExtension) -> ParseResult<Self> {
        let outer = r.enter("prefix_nal_unit_svc");
        let mut prefix = PrefixNalUnit::default();

        if ref_idc != 0 {
            let (store_ref_base_pic_flag, marking) = parse_base_pic_marking(r, svc)?;
            prefix.store_ref_base_pic_flag = store_ref_base_pic_flag;
            prefix.dec_ref_base_pic_marking = marking;
            prefix.additional_prefix_nal_unit_extension_flag =
                r.flag("additional_prefix_nal_unit_extension_flag")?;
        }

        r.leave(outer);
        Ok(prefix)
    }
}

/// `slice_header_in_scalable_extension()`, G.7.3.3.4.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalableSliceHeader {
    /// The fields shared with `slice_header()`. EP, EB and EI slices are
    /// reported as P, B and I.
    pub slice: SliceHeader,

    pub base_pred_weight_table_flag: bool,
    pub store_ref_base_pic_flag: bool,
    pub dec_ref_base_pic_marking: Option<DecRefBasePicMarking>,

    pub ref_layer_dq_id: u8,
    pub disable_inter_layer_deblocking_filter_idc: u8,
    pub inter_layer_slice_alpha_c0_offset_div2: i8,
    pub inter_layer_slice_beta_offset_div2: i8,
    pub constrained_intra_resampling_flag: bool,
    pub ref_layer_chroma_phase_x_plus1_flag: bool,
    pub ref_layer_chroma_phase_y_plus1: u8,
    pub scaled_ref_layer_left_offset: i32,
    pub scaled_ref_layer_top_offset: i32,
    pub scaled_ref_layer_right_offset: i32,
    pub scaled_ref_layer_bottom_offset: i32,

    pub slice_skip_flag: bool,
    pub num_mbs_in_slice_minus1: u32,
    pub adaptive_base_mode_flag: bool,
    pub default_base_mode_flag: bool,
    pub adaptive_motion_prediction_flag: bool,
    pub default_motion_prediction_flag: bool,
    pub adaptive_residual_prediction_flag: bool,
    pub default_residual_prediction_flag: bool,
    pub tcoeff_level_prediction_flag: bool,

    pub scan_idx_start: u8,
    pub scan_idx_end: u8,
}

impl Default for ScalableSliceHeader {
    fn default() -> Self {
        Self {
            slice: Default::default(),
            base_pred_weight_table_flag: false,
            store_ref_base_pic_flag: false,
            dec_ref_base_pic_marking: None,
            ref_layer_dq_id: 0,
            disable_inter_layer_deblocking_filter_idc: 0,
            inter_layer_slice_alpha_c0_offset_div2: 0,
            inter_layer_slice_beta_offset_div2: 0,
            constrained_intra_resampling_flag: false,
            ref_layer_chroma_phase_x_plus1_flag: true,
            ref_layer_chroma_phase_y_plus1: 1,
            scaled_ref_layer_left_offset: 0,
            scaled_ref_layer_top_offset: 0,
            scaled_ref_layer_right_offset: 0,
            scaled_ref_layer_bottom_offset: 0,
            slice_skip_flag: false,
            num_mbs_in_slice_minus1: 0,
            adaptive_base_mode_flag: false,
            default_base_mode_flag: false,
            adaptive_motion_prediction_flag: false,
            default_motion_prediction_flag: false,
            adaptive_residual_prediction_flag: false,
            default_residual_prediction_flag: false,
            tcoeff_level_prediction_flag: false,
            scan_idx_start: 0,
            scan_idx_end: 15,
        }
    }
}

impl ScalableSliceHeader {
    /// Parses a coded slice extension carrying an SVC header extension. The
    /// PPS and a subset SPS with an SVC extension must be known to `parser`.
    ///
    /// Unlike `slice_header()`, `delta_pic_order_cnt_bottom` is present in
    /// frame slices when `bottom_field_pic_order_in_frame_present_flag` is
    /// clear.
    pub fn parse(r: &mut SyntaxReader, nalu: &NaluHeader, parser: &Parser) -> ParseResult<Self> {
        let svc = nalu.svc_extension().ok_or_else(|| {
            r.error(
                "svc_extension_flag",
                ParseErrorKind::Unsupported("multiview slice extension"),
            )
        })?;

        let outer = r.enter("slice_header_in_scalable_extension");

        let (slice, pps_pos, pps) = SliceHeader::parse_start(r, parser, 7, false)?;
        let (sps, sps_svc) = parser.resolve_svc_subset_sps(r, pps_pos, pps)?;

        let mut header = ScalableSliceHeader {
            slice,
            ref_layer_chroma_phase_x_plus1_flag: sps_svc.seq_ref_layer_chroma_phase_x_plus1_flag,
            ref_layer_chroma_phase_y_plus1: sps_svc.seq_ref_layer_chroma_phase_y_plus1,
            scaled_ref_layer_left_offset: sps_svc.seq_scaled_ref_layer_left_offset,
            scaled_ref_layer_top_offset: sps_svc.seq_scaled_ref_layer_top_offset,
            scaled_ref_layer_right_offset: sps_svc.seq_scaled_ref_layer_right_offset,
            scaled_ref_layer_bottom_offset: sps_svc.seq_scaled_ref_layer_bottom_offset,
            tcoeff_level_prediction_flag: sps_svc.seq_tcoeff_level_prediction_flag,
            ..Default::default()
        };

        let slice = &mut header.slice;
        slice.parse_picture_fields(
            r,
            sps,
            pps,
            nalu.idr_pic_flag(),
            BottomFieldPocPresence::WhenFlagClear,
        )?;

        if svc.quality_id == 0 {
            if slice.slice_type.is_b() {
                slice.direct_spatial_mv_pred_flag = r.flag("direct_spatial_mv_pred_flag")?;
            }

            slice.parse_num_ref_idx(r, pps)?;
            slice.parse_ref_pic_list_modifications(r)?;

            if slice.has_pred_weight_table(pps) {
                if !svc.no_inter_layer_pred_flag {
                    header.base_pred_weight_table_flag = r.flag("base_pred_weight_table_flag")?;
                }

                if svc.no_inter_layer_pred_flag || !header.base_pred_weight_table_flag {
                    slice.pred_weight_table =
                        PredWeightTable::parse(r, sps.chroma_array_type(), slice)?;
                }
            }

            if nalu.ref_idc != 0 {
                let start = r.bits_read();
                slice.dec_ref_pic_marking = RefPicMarking::parse(r, nalu.idr_pic_flag())?;
                slice.dec_ref_pic_marking_bit_size = r.bits_read() - start;

                if !sps_svc.slice_header_restriction_flag {
                    let (store_ref_base_pic_flag, marking) = parse_base_pic_marking(r, svc)?;
                    header.store_ref_base_pic_flag = store_ref_base_pic_flag;
                    header.dec_ref_base_pic_marking = marking;
                }
            }
        }

        slice.parse_tail(r, sps, pps, 6)?;

        if !svc.no_inter_layer_pred_flag && svc.quality_id == 0 {
            header.parse_inter_layer_fields(r, sps, sps_svc)?;
        }

        if !svc.no_inter_layer_pred_flag {
            header.parse_prediction_flags(r, sps_svc)?;
        }

        if !sps_svc.slice_header_restriction_flag && !header.slice_skip_flag {
            header.scan_idx_start = r.u(4, "scan_idx_start")?;
            let scan_idx_end = r.u(4, "scan_idx_end")?;
            r.check("scan_idx_end", scan_idx_end, header.scan_idx_start, 15)?;
            header.scan_idx_end = scan_idx_end;
        }

        header.slice.header_bit_size = r.bits_read();

        r.leave(outer);
        Ok(header)
    }

    fn parse_inter_layer_fields(
        &mut self,
        r: &mut SyntaxReader,
        sps: &Sps,
        sps_svc: &SpsSvcExtension,
    ) -> ParseResult<()> {
        self.ref_layer_dq_id = r.ue_max("ref_layer_dq_id", 127)?;

        if sps_svc.inter_layer_deblocking_filter_control_present_flag {
            self.disable_inter_layer_deblocking_filter_idc =
                r.ue_max("disable_inter_layer_deblocking_filter_idc", 6)?;

            if self.disable_inter_layer_deblocking_filter_idc != 1 {
                self.inter_layer_slice_alpha_c0_offset_div2 =
                    r.se_range("inter_layer_slice_alpha_c0_offset_div2", -6, 6)?;
                self.inter_layer_slice_beta_offset_div2 =
                    r.se_range("inter_layer_slice_beta_offset_div2", -6, 6)?;
            }
        }

        self.constrained_intra_resampling_flag = r.flag("constrained_intra_resampling_flag")?;

        if sps_svc.extended_spatial_scalability_idc == 2 {
            if sps.chroma_array_type() > 0 {
                self.ref_layer_chroma_phase_x_plus1_flag =
                    r.flag("ref_layer_chroma_phase_x_plus1_flag")?;
                self.ref_layer_chroma_phase_y_plus1 =
                    r.u_range(2, "ref_layer_chroma_phase_y_plus1", 0, 2)? as u8;
            }

            self.scaled_ref_layer_left_offset =
                r.se_range("scaled_ref_layer_left_offset", -32768, 32767)?;
            self.scaled_ref_layer_top_offset =
                r.se_range("scaled_ref_layer_top_offset", -32768, 32767)?;
            self.scaled_ref_layer_right_offset =
                r.se_range("scaled_ref_layer_right_offset", -32768, 32767)?;
            self.scaled_ref_layer_bottom_offset =
                r.se_range("scaled_ref_layer_bottom_offset", -32768, 32767)?;
        }

        Ok(())
    }

    fn parse_prediction_flags(&mut self, r: &mut SyntaxReader, sps_svc: &SpsSvcExtension) -> ParseResult<()> {
        self.slice_skip_flag = r.flag("slice_skip_flag")?;

        if self.slice_skip_flag {
            self.num_mbs_in_slice_minus1 = r.ue("num_mbs_in_slice_minus1")?;
        } else {
            self.adaptive_base_mode_flag = r.flag("adaptive_base_mode_flag")?;
            if !self.adaptive_base_mode_flag {
                self.default_base_mode_flag = r.flag("default_base_mode_flag")?;
            }

            if !self.default_base_mode_flag {
                self.adaptive_motion_prediction_flag = r.flag("adaptive_motion_prediction_flag")?;
                if !self.adaptive_motion_prediction_flag {
                    self.default_motion_prediction_flag =
                        r.flag("default_motion_prediction_flag")?;
                }
            }

            self.adaptive_residual_prediction_flag = r.flag("adaptive_residual_prediction_flag")?;
            if !self.adaptive_residual_prediction_flag {
                self.default_residual_prediction_flag =
                    r.flag("default_residual_prediction_flag")?;
            }
        }

        if sps_svc.adaptive_tcoeff_level_prediction_flag {
            self.tcoeff_level_prediction_flag = r.flag("tcoeff_level_prediction_flag")?;
        }

        Ok(())
    }
}
