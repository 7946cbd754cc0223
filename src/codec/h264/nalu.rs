// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use enumn::N;

use crate::codec::h264::syntax::ParseResult;
use crate::codec::h264::syntax::SyntaxReader;

/// NAL unit types, as in Table 7-1. Reserved and unspecified codes are
/// grouped.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NaluType {
    Unspecified = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AuDelimiter = 9,
    SeqEnd = 10,
    StreamEnd = 11,
    FillerData = 12,
    SpsExt = 13,
    PrefixUnit = 14,
    SubsetSps = 15,
    DepthSps = 16,
    Reserved = 17,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepth = 21,
}

impl NaluType {
    /// Maps any 5-bit `nal_unit_type` value to its type.
    pub fn from_code(code: u8) -> Self {
        let code = code & 0x1f;

        NaluType::n(code).unwrap_or(match code {
            24..=31 => NaluType::Unspecified,
            _ => NaluType::Reserved,
        })
    }

    /// Whether units of this type carry a header extension.
    pub fn has_header_extension(&self) -> bool {
        matches!(
            self,
            NaluType::PrefixUnit | NaluType::SliceExt | NaluType::SliceDepth
        )
    }
}

/// `nal_unit_header_svc_extension()`, G.7.3.1.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SvcHeaderExtension {
    pub idr_flag: bool,
    pub priority_id: u8,
    pub no_inter_layer_pred_flag: bool,
    pub dependency_id: u8,
    pub quality_id: u8,
    pub temporal_id: u8,
    pub use_ref_base_pic_flag: bool,
    pub discardable_flag: bool,
    pub output_flag: bool,
    pub reserved_three_2bits: u8,
}

impl SvcHeaderExtension {
    /// DQId, as in G.7.4.1.1.
    pub fn dq_id(&self) -> u8 {
        (self.dependency_id << 4) + self.quality_id
    }

    fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("nal_unit_header_svc_extension");

        let ext = Self {
            idr_flag: r.flag("idr_flag")?,
            priority_id: r.u(6, "priority_id")?,
            no_inter_layer_pred_flag: r.flag("no_inter_layer_pred_flag")?,
            dependency_id: r.u(3, "dependency_id")?,
            quality_id: r.u(4, "quality_id")?,
            temporal_id: r.u(3, "temporal_id")?,
            use_ref_base_pic_flag: r.flag("use_ref_base_pic_flag")?,
            discardable_flag: r.flag("discardable_flag")?,
            output_flag: r.flag("output_flag")?,
            reserved_three_2bits: r.u(2, "reserved_three_2bits")?,
        };

        r.leave(outer);
        Ok(ext)
    }
}

/// `nal_unit_header_mvc_extension()`, H.7.3.1.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MvcHeaderExtension {
    pub non_idr_flag: bool,
    pub priority_id: u8,
    pub view_id: u16,
    pub temporal_id: u8,
    pub anchor_pic_flag: bool,
    pub inter_view_flag: bool,
    pub reserved_one_bit: bool,
}

impl MvcHeaderExtension {
    fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("nal_unit_header_mvc_extension");

        let ext = Self {
            non_idr_flag: r.flag("non_idr_flag")?,
            priority_id: r.u(6, "priority_id")?,
            view_id: r.u(10, "view_id")?,
            temporal_id: r.u(3, "temporal_id")?,
            anchor_pic_flag: r.flag("anchor_pic_flag")?,
            inter_view_flag: r.flag("inter_view_flag")?,
            reserved_one_bit: r.flag("reserved_one_bit")?,
        };

        r.leave(outer);
        Ok(ext)
    }
}

/// `nal_unit_header_3davc_extension()`, J.7.3.1.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Avc3dHeaderExtension {
    pub view_idx: u8,
    pub depth_flag: bool,
    pub non_idr_flag: bool,
    pub temporal_id: u8,
    pub anchor_pic_flag: bool,
    pub inter_view_flag: bool,
}

impl Avc3dHeaderExtension {
    fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("nal_unit_header_3davc_extension");

        let ext = Self {
            view_idx: r.u(8, "view_idx")?,
            depth_flag: r.flag("depth_flag")?,
            non_idr_flag: r.flag("non_idr_flag")?,
            temporal_id: r.u(3, "temporal_id")?,
            anchor_pic_flag: r.flag("anchor_pic_flag")?,
            inter_view_flag: r.flag("inter_view_flag")?,
        };

        r.leave(outer);
        Ok(ext)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NaluHeaderExtension {
    Svc(SvcHeaderExtension),
    Mvc(MvcHeaderExtension),
    Avc3d(Avc3dHeaderExtension),
}

/// A NAL unit header, 7.3.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaluHeader {
    /// Shall be 0. Kept as read.
    pub forbidden_zero_bit: bool,
    pub ref_idc: u8,
    /// The raw `nal_unit_type`.
    pub nal_unit_type: u8,
    pub type_: NaluType,
    pub extension: Option<NaluHeaderExtension>,
}

impl NaluHeader {
    /// Parses the header at the start of an RBSP. All of it is consumed,
    /// extension included.
    pub fn parse(r: &mut SyntaxReader) -> ParseResult<Self> {
        let outer = r.enter("nal_unit");

        let forbidden_zero_bit = r.flag("forbidden_zero_bit")?;
        let ref_idc = r.u(2, "nal_ref_idc")?;
        let nal_unit_type = r.u(5, "nal_unit_type")?;
        let type_ = NaluType::from_code(nal_unit_type);

        let extension = match type_ {
            NaluType::PrefixUnit | NaluType::SliceExt => {
                if r.flag("svc_extension_flag")? {
                    Some(NaluHeaderExtension::Svc(SvcHeaderExtension::parse(r)?))
                } else {
                    Some(NaluHeaderExtension::Mvc(MvcHeaderExtension::parse(r)?))
                }
            }
            NaluType::SliceDepth => {
                if r.flag("avc_3d_extension_flag")? {
                    Some(NaluHeaderExtension::Avc3d(Avc3dHeaderExtension::parse(r)?))
                } else {
                    Some(NaluHeaderExtension::Mvc(MvcHeaderExtension::parse(r)?))
                }
            }
            _ => None,
        };

        r.leave(outer);

        Ok(Self {
            forbidden_zero_bit,
            ref_idc,
            nal_unit_type,
            type_,
            extension,
        })
    }

    /// IdrPicFlag. Extended headers carry it explicitly.
    pub fn idr_pic_flag(&self) -> bool {
        match &self.extension {
            Some(NaluHeaderExtension::Svc(svc)) => svc.idr_flag,
            Some(NaluHeaderExtension::Mvc(mvc)) => !mvc.non_idr_flag,
            Some(NaluHeaderExtension::Avc3d(avc3d)) => !avc3d.non_idr_flag,
            None => self.type_ == NaluType::SliceIdr,
        }
    }

    pub fn svc_extension(&self) -> Option<&SvcHeaderExtension> {
        match &self.extension {
            Some(NaluHeaderExtension::Svc(svc)) => Some(svc),
            _ => None,
        }
    }

    /// Header size in bytes, extension included.
    pub fn header_bytes(&self) -> usize {
        match self.extension {
            Some(NaluHeaderExtension::Avc3d(_)) => 3,
            Some(_) => 4,
            None => 1,
        }
    }

    /// Whether this unit ends a sequence or the stream.
    pub fn is_end(&self) -> bool {
        matches!(self.type_, NaluType::SeqEnd | NaluType::StreamEnd)
    }
}
