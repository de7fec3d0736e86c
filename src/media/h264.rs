//! H.264 Annex-B scanning
//!
//! Encoders hand us an Annex-B byte stream: NAL units separated by
//! `00 00 01` or `00 00 00 01` start codes. Peer transports packetize these
//! directly, so all we need is to walk the units and tell whether an access
//! unit can start decoding (IDR slice, or SPS ahead of one).
//!
//! ```text
//! 00 00 00 01 | 67 ... (SPS) | 00 00 00 01 | 68 ... (PPS) | 00 00 01 | 65 ... (IDR)
//! ```

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Iterator over NAL unit payloads in an Annex-B stream
///
/// Each item starts at the NAL header byte; start codes are stripped.
pub struct AnnexBIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AnnexBIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = find_start_code(data, 0).map_or(data.len(), |(_, end)| end);
        Self { data, offset }
    }
}

impl<'a> Iterator for AnnexBIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.data.len() {
            let start = self.offset;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.offset = next;

            // Consecutive start codes produce empty units; skip them
            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// Find the next start code at or after `from`.
/// Returns (index of the first zero, index just past the `01`).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, i + 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, i + 4));
            }
        }
        i += 1;
    }
    None
}

/// Whether an access unit can start decoding on its own
pub fn contains_keyframe(data: &[u8]) -> bool {
    AnnexBIterator::new(data).any(|nalu| {
        matches!(
            NaluType::from_byte(nalu[0]),
            Some(NaluType::Idr) | Some(NaluType::Sps)
        )
    })
}

/// Profile and level carried in a sequence parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
}

impl SpsInfo {
    /// Read profile/level from the first SPS in the stream
    pub fn find(data: &[u8]) -> Option<Self> {
        AnnexBIterator::new(data)
            .find(|nalu| NaluType::from_byte(nalu[0]) == Some(NaluType::Sps))
            .filter(|sps| sps.len() >= 4)
            .map(|sps| SpsInfo {
                profile: sps[1],
                compatibility: sps[2],
                level: sps[3],
            })
    }

    /// RFC 6381 codec string, e.g. `avc1.42e01f`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }
}
