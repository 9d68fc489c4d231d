//! PCM track values and byte-order handling.

/// Endianness of the 16-bit samples in a track, as declared on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the machine this server runs on.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// Parse the wire tag (0 = little, 1 = big).
    pub fn from_wire_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ByteOrder::Little),
            1 => Some(ByteOrder::Big),
            _ => None,
        }
    }

    pub fn wire_tag(self) -> u32 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        }
    }
}

/// One complete unit of PCM audio submitted for playback.
///
/// `samples` holds the raw 16-bit samples exactly as they arrived; `order`
/// says which endianness they were produced in. Channels are interleaved
/// within `samples`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub order: ByteOrder,
    pub bits: u32,
    pub channels: u32,
    pub rate: u32,
    pub samples: Vec<i16>,
}

impl Track {
    /// Playback duration implied by the declared rate and channel count.
    pub fn duration_ms(&self) -> u64 {
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        frames * 1000 / self.rate.max(1) as u64
    }
}

/// Swap the two bytes of every sample in place.
///
/// Applying this twice restores the original buffer.
pub fn swap_sample_bytes(samples: &mut [i16]) {
    for sample in samples {
        *sample = sample.swap_bytes();
    }
}
