use crate::common::{errors::MediaError, types::Timestamp};

/// Sampling rates by ADTS frequency index.
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

pub const SAMPLES_PER_BLOCK: u64 = 1024;
pub const ADTS_HEADER_LENGTH: usize = 7;
pub const ADTS_HEADER_LENGTH_CRC: usize = 9;

/// Whether `b0 b1` can start an ADTS header.
pub fn is_sync(b0: u8, b1: u8) -> bool {
    b0 == 0xFF && b1 & 0xF0 == 0xF0
}

/// Decoded ADTS fixed and variable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacFrameHeader {
    /// MPEG-4 audio object type minus one, as carried in ADTS.
    pub profile: u8,
    pub frequency_index: u8,
    pub sample_rate: u32,
    pub channel_config: u8,
    /// Whole frame, header included.
    pub frame_length: usize,
    pub has_crc: bool,
    pub header_length: usize,
    pub raw_blocks: u8,
}

impl AacFrameHeader {
    /// Header length implied by the protection bit in byte 1.
    pub fn header_length_for(b1: u8) -> usize {
        if b1 & 0x01 == 0 {
            ADTS_HEADER_LENGTH_CRC
        } else {
            ADTS_HEADER_LENGTH
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < ADTS_HEADER_LENGTH {
            return Err(MediaError::InvalidAdtsHeader("short header"));
        }
        if !is_sync(data[0], data[1]) {
            return Err(MediaError::InvalidAdtsHeader("missing sync word"));
        }
        if (data[1] >> 1) & 0x03 != 0 {
            return Err(MediaError::InvalidAdtsHeader("layer must be 0"));
        }

        let has_crc = data[1] & 0x01 == 0;
        let header_length = if has_crc {
            ADTS_HEADER_LENGTH_CRC
        } else {
            ADTS_HEADER_LENGTH
        };

        let profile = data[2] >> 6;
        let frequency_index = (data[2] >> 2) & 0x0F;
        let sample_rate = *SAMPLE_RATES
            .get(frequency_index as usize)
            .ok_or(MediaError::InvalidAdtsHeader("frequency index out of range"))?;
        let channel_config = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        if frame_length <= header_length {
            return Err(MediaError::InvalidAdtsHeader("frame shorter than header"));
        }
        let raw_blocks = (data[6] & 0x03) + 1;

        Ok(Self {
            profile,
            frequency_index,
            sample_rate,
            channel_config,
            frame_length,
            has_crc,
            header_length,
            raw_blocks,
        })
    }

    pub fn samples(&self) -> u64 {
        SAMPLES_PER_BLOCK * self.raw_blocks as u64
    }

    pub fn duration(&self) -> Timestamp {
        Timestamp::from_samples(self.samples(), self.sample_rate)
    }

    pub fn payload_length(&self) -> usize {
        self.frame_length - self.header_length
    }

    /// MPEG-4 audio object type (AAC LC = 2).
    pub fn object_type(&self) -> u8 {
        self.profile + 1
    }

    /// Two-byte AudioSpecificConfig describing this stream.
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let asc = ((self.object_type() as u16) << 11)
            | ((self.frequency_index as u16) << 7)
            | ((self.channel_config as u16) << 3);
        asc.to_be_bytes()
    }

    /// Build a header; used by muxing tests and synthetic streams.
    pub fn encode(&self) -> [u8; 7] {
        let len = self.frame_length;
        let protection_absent = if self.has_crc { 0 } else { 1 };
        [
            0xFF,
            0xF0 | protection_absent,
            (self.profile << 6) | (self.frequency_index << 2) | (self.channel_config >> 2),
            ((self.channel_config & 0x03) << 6) | ((len >> 11) as u8 & 0x03),
            (len >> 3) as u8,
            (((len & 0x07) as u8) << 5) | 0x1F,
            0xFC | ((self.raw_blocks - 1) & 0x03),
        ]
    }
}

/// Stream description handed to the configuration handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfiguration {
    pub codec: String,
    pub profile: u8,
    pub sample_rate: u32,
    pub channels: u8,
    pub audio_specific_config: [u8; 2],
}

impl From<&AacFrameHeader> for AudioConfiguration {
    fn from(header: &AacFrameHeader) -> Self {
        Self {
            codec: format!("mp4a.40.{}", header.object_type()),
            profile: header.object_type(),
            sample_rate: header.sample_rate,
            channels: header.channel_config,
            audio_specific_config: header.audio_specific_config(),
        }
    }
}
