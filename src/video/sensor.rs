use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FramingError;


/// Fixed-size sensor record at the start of every reassembled disparity frame,
/// immediately followed by the encoded image bytes. Packed, little-endian.
///
/// Layout: `gyro:[f32;3] | accel:[f32;3] | rows:u32 | cols:u32 | image_type:u32 |
/// channels:u32 | reprojection:[f32;16]`
#[derive(Clone, Debug, PartialEq)]
pub struct SensorMetadata {
    pub gyro: [f32; 3],
    pub accel: [f32; 3],
    pub rows: u32,
    pub cols: u32,
    pub image_type: u32,
    pub channels: u32,
    /// 4x4 disparity-to-depth reprojection matrix, row-major.
    pub reprojection: [f32; 16],
}

impl SensorMetadata {
    pub const SIZE: usize = 3 * 4 + 3 * 4 + 4 * 4 + 16 * 4;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        for v in self.gyro {
            buf.put_f32_le(v);
        }
        for v in self.accel {
            buf.put_f32_le(v);
        }
        buf.put_u32_le(self.rows);
        buf.put_u32_le(self.cols);
        buf.put_u32_le(self.image_type);
        buf.put_u32_le(self.channels);
        for v in self.reprojection {
            buf.put_f32_le(v);
        }
        buf.freeze()
    }

    pub fn try_decode(data: &[u8]) -> Result<SensorMetadata, FramingError> {
        if data.len() < Self::SIZE {
            return Err(FramingError::TooShort { actual: data.len(), min: Self::SIZE });
        }

        let mut buf = data;
        let mut gyro = [0f32; 3];
        for v in gyro.iter_mut() {
            *v = buf.get_f32_le();
        }
        let mut accel = [0f32; 3];
        for v in accel.iter_mut() {
            *v = buf.get_f32_le();
        }
        let rows = buf.get_u32_le();
        let cols = buf.get_u32_le();
        let image_type = buf.get_u32_le();
        let channels = buf.get_u32_le();
        let mut reprojection = [0f32; 16];
        for v in reprojection.iter_mut() {
            *v = buf.get_f32_le();
        }

        Ok(SensorMetadata {
            gyro,
            accel,
            rows,
            cols,
            image_type,
            channels,
            reprojection,
        })
    }
}

/// Splits a reassembled disparity byte stream into its sensor record and the encoded
/// image that follows it.
pub fn split_sensor_frame(data: &[u8]) -> Result<(SensorMetadata, Bytes), FramingError> {
    let metadata = SensorMetadata::try_decode(data)?;
    let image = Bytes::copy_from_slice(&data[SensorMetadata::SIZE..]);
    Ok((metadata, image))
}
