//! Image buffers and frame pairs produced by a recording.

use image::{ImageBuffer, Luma};

/// Encoding of a color image buffer as captured by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    /// Motion-JPEG: each buffer is a complete JPEG bitstream.
    Mjpg,
    /// Uncompressed 8-bit BGRA, 4 bytes per pixel.
    Bgra32,
}

impl ColorFormat {
    /// File extension used when the buffer is written verbatim.
    pub fn extension(&self) -> &'static str {
        match self {
            ColorFormat::Mjpg => "jpg",
            ColorFormat::Bgra32 => "raw",
        }
    }
}

/// An owned color image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes; 0 for compressed formats.
    pub stride: u32,
    pub format: ColorFormat,
    pub device_timestamp_usec: u64,
    pub data: Vec<u8>,
}

impl ColorImage {
    /// Wrap a JPEG bitstream.
    pub fn mjpg(width: u32, height: u32, device_timestamp_usec: u64, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: 0,
            format: ColorFormat::Mjpg,
            device_timestamp_usec,
            data,
        }
    }

    /// Wrap a tightly packed BGRA buffer.
    pub fn bgra32(width: u32, height: u32, device_timestamp_usec: u64, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width * 4,
            format: ColorFormat::Bgra32,
            device_timestamp_usec,
            data,
        }
    }
}

/// An owned single-channel 16-bit depth image, samples in millimetres.
///
/// A sample of 0 means "no data".
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    pub device_timestamp_usec: u64,
    pub data: Vec<u16>,
}

impl DepthImage {
    /// Allocate a zero-filled image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_timestamp_usec: 0,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Wrap existing samples. Returns `None` if the length does not match.
    pub fn from_samples(
        width: u32,
        height: u32,
        device_timestamp_usec: u64,
        data: Vec<u16>,
    ) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            device_timestamp_usec,
            data,
        })
    }

    /// Row stride in bytes.
    #[inline]
    pub fn stride(&self) -> u32 {
        self.width * 2
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.data.len() * 2
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Borrow the samples as a 16-bit grayscale image view.
    ///
    /// Returns `None` if `data` no longer matches the dimensions.
    pub fn as_luma16(&self) -> Option<ImageBuffer<Luma<u16>, &[u16]>> {
        ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
    }

    /// Clear every sample to "no data" in place, keeping the allocation.
    pub fn reset(&mut self, device_timestamp_usec: u64) {
        self.data.fill(0);
        self.device_timestamp_usec = device_timestamp_usec;
    }
}

/// Infrared image from the depth sensor; same layout as [`DepthImage`]
/// with samples holding raw IR intensity instead of millimetres.
pub type IrImage = DepthImage;

/// One captured instant. Any component may be missing after a sensor drop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramePair {
    pub color: Option<ColorImage>,
    pub depth: Option<DepthImage>,
    pub ir: Option<IrImage>,
}

impl FramePair {
    pub fn new(color: Option<ColorImage>, depth: Option<DepthImage>) -> Self {
        Self {
            color,
            depth,
            ir: None,
        }
    }

    /// Attach the infrared image captured alongside this pair.
    pub fn with_ir(mut self, ir: IrImage) -> Self {
        self.ir = Some(ir);
        self
    }
}

/// One inertial reading: gyroscope in rad/s and accelerometer in m/s²,
/// each with its own device timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    pub gyro_timestamp_usec: u64,
    pub gyro: [f32; 3],
    pub acc_timestamp_usec: u64,
    pub acc: [f32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_image_reset_keeps_allocation() {
        let mut image = DepthImage::from_samples(2, 2, 7, vec![1, 2, 3, 4]).unwrap();
        let ptr = image.data.as_ptr();

        image.reset(42);

        assert_eq!(image.data, vec![0; 4]);
        assert_eq!(image.device_timestamp_usec, 42);
        assert_eq!(image.data.as_ptr(), ptr);
    }

    #[test]
    fn test_depth_image_dimensions() {
        assert!(DepthImage::from_samples(3, 2, 0, vec![0; 5]).is_none());

        let image = DepthImage::from_samples(3, 2, 0, vec![0, 0, 0, 0, 9, 0]).unwrap();
        assert_eq!(image.stride(), 6);
        assert_eq!(image.size_bytes(), 12);
        assert_eq!(image.get(1, 1), 9);

        let view = image.as_luma16().unwrap();
        assert_eq!(view.get_pixel(1, 1).0, [9]);
    }

    #[test]
    fn test_frame_pair_ir_is_optional() {
        let depth = DepthImage::new(1, 1);
        let pair = FramePair::new(None, Some(depth.clone()));
        assert!(pair.ir.is_none());

        let ir = IrImage::from_samples(1, 1, 12, vec![300]).unwrap();
        let pair = pair.with_ir(ir);
        assert_eq!(pair.depth, Some(depth));
        assert_eq!(pair.ir.map(|ir| ir.device_timestamp_usec), Some(12));
    }

    #[test]
    fn test_color_format_extension() {
        assert_eq!(ColorFormat::Mjpg.extension(), "jpg");
        assert_eq!(ColorFormat::Bgra32.extension(), "raw");
    }
}
