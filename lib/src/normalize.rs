//! Conversion between RGB images and the tensors the network consumes.

use crate::Error;
use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

/// Per-channel ImageNet means, in BGR order, that the caffe-style VGG weights
/// were trained with
pub const IMAGENET_BGR_MEANS: [f32; 3] = [103.939, 116.779, 123.68];

/// Describes how pixels are mapped into the network's input convention.
///
/// A normalized value is `pixel - means[c]`, where `c` is the channel in
/// *network* order. When `reverse_channels` is set, network channel 0 is the
/// blue channel of the RGB image.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Normalization {
    pub means: [f32; 3],
    pub reverse_channels: bool,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            means: IMAGENET_BGR_MEANS,
            reverse_channels: true,
        }
    }
}

impl Normalization {
    #[inline]
    fn rgb_channel(self, channel: usize) -> usize {
        if self.reverse_channels {
            2 - channel
        } else {
            channel
        }
    }

    /// The lowest valid normalized value of each network channel
    pub fn min_values(self) -> [f32; 3] {
        let m = self.means;
        [-m[0], -m[1], -m[2]]
    }

    /// The highest valid normalized value of each network channel
    pub fn max_values(self) -> [f32; 3] {
        let m = self.means;
        [255.0 - m[0], 255.0 - m[1], 255.0 - m[2]]
    }

    /// Converts an image into a `(1, 3, height, width)` tensor.
    pub fn to_tensor(self, img: &image::RgbImage, device: &Device) -> Result<Tensor, Error> {
        let (width, height) = img.dimensions();
        let plane = width as usize * height as usize;
        let mut data = vec![0f32; plane * 3];

        for (i, pixel) in img.pixels().enumerate() {
            for channel in 0..3 {
                data[channel * plane + i] =
                    f32::from(pixel[self.rgb_channel(channel)]) - self.means[channel];
            }
        }

        Ok(Tensor::from_vec(
            data,
            (1, 3, height as usize, width as usize),
            device,
        )?)
    }

    /// Reverses `to_tensor`, clamping every value into `[0, 255]` and
    /// rounding to the nearest integer.
    pub fn to_image(self, tensor: &Tensor) -> Result<image::RgbImage, Error> {
        let (batch, channels, height, width) = tensor.dims4()?;
        if batch != 1 || channels != 3 {
            return Err(Error::InputShape(crate::errors::InputShape::new(
                tensor.dims(),
                "expected a single 3 channel image",
            )));
        }

        let values = tensor.flatten_all()?.to_vec1::<f32>()?;
        let plane = width * height;
        let mut rgb = vec![0u8; plane * 3];

        for channel in 0..3 {
            let dst = self.rgb_channel(channel);
            let mean = self.means[channel];

            for (i, value) in values[channel * plane..(channel + 1) * plane]
                .iter()
                .enumerate()
            {
                rgb[i * 3 + dst] = (value + mean).max(0.0).min(255.0).round() as u8;
            }
        }

        image::RgbImage::from_raw(width as u32, height as u32, rgb).ok_or_else(|| {
            Error::InputShape(crate::errors::InputShape::new(
                tensor.dims(),
                "pixel buffer does not match the image dimensions",
            ))
        })
    }

    fn bounds(self, device: &Device) -> Result<(Tensor, Tensor), Error> {
        let min = Tensor::from_vec(self.min_values().to_vec(), (1, 3, 1, 1), device)?;
        let max = Tensor::from_vec(self.max_values().to_vec(), (1, 3, 1, 1), device)?;
        Ok((min, max))
    }

    /// Clamps each channel of a normalized image into the range that maps back
    /// onto `[0, 255]`.
    pub fn clip(self, tensor: &Tensor) -> Result<Tensor, Error> {
        let (min, max) = self.bounds(tensor.device())?;

        Ok(tensor.broadcast_maximum(&min)?.broadcast_minimum(&max)?)
    }

    /// Mixes a normalized image with uniform noise drawn from the valid range
    /// of each channel. A `ratio` of 0 returns the image untouched, 1 returns
    /// pure noise.
    pub fn blend_noise(self, tensor: &Tensor, seed: u64, ratio: f32) -> Result<Tensor, Error> {
        let (_, channels, height, width) = tensor.dims4()?;
        let plane = height * width;
        let mut values = tensor.flatten_all()?.to_vec1::<f32>()?;
        let mut rng = Pcg32::seed_from_u64(seed);

        let (lows, highs) = (self.min_values(), self.max_values());
        for channel in 0..channels.min(3) {
            for value in &mut values[channel * plane..(channel + 1) * plane] {
                let noise = rng.gen_range(lows[channel]..=highs[channel]);
                *value = (1.0 - ratio) * *value + ratio * noise;
            }
        }

        let blended = Tensor::from_vec(values, tensor.dims(), tensor.device())?;
        self.clip(&blended)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn checker() -> image::RgbImage {
        image::RgbImage::from_fn(5, 3, |x, y| {
            image::Rgb([(x * 50) as u8, (y * 100) as u8, ((x + y) * 30) as u8])
        })
    }

    #[test]
    fn round_trip_is_lossless() {
        let norm = Normalization::default();
        let img = checker();

        let tensor = norm.to_tensor(&img, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 3, 5]);

        let back = norm.to_image(&tensor).unwrap();
        assert_eq!(img, back);
    }

    #[test]
    fn channels_are_reordered_and_centered() {
        let norm = Normalization::default();
        let img = image::RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));

        let values = norm
            .to_tensor(&img, &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        // blue first, red last
        assert!((values[0] + 103.939).abs() < 1e-4);
        assert!((values[1] + 116.779).abs() < 1e-4);
        assert!((values[2] - (255.0 - 123.68)).abs() < 1e-4);
    }

    #[test]
    fn clipping_respects_per_channel_bounds() {
        let norm = Normalization::default();
        let wild = Tensor::from_vec(
            vec![-500f32, 500.0, -500.0, 500.0, -500.0, 500.0],
            (1, 3, 1, 2),
            &Device::Cpu,
        )
        .unwrap();

        let clipped = norm
            .clip(&wild)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        let (min, max) = (norm.min_values(), norm.max_values());
        for channel in 0..3 {
            assert_eq!(clipped[channel * 2], min[channel]);
            assert_eq!(clipped[channel * 2 + 1], max[channel]);
        }
    }

    #[test]
    fn denormalizing_clamps_out_of_range_values() {
        let norm = Normalization {
            means: [0.0; 3],
            reverse_channels: false,
        };
        let tensor =
            Tensor::from_vec(vec![-20f32, 300.0, 127.6], (1, 3, 1, 1), &Device::Cpu).unwrap();

        let img = norm.to_image(&tensor).unwrap();
        assert_eq!(img.get_pixel(0, 0), &image::Rgb([0, 255, 128]));
    }

    #[test]
    fn noise_is_seeded_and_bounded() {
        let norm = Normalization::default();
        let base = norm.to_tensor(&checker(), &Device::Cpu).unwrap();

        let a = norm.blend_noise(&base, 7, 1.0).unwrap();
        let b = norm.blend_noise(&base, 7, 1.0).unwrap();
        let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);

        let untouched = norm
            .blend_noise(&base, 7, 0.0)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(
            untouched,
            base.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }
}
