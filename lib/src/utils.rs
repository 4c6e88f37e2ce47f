use crate::{errors::InputShape, Dims, Error};
use std::path::Path;

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the session
    Image(image::DynamicImage),
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a> From<image::RgbImage> for ImageSource<'a> {
    fn from(img: image::RgbImage) -> Self {
        Self::Image(image::DynamicImage::ImageRgb8(img))
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

/// Scales `width`x`height` so that its longest side becomes `max_size`,
/// keeping the aspect ratio. Each side is rounded to the nearest pixel and
/// never drops below 1.
pub fn fit_long_side(width: u32, height: u32, max_size: u32) -> Dims {
    let longest = width.max(height).max(1);
    let scale = f64::from(max_size) / f64::from(longest);

    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);

    Dims::new(scaled(width), scaled(height))
}

/// Loads an image as RGB, resizing it so its longest side is `max_size` when
/// one is given. Images without any pixels are rejected.
pub fn load_image(src: ImageSource<'_>, max_size: Option<u32>) -> Result<image::RgbImage, Error> {
    let img = load_dynamic_image(src)?.to_rgb8();

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::InputShape(InputShape::new(
            &[1, 3, height as usize, width as usize],
            "the image is empty",
        )));
    }

    let img = match max_size {
        None => img,
        Some(max_size) => {
            let (width, height) = img.dimensions();
            let size = fit_long_side(width, height, max_size);

            if size.width != width || size.height != height {
                image::imageops::resize(
                    &img,
                    size.width,
                    size.height,
                    image::imageops::FilterType::Lanczos3,
                )
            } else {
                img
            }
        }
    };

    Ok(img)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn long_side_becomes_max_size() {
        assert_eq!(fit_long_side(1024, 768, 512), Dims::new(512, 384));
        assert_eq!(fit_long_side(100, 300, 512), Dims::new(171, 512));
        assert_eq!(fit_long_side(512, 512, 512), Dims::square(512));
    }

    #[test]
    fn degenerate_sides_stay_visible() {
        assert_eq!(fit_long_side(4000, 1, 512), Dims::new(512, 1));
    }

    #[test]
    fn resizes_loaded_images() {
        let img = image::RgbImage::from_pixel(64, 32, image::Rgb([10, 20, 30]));

        let resized = load_image(ImageSource::from(img.clone()), Some(16)).unwrap();
        assert_eq!(resized.dimensions(), (16, 8));

        let untouched = load_image(ImageSource::from(img), None).unwrap();
        assert_eq!(untouched.dimensions(), (64, 32));
    }

    #[test]
    fn empty_images_are_rejected() {
        for (w, h) in [(0, 0), (0, 7), (7, 0)].iter() {
            for max_size in [Some(512), None].iter() {
                let empty = ImageSource::from(image::RgbImage::new(*w, *h));
                assert!(matches!(
                    load_image(empty, *max_size),
                    Err(Error::InputShape(_))
                ));
            }
        }
    }
}
