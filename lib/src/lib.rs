// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `neural-style` is a library for neural style transfer: it repaints a
//! content image with the textures and colors of a style image.
//!
//! The working image starts out as the content image and is improved by
//! gradient descent on its pixels. Every iteration runs it through a frozen
//! pretrained network (a [`FeatureExtractor`], usually [`Vgg19`]) and scores
//! it with a weighted sum of
//!
//! 1. a style loss, comparing [Gram matrices](gram_matrix) of the style layers
//!    with those of the style image, and
//! 2. a content loss, comparing the raw content layer activations with those
//!    of the content image.
//!
//! First, you build a `Session` via a `SessionBuilder`, which follows the builder pattern. Calling
//! `build` on the `SessionBuilder` loads both images and computes the target features.
//!
//! `Session` has a `run()` method that optimizes the image and returns the
//! lowest-loss result as a `StyledImage`, which you can save, stream, or inspect.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use neural_style::{candle_core::Device, LayerSelection, Session, Vgg19};
//!
//! // Load the network once, it can be shared by any number of sessions
//! let vgg = Arc::new(
//!     Vgg19::load("vgg19.safetensors", LayerSelection::default(), &Device::Cpu)
//!         .expect("failed to load VGG19"),
//! );
//!
//! let session = Session::builder()
//!     .content_image(&"imgs/content.jpg")
//!     .style_image(&"imgs/style.jpg")
//!     .iterations(200)
//!     .extractor(vgg)
//!     .build().expect("failed to build session");
//!
//! let styled = session.run(None).expect("style transfer diverged");
//! println!("best loss {}", styled.loss());
//!
//! styled.save("out/styled.jpg").expect("failed to save styled image");
//! ```
mod adam;
mod errors;
mod features;
mod gram;
mod loss;
mod normalize;
pub mod session;
mod utils;
mod vgg;

pub use candle_core;
pub use image;
use std::path::Path;

pub use adam::{Adam, AdamParams};
pub use errors::{Error, InputShape, InvalidRange, NonFiniteLoss};
pub use features::{check_image_shape, FeatureExtractor, Features, LayerSelection};
pub use gram::gram_matrix;
pub use loss::{LossBreakdown, LossEvaluator, LossTensors, LossWeights, TargetFeatures};
pub use normalize::{Normalization, IMAGENET_BGR_MEANS};
pub use session::{
    BestSnapshot, CancelToken, InitImage, ProgressUpdate, Session, SessionBuilder, StyleProgress,
};
pub use utils::{fit_long_side, load_dynamic_image, load_image, ImageSource};
pub use vgg::Vgg19;

/// Simple dimensions struct
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// The best image found by a `Session::run()`
pub struct StyledImage {
    pub(crate) image: image::RgbImage,
    pub(crate) loss: f32,
    pub(crate) iterations: u32,
    pub(crate) cancelled: bool,
}

impl StyledImage {
    /// The loss of the returned image
    pub fn loss(&self) -> f32 {
        self.loss
    }

    /// The number of iterations that were completed
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Whether the run was stopped early by its `CancelToken`
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Saves the image to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        if let Some(parent_path) = path.parent() {
            std::fs::create_dir_all(&parent_path)?;
        }

        self.image.save(&path)?;
        Ok(())
    }

    /// Writes the image to the specified stream
    pub fn write<W: std::io::Write>(
        self,
        writer: &mut W,
        fmt: image::ImageOutputFormat,
    ) -> Result<(), Error> {
        // encoders need to seek, which most streams can't
        let mut encoded = std::io::Cursor::new(Vec::new());
        self.into_image().write_to(&mut encoded, fmt)?;

        writer.write_all(encoded.get_ref())?;
        Ok(())
    }

    /// Returns the styled output image
    pub fn into_image(self) -> image::DynamicImage {
        image::DynamicImage::ImageRgb8(self.image)
    }
}

impl AsRef<image::RgbImage> for StyledImage {
    fn as_ref(&self) -> &image::RgbImage {
        &self.image
    }
}
