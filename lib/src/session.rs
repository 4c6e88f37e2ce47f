use crate::{
    adam::{Adam, AdamParams},
    errors::{self, NonFiniteLoss},
    features::FeatureExtractor,
    loss::{LossBreakdown, LossEvaluator, LossWeights, TargetFeatures},
    normalize::Normalization,
    utils::{load_image, ImageSource},
    Dims, Error, StyledImage,
};
use candle_core::{Tensor, Var};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// The image the optimization starts from
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InitImage {
    /// The content image itself
    Content,
    /// The content image mixed with seeded uniform noise. `ratio` is the
    /// weight of the noise, from 0 (no noise) to 1 (noise only).
    Noise { seed: u64, ratio: f32 },
}

impl Default for InitImage {
    fn default() -> Self {
        Self::Content
    }
}

struct Parameters {
    iterations: u32,
    max_size: Option<u32>,
    weights: LossWeights,
    adam: AdamParams,
    normalization: Normalization,
    init: InitImage,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            iterations: 1000,
            max_size: Some(512),
            weights: LossWeights::default(),
            adam: AdamParams::default(),
            normalization: Normalization::default(),
            init: InitImage::default(),
        }
    }
}

/// The lowest-loss image seen so far, along with its loss.
#[derive(Debug, Clone)]
pub struct BestSnapshot {
    loss: f32,
    image: Option<image::RgbImage>,
}

impl Default for BestSnapshot {
    fn default() -> Self {
        Self {
            loss: f32::INFINITY,
            image: None,
        }
    }
}

impl BestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded loss, infinite until something is recorded
    pub fn loss(&self) -> f32 {
        self.loss
    }

    pub fn image(&self) -> Option<&image::RgbImage> {
        self.image.as_ref()
    }

    /// Replaces the snapshot if `loss` is strictly lower than the recorded
    /// one. `snapshot` is only called in that case. Returns whether the
    /// snapshot was replaced.
    pub fn offer<F>(&mut self, loss: f32, snapshot: F) -> Result<bool, Error>
    where
        F: FnOnce() -> Result<image::RgbImage, Error>,
    {
        if loss.is_nan() || loss >= self.loss {
            return Ok(false);
        }

        // loss and image must stay paired, so render before touching either
        let image = snapshot()?;
        self.loss = loss;
        self.image = Some(image);
        Ok(true)
    }

    /// Returns the loss and image, or `None` if nothing was ever recorded
    pub fn into_parts(self) -> Option<(f32, image::RgbImage)> {
        let loss = self.loss;
        self.image.map(|img| (loss, img))
    }

    fn into_recorded(self) -> Option<Self> {
        if self.image.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

/// A flag that stops a running session between two iterations.
///
/// Clones share the same flag, so one can be handed to another thread.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Neural style transfer session.
///
/// Calling `run()` optimizes the working image and returns the best result,
/// consuming the session in the process. You can provide a `StyleProgress`
/// implementation to get an update after every iteration.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use neural_style::{candle_core::Device, LayerSelection, Session, Vgg19};
///
/// let vgg = Vgg19::load("vgg19.safetensors", LayerSelection::default(), &Device::Cpu)
///     .expect("failed to load weights");
///
/// let session = Session::builder()
///     .content_image(&"imgs/content.jpg")
///     .style_image(&"imgs/style.jpg")
///     .iterations(100)
///     .extractor(Arc::new(vgg))
///     .build().expect("failed to build session");
///
/// let styled = session.run(None).expect("style transfer failed");
/// styled.save("out/styled.png").expect("failed to save image");
/// ```
pub struct Session {
    extractor: Arc<dyn FeatureExtractor>,
    evaluator: LossEvaluator,
    initial: Tensor,
    size: Dims,
    params: Parameters,
    cancel: Option<CancelToken>,
}

impl Session {
    /// Creates a new session with default parameters.
    pub fn builder<'a>() -> SessionBuilder<'a> {
        SessionBuilder::default()
    }

    /// The size of the content image, which is also the size of the output
    pub fn size(&self) -> Dims {
        self.size
    }

    /// Runs the optimization and returns the lowest-loss image it saw.
    ///
    /// Each iteration scores the working image, records it if it beats the
    /// best loss so far, then takes one Adam step and clips the pixels back
    /// into range. The loop ends after the configured number of iterations,
    /// or earlier if the cancel token is triggered. If the loss ever becomes
    /// non-finite the run stops with `Error::NonFiniteLoss`, which still
    /// carries the best snapshot recorded until then.
    ///
    /// An image is only recorded together with the loss computed on it, so the
    /// step taken during the last iteration is never scored and can't end up
    /// in the result.
    pub fn run(self, mut progress: Option<Box<dyn StyleProgress>>) -> Result<StyledImage, Error> {
        let norm = self.params.normalization;
        let total = self.params.iterations as usize;

        let working = Var::from_tensor(&self.initial)?;
        let mut adam = Adam::new(self.params.adam, working.as_tensor())?;
        let mut best = BestSnapshot::new();
        let mut completed = 0;
        let mut cancelled = false;

        for iteration in 0..total {
            let (loss, grad) = self
                .evaluator
                .loss_and_gradient(&*self.extractor, &working)?;

            if !loss.is_finite() || !all_finite(&grad)? {
                log::warn!(
                    "loss became non-finite at iteration {} ({:?}), best loss so far {}",
                    iteration,
                    loss,
                    best.loss()
                );

                return Err(Error::NonFiniteLoss(NonFiniteLoss {
                    iteration,
                    best: best.into_recorded(),
                }));
            }

            // the snapshot must be taken before the step overwrites the pixels
            if best.offer(loss.total, || norm.to_image(working.as_tensor()))? {
                log::trace!("new best loss {} at iteration {}", loss.total, iteration);
            }

            let stepped = adam.step(working.as_tensor(), &grad)?;
            working.set(&norm.clip(&stepped)?)?;
            completed = iteration + 1;

            log::debug!(
                "iteration {}/{}: total {} style {} content {}",
                completed,
                total,
                loss.total,
                loss.style,
                loss.content
            );

            if let Some(ref mut progress) = progress {
                progress.update(ProgressUpdate {
                    iteration,
                    total,
                    loss,
                    best_loss: best.loss(),
                    working: working.as_tensor(),
                });
            }

            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    log::warn!("cancelled after {} of {} iterations", completed, total);
                    cancelled = true;
                    break;
                }
            }
        }

        let (loss, image) = best.into_parts().ok_or_else(|| {
            Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: u32::MAX as f32,
                value: completed as f32,
                name: "iterations",
            })
        })?;

        log::info!(
            "finished {} iterations, best loss {}",
            completed,
            loss
        );

        Ok(StyledImage {
            image,
            loss,
            iterations: completed as u32,
            cancelled,
        })
    }
}

fn all_finite(tensor: &Tensor) -> Result<bool, Error> {
    Ok(tensor
        .flatten_all()?
        .to_vec1::<f32>()?
        .iter()
        .all(|v| v.is_finite()))
}

/// Builds a session by setting parameters and adding input images, calling
/// `build` will check all of the provided inputs and compute the target
/// features the session optimizes toward
#[derive(Default)]
pub struct SessionBuilder<'a> {
    content: Option<ImageSource<'a>>,
    style: Option<ImageSource<'a>>,
    extractor: Option<Arc<dyn FeatureExtractor>>,
    cancel: Option<CancelToken>,
    params: Parameters,
}

impl<'a> SessionBuilder<'a> {
    /// Creates a new `SessionBuilder`, can also be created via
    /// `Session::builder()`
    pub fn new() -> Self {
        Self::default()
    }

    /// The image whose structure is kept. The output has its dimensions.
    pub fn content_image<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.content = Some(img.into());
        self
    }

    /// The image whose texture and colors are transferred
    pub fn style_image<I: Into<ImageSource<'a>>>(mut self, img: I) -> Self {
        self.style = Some(img.into());
        self
    }

    /// The frozen network used to score images. It can be shared between
    /// any number of sessions.
    pub fn extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Resize both input images so their longest side is `size` pixels,
    /// keeping the aspect ratio.
    ///
    /// Default: 512
    pub fn max_size(mut self, size: u32) -> Self {
        self.params.max_size = Some(size);
        self
    }

    /// Use the input images at their original size
    pub fn keep_input_size(mut self) -> Self {
        self.params.max_size = None;
        self
    }

    /// The number of gradient steps to take. This is an upper bound, there
    /// is no convergence check.
    ///
    /// Default: 1000
    pub fn iterations(mut self, count: u32) -> Self {
        self.params.iterations = count;
        self
    }

    /// Default: 0.01
    pub fn style_weight(mut self, weight: f64) -> Self {
        self.params.weights.style = weight;
        self
    }

    /// Default: 1000.0
    pub fn content_weight(mut self, weight: f64) -> Self {
        self.params.weights.content = weight;
        self
    }

    pub fn loss_weights(mut self, weights: LossWeights) -> Self {
        self.params.weights = weights;
        self
    }

    /// The Adam step size, in pixel units.
    ///
    /// Default: 5.0
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.params.adam.learning_rate = rate;
        self
    }

    /// Sets all of the Adam hyper-parameters at once.
    ///
    /// Default: learning rate 5.0, beta1 0.99, beta2 0.999, epsilon 0.1
    pub fn adam(mut self, params: AdamParams) -> Self {
        self.params.adam = params;
        self
    }

    /// How pixels map onto the network's input. This must match the
    /// convention the extractor's weights were trained with.
    ///
    /// Default: BGR with the ImageNet means subtracted
    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.params.normalization = normalization;
        self
    }

    /// Default: `InitImage::Content`
    pub fn init_image(mut self, init: InitImage) -> Self {
        self.params.init = init;
        self
    }

    /// A token that stops `run` after the iteration during which it was
    /// cancelled. The best result up to that point is still returned.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or input
    /// images were specified.
    pub fn build(self) -> Result<Session, Error> {
        self.check_parameters_validity()?;

        let extractor = self
            .extractor
            .ok_or(Error::MissingInput("feature extractor"))?;
        let content = self.content.ok_or(Error::MissingInput("content image"))?;
        let style = self.style.ok_or(Error::MissingInput("style image"))?;

        let norm = self.params.normalization;
        let device = extractor.device().clone();

        let content = load_image(content, self.params.max_size)?;
        let style = load_image(style, self.params.max_size)?;
        let size = Dims::new(content.width(), content.height());

        let content = norm.to_tensor(&content, &device)?;
        let style = norm.to_tensor(&style, &device)?;

        let targets = TargetFeatures::from_images(&*extractor, &content, &style)?;

        let initial = match self.params.init {
            InitImage::Content => content,
            InitImage::Noise { seed, ratio } => norm.blend_noise(&content, seed, ratio)?,
        };

        log::info!(
            "session ready: {}x{} output, {} style and {} content layers, {} iterations",
            size.width,
            size.height,
            targets.style_grams().len(),
            targets.content().len(),
            self.params.iterations
        );

        Ok(Session {
            evaluator: LossEvaluator::new(targets, self.params.weights),
            extractor,
            initial,
            size,
            params: self.params,
            cancel: self.cancel,
        })
    }

    fn check_parameters_validity(&self) -> Result<(), Error> {
        let params = &self.params;

        if params.iterations == 0 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: u32::MAX as f32,
                value: 0.0,
                name: "iterations",
            }));
        }

        if let Some(size) = params.max_size {
            if size == 0 {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 1.0,
                    max: u32::MAX as f32,
                    value: 0.0,
                    name: "max-size",
                }));
            }
        }

        let positive = [
            ("style-weight", params.weights.style),
            ("content-weight", params.weights.content),
            ("learning-rate", params.adam.learning_rate),
            ("epsilon", params.adam.epsilon),
        ];
        for (name, value) in positive.iter() {
            if !(*value > 0.0 && value.is_finite()) {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: f32::MIN_POSITIVE,
                    max: f32::MAX,
                    value: *value as f32,
                    name: *name,
                }));
            }
        }

        for (name, value) in [("beta1", params.adam.beta1), ("beta2", params.adam.beta2)].iter() {
            if !(*value >= 0.0 && *value < 1.0) {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 0.0,
                    max: 1.0,
                    value: *value as f32,
                    name: *name,
                }));
            }
        }

        if let InitImage::Noise { ratio, .. } = params.init {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(Error::InvalidRange(errors::InvalidRange {
                    min: 0.0,
                    max: 1.0,
                    value: ratio,
                    name: "noise-ratio",
                }));
            }
        }

        Ok(())
    }
}

/// The state of the optimization after one iteration
pub struct ProgressUpdate<'a> {
    /// Zero based index of the iteration that just finished
    pub iteration: usize,
    /// The number of iterations the run was configured with
    pub total: usize,
    /// The loss of the image evaluated during this iteration
    pub loss: LossBreakdown,
    /// The lowest loss recorded so far
    pub best_loss: f32,
    /// The normalized working image, after the step and clipping
    pub working: &'a Tensor,
}

/// Allows the session to update external callers with the current
/// progress of the optimization
pub trait StyleProgress {
    fn update(&mut self, info: ProgressUpdate<'_>);
}

impl<G> StyleProgress for G
where
    G: FnMut(ProgressUpdate<'_>) + Send,
{
    fn update(&mut self, info: ProgressUpdate<'_>) {
        self(info)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pixel(v: u8) -> Result<image::RgbImage, Error> {
        Ok(image::RgbImage::from_pixel(1, 1, image::Rgb([v, v, v])))
    }

    #[test]
    fn best_snapshot_only_moves_down() {
        let mut best = BestSnapshot::new();
        assert!(best.loss().is_infinite());
        assert!(best.image().is_none());

        assert!(best.offer(10.0, || pixel(1)).unwrap());
        assert!(!best.offer(10.0, || pixel(2)).unwrap());
        assert!(!best.offer(12.0, || pixel(3)).unwrap());
        assert!(!best.offer(f32::NAN, || pixel(4)).unwrap());
        assert!(best.offer(4.0, || pixel(5)).unwrap());

        let (loss, img) = best.into_parts().unwrap();
        assert_eq!(loss, 4.0);
        assert_eq!(img.get_pixel(0, 0)[0], 5);
    }

    #[test]
    fn rejected_offers_never_render() {
        let mut best = BestSnapshot::new();
        best.offer(1.0, || pixel(0)).unwrap();

        let rendered = best.offer(2.0, || panic!("should not render")).unwrap();
        assert!(!rendered);
    }

    #[test]
    fn failed_snapshot_keeps_previous_pair() {
        let mut best = BestSnapshot::new();
        best.offer(3.0, || pixel(9)).unwrap();

        let failed = best.offer(1.0, || Err(Error::MissingInput("pixels")));
        assert!(failed.is_err());
        assert_eq!(best.loss(), 3.0);
        assert_eq!(best.image().unwrap().get_pixel(0, 0)[0], 9);
    }

    #[test]
    fn empty_snapshot_has_no_parts() {
        assert!(BestSnapshot::new().into_parts().is_none());
        assert!(BestSnapshot::new().into_recorded().is_none());
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());

        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn parameter_validation() {
        let invalid = [
            Session::builder().iterations(0),
            Session::builder().max_size(0),
            Session::builder().style_weight(0.0),
            Session::builder().content_weight(-1.0),
            Session::builder().learning_rate(f64::NAN),
            Session::builder().adam(AdamParams {
                beta1: 1.0,
                ..AdamParams::default()
            }),
            Session::builder().init_image(InitImage::Noise {
                seed: 0,
                ratio: 1.5,
            }),
        ];

        for builder in invalid.iter() {
            assert!(matches!(
                builder.check_parameters_validity(),
                Err(Error::InvalidRange(_))
            ));
        }

        assert!(Session::builder().check_parameters_validity().is_ok());
    }

    #[test]
    fn missing_inputs_are_reported() {
        assert!(matches!(
            Session::builder().build(),
            Err(Error::MissingInput("feature extractor"))
        ));
    }
}
