use crate::{
    errors::InputShape,
    features::{FeatureExtractor, Features},
    gram::gram_matrix,
    Error,
};
use candle_core::{DType, Tensor, Var};

/// How strongly style and content mismatches count toward the total loss.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LossWeights {
    pub style: f64,
    pub content: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        // content loss is typically orders of magnitude smaller than style loss
        Self {
            style: 1e-2,
            content: 1e3,
        }
    }
}

/// The fixed quantities a run is scored against: Gram matrices of the style
/// image's style layers and raw activations of the content image's content
/// layers.
#[derive(Clone, Debug)]
pub struct TargetFeatures {
    style_grams: Vec<Tensor>,
    content: Vec<Tensor>,
}

impl TargetFeatures {
    pub fn new(style_image: &Features, content_image: &Features) -> Result<Self, Error> {
        let style_grams = style_image
            .style
            .iter()
            .map(|act| gram_matrix(&act.detach()))
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            style_grams,
            content: content_image.content.iter().map(Tensor::detach).collect(),
        })
    }

    /// Runs the extractor over both images and keeps what the loss needs
    pub fn from_images(
        extractor: &dyn FeatureExtractor,
        content_image: &Tensor,
        style_image: &Tensor,
    ) -> Result<Self, Error> {
        let style = extractor.extract(style_image)?;
        let content = extractor.extract(content_image)?;

        Self::new(&style, &content)
    }

    pub fn style_grams(&self) -> &[Tensor] {
        &self.style_grams
    }

    pub fn content(&self) -> &[Tensor] {
        &self.content
    }
}

/// The differentiable pieces of a loss evaluation. `style` and `content` are
/// already multiplied by their weights, so `total = style + content`.
pub struct LossTensors {
    pub total: Tensor,
    pub style: Tensor,
    pub content: Tensor,
}

impl LossTensors {
    pub fn values(&self) -> Result<LossBreakdown, Error> {
        Ok(LossBreakdown {
            total: self.total.to_scalar::<f32>()?,
            style: self.style.to_scalar::<f32>()?,
            content: self.content.to_scalar::<f32>()?,
        })
    }
}

/// Scalar loss values of one evaluation
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LossBreakdown {
    pub total: f32,
    /// The weighted style component
    pub style: f32,
    /// The weighted content component
    pub content: f32,
}

impl LossBreakdown {
    pub fn is_finite(&self) -> bool {
        self.total.is_finite() && self.style.is_finite() && self.content.is_finite()
    }
}

fn mean_squared_error(current: &Tensor, target: &Tensor) -> Result<Tensor, Error> {
    if current.dims() != target.dims() {
        return Err(Error::InputShape(InputShape::new(
            current.dims(),
            format!("expected the target's shape {:?}", target.dims()),
        )));
    }

    Ok(current.sub(target)?.sqr()?.mean_all()?)
}

/// Scores an image's activations against a fixed set of targets.
pub struct LossEvaluator {
    targets: TargetFeatures,
    weights: LossWeights,
}

impl LossEvaluator {
    pub fn new(targets: TargetFeatures, weights: LossWeights) -> Self {
        Self { targets, weights }
    }

    /// Computes the weighted style + content loss of `features`.
    ///
    /// Each style layer contributes the mean squared difference of its Gram
    /// matrix and the target's, divided by the number of style layers. Each
    /// content layer contributes the mean squared difference of the raw
    /// activations.
    pub fn loss(&self, features: &Features) -> Result<LossTensors, Error> {
        let style_layers = self.targets.style_grams.len();
        let content_layers = self.targets.content.len();

        if features.style.len() != style_layers || features.content.len() != content_layers {
            return Err(Error::InputShape(InputShape::new(
                &[features.style.len(), features.content.len()],
                format!(
                    "expected {} style and {} content activations",
                    style_layers, content_layers
                ),
            )));
        }

        let first = features
            .style
            .first()
            .or_else(|| features.content.first())
            .ok_or_else(|| {
                Error::InputShape(InputShape::new(&[0, 0], "no activations to score"))
            })?;
        let zero = Tensor::zeros((), DType::F32, first.device())?;

        let mut style = zero.clone();
        for (current, target) in features.style.iter().zip(&self.targets.style_grams) {
            let layer = mean_squared_error(&gram_matrix(current)?, target)?;
            style = style.add(&layer.affine(1.0 / style_layers as f64, 0.0)?)?;
        }

        let mut content = zero;
        for (current, target) in features.content.iter().zip(&self.targets.content) {
            content = content.add(&mean_squared_error(current, target)?)?;
        }

        let style = style.affine(self.weights.style, 0.0)?;
        let content = content.affine(self.weights.content, 0.0)?;
        let total = style.add(&content)?;

        Ok(LossTensors {
            total,
            style,
            content,
        })
    }

    /// Evaluates the loss of `image` and its gradient with respect to the
    /// image's pixels. The gradient has the same shape as the image; it is all
    /// zeros if the loss doesn't depend on the image.
    pub fn loss_and_gradient(
        &self,
        extractor: &dyn FeatureExtractor,
        image: &Var,
    ) -> Result<(LossBreakdown, Tensor), Error> {
        let features = extractor.extract(image.as_tensor())?;
        let loss = self.loss(&features)?;

        let grads = loss.total.backward()?;
        let gradient = match grads.get(image.as_tensor()) {
            Some(grad) => grad.clone(),
            None => image.as_tensor().zeros_like()?,
        };

        Ok((loss.values()?, gradient))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    fn act(values: &[f32], dims: (usize, usize, usize, usize)) -> Tensor {
        Tensor::from_vec(values.to_vec(), dims, &Device::Cpu).unwrap()
    }

    fn features(style: Vec<Tensor>, content: Vec<Tensor>) -> Features {
        Features { style, content }
    }

    #[test]
    fn identical_features_have_zero_loss() {
        let s = act(&[1.0, -2.0, 3.0, 0.5], (1, 2, 1, 2));
        let c = act(&[4.0, 5.0, 6.0], (1, 3, 1, 1));
        let f = features(vec![s], vec![c]);

        let evaluator = LossEvaluator::new(TargetFeatures::new(&f, &f).unwrap(), LossWeights::default());
        let loss = evaluator.loss(&f).unwrap().values().unwrap();

        assert_eq!(loss.total, 0.0);
        assert_eq!(loss.style, 0.0);
        assert_eq!(loss.content, 0.0);
    }

    #[test]
    fn weights_and_layer_averaging() {
        // style targets: two single channel layers, gram = mean of squares
        let target = features(
            vec![act(&[1.0, 1.0], (1, 1, 1, 2)), act(&[2.0], (1, 1, 1, 1))],
            vec![act(&[0.0, 0.0], (1, 2, 1, 1))],
        );
        let current = features(
            vec![act(&[3.0, 3.0], (1, 1, 1, 2)), act(&[2.0], (1, 1, 1, 1))],
            vec![act(&[1.0, 3.0], (1, 2, 1, 1))],
        );

        let weights = LossWeights {
            style: 0.5,
            content: 2.0,
        };
        let evaluator = LossEvaluator::new(TargetFeatures::new(&target, &target).unwrap(), weights);
        let loss = evaluator.loss(&current).unwrap().values().unwrap();

        // layer 1: gram 9 vs 1 -> 64, averaged over 2 layers -> 32; layer 2: 0
        assert!((loss.style - 0.5 * 32.0).abs() < 1e-4);
        // content: mean(1, 9) = 5
        assert!((loss.content - 2.0 * 5.0).abs() < 1e-4);
        assert!((loss.total - (16.0 + 10.0)).abs() < 1e-4);
    }

    #[test]
    fn mismatched_activations_are_rejected() {
        let target = features(vec![act(&[1.0], (1, 1, 1, 1))], vec![act(&[1.0], (1, 1, 1, 1))]);
        let evaluator =
            LossEvaluator::new(TargetFeatures::new(&target, &target).unwrap(), LossWeights::default());

        let wrong_shape = features(
            vec![act(&[1.0], (1, 1, 1, 1))],
            vec![act(&[1.0, 2.0], (1, 2, 1, 1))],
        );
        assert!(matches!(evaluator.loss(&wrong_shape), Err(Error::InputShape(_))));

        let missing = features(vec![act(&[1.0], (1, 1, 1, 1))], vec![]);
        match evaluator.loss(&missing) {
            Err(Error::InputShape(shape)) => assert_eq!(shape.dims(), &[1, 0]),
            _ => panic!("a missing content activation must be a shape error"),
        }
    }
}
