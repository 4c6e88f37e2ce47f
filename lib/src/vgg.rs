//! A VGG19 feature extractor.
//!
//! The network expects caffe-style inputs: BGR channel order, ImageNet means
//! subtracted, values in the 0-255 range (see [`Normalization`](crate::Normalization)).
//! Weights are read from a safetensors file using torchvision's naming,
//! `features.{index}.weight` with `(out, in, 3, 3)` kernels and
//! `features.{index}.bias`, so Keras ImageNet weights must have their kernels
//! transposed when exported.

use crate::{
    errors::InputShape,
    features::{check_image_shape, FeatureExtractor, LayerSelection},
    Error,
};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use std::path::Path;

struct ConvSpec {
    block: usize,
    index_in_block: usize,
    in_channels: usize,
    out_channels: usize,
    /// Position in torchvision's `features` sequential
    torch_index: usize,
}

const fn conv(
    block: usize,
    index_in_block: usize,
    in_channels: usize,
    out_channels: usize,
    torch_index: usize,
) -> ConvSpec {
    ConvSpec {
        block,
        index_in_block,
        in_channels,
        out_channels,
        torch_index,
    }
}

const VGG19_CONVS: [ConvSpec; 16] = [
    conv(1, 1, 3, 64, 0),
    conv(1, 2, 64, 64, 2),
    conv(2, 1, 64, 128, 5),
    conv(2, 2, 128, 128, 7),
    conv(3, 1, 128, 256, 10),
    conv(3, 2, 256, 256, 12),
    conv(3, 3, 256, 256, 14),
    conv(3, 4, 256, 256, 16),
    conv(4, 1, 256, 512, 19),
    conv(4, 2, 512, 512, 21),
    conv(4, 3, 512, 512, 23),
    conv(4, 4, 512, 512, 25),
    conv(5, 1, 512, 512, 28),
    conv(5, 2, 512, 512, 30),
    conv(5, 3, 512, 512, 32),
    conv(5, 4, 512, 512, 34),
];

impl ConvSpec {
    fn name(&self) -> String {
        format!("block{}_conv{}", self.block, self.index_in_block)
    }
}

struct ConvLayer {
    name: String,
    block: usize,
    conv: Conv2d,
}

/// VGG19's convolutional trunk, truncated after the deepest selected layer.
///
/// Every layer output is the post-ReLU activation. Blocks are separated by 2x2
/// max pooling. The weights are detached on load, so no gradient is ever
/// computed for them.
pub struct Vgg19 {
    layers: Vec<ConvLayer>,
    selection: LayerSelection,
    /// For each conv layer, the output slots it fills
    slots: Vec<Vec<usize>>,
    device: Device,
}

impl Vgg19 {
    /// All layer names the network provides, shallowest first
    pub fn layer_names() -> Vec<String> {
        VGG19_CONVS.iter().map(ConvSpec::name).collect()
    }

    /// Loads the weights from a safetensors file
    pub fn load<P: AsRef<Path>>(
        path: P,
        selection: LayerSelection,
        device: &Device,
    ) -> Result<Self, Error> {
        let tensors = candle_core::safetensors::load(path.as_ref(), device)?;
        log::info!(
            "loaded {} tensors from {}",
            tensors.len(),
            path.as_ref().display()
        );

        Self::new(VarBuilder::from_tensors(tensors, DType::F32, device), selection)
    }

    /// Builds the network from any `VarBuilder`, which must be rooted so that
    /// `features.0.weight` resolves to the first convolution.
    pub fn new(vb: VarBuilder<'_>, selection: LayerSelection) -> Result<Self, Error> {
        let names = Self::layer_names();

        let mut deepest = 0;
        for wanted in selection.iter() {
            match names.iter().position(|n| n == wanted) {
                Some(pos) => deepest = deepest.max(pos),
                None => {
                    return Err(Error::InvalidLayers(format!(
                        "VGG19 has no layer named '{}'",
                        wanted
                    )))
                }
            }
        }

        let config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let features = vb.pp("features");
        let mut layers = Vec::with_capacity(deepest + 1);
        let mut slots = Vec::with_capacity(deepest + 1);

        for spec in &VGG19_CONVS[..=deepest] {
            let vb = features.pp(spec.torch_index.to_string());
            let weight = vb
                .get_with_hints(
                    (spec.out_channels, spec.in_channels, 3, 3),
                    "weight",
                    candle_nn::init::DEFAULT_KAIMING_NORMAL,
                )?
                .detach();
            let bias = vb
                .get_with_hints(spec.out_channels, "bias", candle_nn::Init::Const(0.0))?
                .detach();

            let name = spec.name();
            slots.push(
                selection
                    .iter()
                    .enumerate()
                    .filter(|(_, wanted)| *wanted == name)
                    .map(|(slot, _)| slot)
                    .collect(),
            );

            layers.push(ConvLayer {
                name,
                block: spec.block,
                conv: Conv2d::new(weight, Some(bias), config),
            });
        }

        log::debug!(
            "built VGG19 up to {} for {} style and {} content layers",
            layers.last().map_or("nothing", |l| l.name.as_str()),
            selection.style().len(),
            selection.content().len()
        );

        Ok(Self {
            layers,
            selection,
            slots,
            device: vb.device().clone(),
        })
    }

    /// The smallest side length an image must have to reach the deepest
    /// selected layer
    pub fn min_input_size(&self) -> usize {
        let deepest_block = self.layers.last().map_or(1, |l| l.block);
        1 << (deepest_block - 1)
    }
}

impl FeatureExtractor for Vgg19 {
    fn layers(&self) -> &LayerSelection {
        &self.selection
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn activations(&self, image: &Tensor) -> Result<Vec<Tensor>, Error> {
        let (height, width) = check_image_shape(image)?;

        let min_size = self.min_input_size();
        if height < min_size || width < min_size {
            return Err(Error::InputShape(InputShape::new(
                image.dims(),
                format!(
                    "each side must be at least {} pixels to reach layer '{}'",
                    min_size,
                    self.layers.last().map_or("", |l| l.name.as_str())
                ),
            )));
        }

        let mut outputs: Vec<Option<Tensor>> = vec![None; self.selection.len()];
        let mut x = image.clone();
        let mut block = 1;

        for (layer, slots) in self.layers.iter().zip(&self.slots) {
            if layer.block != block {
                x = x.max_pool2d(2)?;
                block = layer.block;
            }

            x = layer.conv.forward(&x)?.relu()?;

            for &slot in slots {
                outputs[slot] = Some(x.clone());
            }
        }

        outputs
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::InvalidLayers("a selected layer was never reached".to_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_nn::VarMap;

    fn random_vgg(selection: LayerSelection) -> Vgg19 {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Vgg19::new(vb, selection).unwrap()
    }

    fn image(size: usize) -> Tensor {
        Tensor::randn(0f32, 50.0, (1, 3, size, size), &Device::Cpu).unwrap()
    }

    #[test]
    fn layer_names_follow_blocks() {
        let names = Vgg19::layer_names();
        assert_eq!(names.len(), 16);
        assert_eq!(names[0], "block1_conv1");
        assert_eq!(names[4], "block3_conv1");
        assert_eq!(names[15], "block5_conv4");
    }

    #[test]
    fn default_selection_shapes() {
        let vgg = random_vgg(LayerSelection::default());
        assert_eq!(vgg.min_input_size(), 16);

        let acts = vgg.activations(&image(32)).unwrap();
        let dims: Vec<_> = acts.iter().map(|a| a.dims().to_vec()).collect();

        assert_eq!(
            dims,
            vec![
                vec![1, 64, 32, 32],
                vec![1, 128, 16, 16],
                vec![1, 256, 8, 8],
                vec![1, 512, 4, 4],
                vec![1, 512, 2, 2],
                vec![1, 512, 2, 2],
            ]
        );
    }

    #[test]
    fn truncates_after_deepest_layer() {
        let selection = LayerSelection::new(vec!["block1_conv1"], vec!["block2_conv2"]).unwrap();
        let vgg = random_vgg(selection);
        assert_eq!(vgg.layers.len(), 4);
        assert_eq!(vgg.min_input_size(), 2);

        let acts = vgg.activations(&image(6)).unwrap();
        assert_eq!(acts[1].dims(), &[1, 128, 3, 3]);
    }

    #[test]
    fn same_layer_can_fill_two_slots() {
        let selection = LayerSelection::new(vec!["block1_conv2"], vec!["block1_conv2"]).unwrap();
        let acts = random_vgg(selection).activations(&image(4)).unwrap();
        assert_eq!(acts.len(), 2);
        assert_eq!(acts[0].dims(), acts[1].dims());
    }

    #[test]
    fn gradients_only_reach_the_image() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let selection = LayerSelection::new(vec!["block1_conv1"], vec!["block2_conv1"]).unwrap();
        let vgg = Vgg19::new(vb, selection).unwrap();

        let weights = varmap.all_vars();
        assert_eq!(weights.len(), 6);

        let image = candle_core::Var::from_tensor(&image(4)).unwrap();
        let features = vgg.extract(image.as_tensor()).unwrap();

        let mut loss = Tensor::zeros((), DType::F32, &Device::Cpu).unwrap();
        for act in features.style.iter().chain(features.content.iter()) {
            loss = loss.add(&act.sqr().unwrap().mean_all().unwrap()).unwrap();
        }
        let grads = loss.backward().unwrap();

        assert!(grads.get(image.as_tensor()).is_some());
        for var in &weights {
            assert!(grads.get(var.as_tensor()).is_none());
        }
    }

    #[test]
    fn rejects_unknown_layers() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let selection = LayerSelection::new(vec!["block6_conv1"], vec!["block5_conv2"]).unwrap();

        assert!(matches!(
            Vgg19::new(vb, selection),
            Err(Error::InvalidLayers(_))
        ));
    }

    #[test]
    fn rejects_images_that_are_too_small() {
        let vgg = random_vgg(LayerSelection::default());

        assert!(matches!(
            vgg.activations(&image(8)),
            Err(Error::InputShape(_))
        ));

        let gray = Tensor::zeros((1, 1, 32, 32), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(vgg.activations(&gray), Err(Error::InputShape(_))));
    }
}
