use crate::{errors::InputShape, Error};
use candle_core::{Device, Tensor};

/// The names of the layers whose activations describe style, followed by the
/// names of the layers whose activations describe content.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSelection {
    style: Vec<String>,
    content: Vec<String>,
}

impl Default for LayerSelection {
    fn default() -> Self {
        Self {
            style: [
                "block1_conv1",
                "block2_conv1",
                "block3_conv1",
                "block4_conv1",
                "block5_conv1",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            content: vec!["block5_conv2".to_owned()],
        }
    }
}

impl LayerSelection {
    /// Creates a selection, failing if either list is empty, contains an empty
    /// name, or names the same layer twice.
    pub fn new<S, C>(style: S, content: C) -> Result<Self, Error>
    where
        S: IntoIterator,
        S::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let style: Vec<String> = style.into_iter().map(Into::into).collect();
        let content: Vec<String> = content.into_iter().map(Into::into).collect();

        for (kind, names) in [("style", &style), ("content", &content)].iter() {
            if names.is_empty() {
                return Err(Error::InvalidLayers(format!(
                    "at least one {} layer is required",
                    kind
                )));
            }

            for (i, name) in names.iter().enumerate() {
                if name.is_empty() {
                    return Err(Error::InvalidLayers(format!(
                        "{} layer {} has an empty name",
                        kind, i
                    )));
                }

                if names[..i].contains(name) {
                    return Err(Error::InvalidLayers(format!(
                        "{} layer '{}' is listed more than once",
                        kind, name
                    )));
                }
            }
        }

        Ok(Self { style, content })
    }

    pub fn style(&self) -> &[String] {
        &self.style
    }

    pub fn content(&self) -> &[String] {
        &self.content
    }

    /// Total number of requested activations
    pub fn len(&self) -> usize {
        self.style.len() + self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every requested layer, style layers first
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.style
            .iter()
            .chain(self.content.iter())
            .map(String::as_str)
    }
}

/// The activations of one image, split into style and content layers.
#[derive(Clone, Debug)]
pub struct Features {
    pub style: Vec<Tensor>,
    pub content: Vec<Tensor>,
}

impl Features {
    /// Splits an ordered activation list (style layers, then content layers)
    pub fn from_ordered(layers: &LayerSelection, mut activations: Vec<Tensor>) -> Result<Self, Error> {
        if activations.len() != layers.len() {
            return Err(Error::InvalidLayers(format!(
                "{} layers were requested, but {} activations were produced",
                layers.len(),
                activations.len()
            )));
        }

        let content = activations.split_off(layers.style().len());

        Ok(Self {
            style: activations,
            content,
        })
    }
}

/// A frozen network that maps an image to intermediate activations.
///
/// Implementations must never let gradients flow into their own parameters:
/// the only thing an optimizer may differentiate is the input image.
pub trait FeatureExtractor: Send + Sync {
    /// The layers whose activations `activations` returns
    fn layers(&self) -> &LayerSelection;

    /// The device input images must live on
    fn device(&self) -> &Device;

    /// Runs a single forward pass over a `(1, 3, height, width)` image and
    /// returns one activation per selected layer, style layers first, each
    /// shaped `(1, channels, height', width')`.
    fn activations(&self, image: &Tensor) -> Result<Vec<Tensor>, Error>;

    /// Runs `activations` and splits the result into style and content parts
    fn extract(&self, image: &Tensor) -> Result<Features, Error> {
        Features::from_ordered(self.layers(), self.activations(image)?)
    }
}

/// Checks that `image` is a single, non-empty, 3 channel NCHW tensor and
/// returns its height and width.
pub fn check_image_shape(image: &Tensor) -> Result<(usize, usize), Error> {
    let dims = image.dims();
    if dims.len() != 4 {
        return Err(Error::InputShape(InputShape::new(
            dims,
            "expected a (1, 3, height, width) image",
        )));
    }

    if dims[0] != 1 {
        return Err(Error::InputShape(InputShape::new(
            dims,
            "only a single image can be processed at a time",
        )));
    }

    if dims[1] != 3 {
        return Err(Error::InputShape(InputShape::new(
            dims,
            "expected 3 color channels",
        )));
    }

    if dims[2] == 0 || dims[3] == 0 {
        return Err(Error::InputShape(InputShape::new(dims, "the image is empty")));
    }

    Ok((dims[2], dims[3]))
}
