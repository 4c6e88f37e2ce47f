use crate::session::BestSnapshot;
use std::fmt;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) value: f32,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

#[derive(Debug)]
pub struct InputShape {
    pub(crate) dims: Vec<usize>,
    pub(crate) reason: String,
}

impl InputShape {
    /// For feature extractors rejecting an input they can't process
    pub fn new<R: Into<String>>(dims: &[usize], reason: R) -> Self {
        Self {
            dims: dims.to_vec(),
            reason: reason.into(),
        }
    }

    /// The dimensions of the offending tensor
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor of shape {:?} is not usable: {}", self.dims, self.reason)
    }
}

/// The loss, or its gradient, stopped being a finite number.
///
/// The best result recorded before the failure is kept, so the work done up
/// to that point is not lost.
#[derive(Debug)]
pub struct NonFiniteLoss {
    pub(crate) iteration: usize,
    pub(crate) best: Option<BestSnapshot>,
}

impl NonFiniteLoss {
    /// The iteration during which the loss went non-finite
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn best(&self) -> Option<&BestSnapshot> {
        self.best.as_ref()
    }

    /// The lowest-loss snapshot recorded before the failure, if any
    pub fn into_best(self) -> Option<BestSnapshot> {
        self.best
    }
}

impl fmt::Display for NonFiniteLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the loss became non-finite during iteration {}",
            self.iteration
        )?;

        if let Some(best) = &self.best {
            write!(f, " (best loss so far {})", best.loss())?;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum Error {
    /// An error in the image library occurred, eg failed to load/save
    Image(image::ImageError),
    /// A tensor operation failed
    Candle(candle_core::Error),
    /// An input parameter had an invalid range specified
    InvalidRange(InvalidRange),
    /// An image or activation tensor has dimensions the network or the loss
    /// can't work with
    InputShape(InputShape),
    /// The style/content layer selection is malformed, or names layers the
    /// feature extractor doesn't have
    InvalidLayers(String),
    /// The optimization diverged
    NonFiniteLoss(NonFiniteLoss),
    /// A required input was never supplied to the session builder
    MissingInput(&'static str),
    /// Io is notoriously error free with no problems, but we cover it just in case!
    Io(std::io::Error),
    /// The user specified an image format we don't support as the output
    UnsupportedOutputFormat(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image(err) => Some(err),
            Self::Candle(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(ie) => write!(f, "{}", ie),
            Self::Candle(ce) => write!(f, "{}", ce),
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::InputShape(is) => write!(f, "{}", is),
            Self::InvalidLayers(msg) => write!(f, "invalid layer selection: {}", msg),
            Self::NonFiniteLoss(nf) => write!(f, "{}", nf),
            Self::MissingInput(what) => write!(f, "no {} was provided", what),
            Self::Io(io) => write!(f, "{}", io),
            Self::UnsupportedOutputFormat(fmt) => {
                write!(f, "the output format '{}' is not supported", fmt)
            }
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(ie: image::ImageError) -> Self {
        Self::Image(ie)
    }
}

impl From<candle_core::Error> for Error {
    fn from(ce: candle_core::Error) -> Self {
        Self::Candle(ce)
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::Io(io)
    }
}
