use crate::{errors::InputShape, Error};
use candle_core::Tensor;

/// Computes the Gram matrix of a `(1, channels, height, width)` activation.
///
/// The activation is viewed as a `channels x positions` matrix `F` and the
/// result is `F * F^T / positions`. Dividing by the number of positions makes
/// the statistics independent of the feature map's spatial resolution.
pub fn gram_matrix(activation: &Tensor) -> Result<Tensor, Error> {
    let dims = activation.dims();
    if dims.len() != 4 || dims[0] != 1 {
        return Err(Error::InputShape(InputShape::new(
            dims,
            "expected a (1, channels, height, width) activation",
        )));
    }

    let channels = dims[1];
    let positions = dims[2] * dims[3];
    if channels == 0 || positions == 0 {
        return Err(Error::InputShape(InputShape::new(
            dims,
            "the activation is empty",
        )));
    }

    let features = activation.reshape((channels, positions))?;
    let gram = features.matmul(&features.t()?.contiguous()?)?;

    Ok(gram.affine(1.0 / positions as f64, 0.0)?)
}
