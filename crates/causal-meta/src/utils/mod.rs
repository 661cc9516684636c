//! Utility functions.

use crate::{CausalMetaError, Result};
use ndarray::Array2;
use tch::{Device, Kind, Tensor};

/// Set global random seed for libtorch.
pub fn set_seed(seed: u64) {
    tch::manual_seed(seed as i64);
}

/// Copy a 2-D tensor into an `f64` ndarray on the host.
pub fn tensor_to_array2(tensor: &Tensor) -> Result<Array2<f64>> {
    let size = tensor.size();
    if size.len() != 2 {
        return Err(CausalMetaError::ShapeMismatch {
            expected: vec![-1, -1],
            actual: size,
        });
    }
    let flat = tensor
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Double)
        .contiguous()
        .view([-1]);
    let data = Vec::<f64>::try_from(&flat)?;
    let len = data.len() as i64;
    Array2::from_shape_vec((size[0] as usize, size[1] as usize), data).map_err(|_| {
        CausalMetaError::ShapeMismatch {
            expected: vec![size[0] * size[1]],
            actual: vec![len],
        }
    })
}

/// Build a float tensor from a 2-D ndarray.
pub fn array2_to_tensor(array: &Array2<f32>, device: Device) -> Tensor {
    let (rows, cols) = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_slice(&data)
        .reshape([rows as i64, cols as i64])
        .to_device(device)
}
