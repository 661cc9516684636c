//! Discounted lambda-returns over imagined trajectories.

use crate::{CausalMetaError, Result};
use tch::{Kind, Tensor};

/// `G_t = r_t + gamma * c_t * ((1 - lambda) * V(s_{t+1}) + lambda * G_{t+1})`
///
/// All inputs are time-major `[H, N, 1]`; `next_value[t]` is `V(s_{t+1})` and
/// the recursion is bootstrapped with `V(s_H)`.
pub fn lambda_return(
    reward: &Tensor,
    next_value: &Tensor,
    cont: &Tensor,
    gamma: f64,
    lambda: f64,
) -> Result<Tensor> {
    let size = reward.size();
    for other in [next_value, cont] {
        if other.size() != size {
            return Err(CausalMetaError::ShapeMismatch {
                expected: size,
                actual: other.size(),
            });
        }
    }
    let horizon = size.first().copied().unwrap_or(0);
    if horizon == 0 {
        return Ok(reward.zeros_like());
    }

    let mut next = next_value.get(horizon - 1);
    let mut returns = Vec::with_capacity(horizon as usize);
    for t in (0..horizon).rev() {
        let blend = next_value.get(t) * (1.0 - lambda) + &next * lambda;
        let g = reward.get(t) + cont.get(t) * gamma * blend;
        returns.push(g.shallow_clone());
        next = g;
    }
    returns.reverse();
    Ok(Tensor::stack(&returns, 0))
}

/// `w_0 = 1`, `w_t = prod_{k < t} gamma * c_k`; no gradient.
pub fn discount_weights(cont: &Tensor, gamma: f64) -> Tensor {
    let horizon = cont.size().first().copied().unwrap_or(0);
    if horizon == 0 {
        return cont.zeros_like();
    }
    let cont = cont.detach();
    let first = cont.narrow(0, 0, 1).ones_like();
    let acc = (cont * gamma).cumprod(0, Kind::Float);
    Tensor::cat(&[first, acc.narrow(0, 0, horizon - 1)], 0)
}
