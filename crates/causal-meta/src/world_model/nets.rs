use tch::{nn, Tensor};

/// MLP with SiLU activations
pub fn mlp(p: &nn::Path, in_dim: i64, hidden_dims: &[i64], out_dim: i64) -> nn::Sequential {
    let mut seq = nn::seq();
    let mut cur_in = in_dim;
    for (i, &units) in hidden_dims.iter().enumerate() {
        seq = seq
            .add(nn::linear(p / format!("l{}", i), cur_in, units, Default::default()))
            .add(nn::func(|xs| xs.silu()));
        cur_in = units;
    }
    seq.add(nn::linear(p / "out", cur_in, out_dim, Default::default()))
}

/// `ensemble` independent MLPs evaluated with batched matmuls.
///
/// Input `[E, N, in_dim]`, output `[E, N, out_dim]`.
#[derive(Debug)]
pub struct ParallelMlp {
    layers: Vec<(Tensor, Tensor)>,
}

impl ParallelMlp {
    pub fn new(p: &nn::Path, ensemble: i64, in_dim: i64, hidden_dims: &[i64], out_dim: i64) -> Self {
        let mut dims = Vec::with_capacity(hidden_dims.len() + 2);
        dims.push(in_dim);
        dims.extend_from_slice(hidden_dims);
        dims.push(out_dim);

        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                // same fan-in bound as nn::linear's bias init
                let bound = 1.0 / (w[0].max(1) as f64).sqrt();
                let init = nn::Init::Uniform {
                    lo: -bound,
                    up: bound,
                };
                let weight = p.var(&format!("l{}_weight", i), &[ensemble, w[0], w[1]], init);
                let bias = p.var(&format!("l{}_bias", i), &[ensemble, 1, w[1]], init);
                (weight, bias)
            })
            .collect();

        Self { layers }
    }

    pub fn forward(&self, xs: &Tensor) -> Tensor {
        let last = self.layers.len() - 1;
        let mut h = xs.shallow_clone();
        for (i, (weight, bias)) in self.layers.iter().enumerate() {
            h = h.matmul(weight) + bias;
            if i < last {
                h = h.silu();
            }
        }
        h
    }
}

/// Network that produces the raw `[N, 2 * E]` (mean, log-var) output.
#[derive(Debug)]
pub enum Backbone {
    Plain(nn::Sequential),
    Causal(ParallelMlp),
}

impl Backbone {
    /// Run on flattened input `[N, in_dim]`.
    ///
    /// The causal variant gates the input per output head with `mask`
    /// (`[E, in_dim]`) and regroups the per-head (mean, log-var) pairs into
    /// the plain layout.
    pub fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Tensor {
        match self {
            Self::Plain(seq) => xs.apply(seq),
            Self::Causal(heads) => {
                let gated = match mask {
                    Some(mask) => xs.unsqueeze(0) * mask.unsqueeze(1),
                    None => xs.unsqueeze(0).expand([heads.ensemble(), -1, -1], false),
                };
                let out = heads.forward(&gated).permute([1, 0, 2]);
                Tensor::cat(&[out.select(-1, 0), out.select(-1, 1)], -1)
            }
        }
    }
}

impl ParallelMlp {
    pub fn ensemble(&self) -> i64 {
        self.layers[0].0.size()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn test_parallel_mlp_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = ParallelMlp::new(&vs.root(), 5, 7, &[16, 16], 2);
        let x = Tensor::randn([5, 11, 7], (Kind::Float, Device::Cpu));
        assert_eq!(net.forward(&x).size(), vec![5, 11, 2]);
        assert_eq!(vs.variables().len(), 6);
    }

    #[test]
    fn test_heads_are_independent() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = ParallelMlp::new(&vs.root(), 3, 4, &[8], 2);
        let x = Tensor::randn([1, 6, 4], (Kind::Float, Device::Cpu)).expand([3, 6, 4], false);
        let y = net.forward(&x);
        assert!(!y.get(0).allclose(&y.get(1), 1e-6, 1e-6, false));
    }

    #[test]
    fn test_causal_backbone_layout() {
        let vs = nn::VarStore::new(Device::Cpu);
        let backbone = Backbone::Causal(ParallelMlp::new(&vs.root(), 4, 6, &[8], 2));
        let x = Tensor::randn([10, 6], (Kind::Float, Device::Cpu));
        let mask = Tensor::ones([4, 6], (Kind::Float, Device::Cpu));
        let out = backbone.forward(&x, Some(&mask));
        assert_eq!(out.size(), vec![10, 8]);

        let unmasked = backbone.forward(&x, None);
        assert!(out.allclose(&unmasked, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_masked_input_is_ignored() {
        let vs = nn::VarStore::new(Device::Cpu);
        let backbone = Backbone::Causal(ParallelMlp::new(&vs.root(), 2, 3, &[8], 2));
        let mask = Tensor::from_slice(&[1.0f32, 0.0, 1.0, 1.0, 1.0, 1.0]).reshape([2, 3]);
        let x = Tensor::randn([4, 3], (Kind::Float, Device::Cpu));
        let mut perturbed = x.copy();
        let _ = perturbed.select(1, 1).fill_(100.0);

        let a = backbone.forward(&x, Some(&mask));
        let b = backbone.forward(&perturbed, Some(&mask));
        // head 0 never sees input 1: columns 0 (mean) and 2 (log-var)
        assert!(a.select(1, 0).allclose(&b.select(1, 0), 1e-6, 1e-6, false));
        assert!(a.select(1, 2).allclose(&b.select(1, 2), 1e-6, 1e-6, false));
        assert!(!a.select(1, 1).allclose(&b.select(1, 1), 1e-6, 1e-6, false));
    }
}
