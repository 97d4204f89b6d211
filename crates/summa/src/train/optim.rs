//! Optimizer construction: decay/no-decay parameter groups and gradient accumulation

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};

/// Parameter-name fragments exempt from weight decay.
pub const NO_DECAY: [&str; 2] = ["bias", "LayerNorm.weight"];

pub fn is_decay_exempt(name: &str) -> bool {
    NO_DECAY.iter().any(|nd| name.contains(nd))
}

#[derive(Default)]
pub struct ParamGroups {
    pub decay: Vec<(String, Var)>,
    pub no_decay: Vec<(String, Var)>,
}

impl ParamGroups {
    pub fn names(group: &[(String, Var)]) -> Vec<&str> {
        group.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.decay
            .iter()
            .chain(self.no_decay.iter())
            .map(|(_, v)| v.clone())
            .collect()
    }
}

/// Splits every variable of `varmap` by name, sorted for a stable order.
pub fn split_param_groups(varmap: &VarMap) -> Result<ParamGroups> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("VarMap lock poisoned"))?;
    let mut named: Vec<(String, Var)> = data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    let mut groups = ParamGroups::default();
    for (name, var) in named {
        if is_decay_exempt(&name) {
            groups.no_decay.push((name, var));
        } else {
            groups.decay.push((name, var));
        }
    }
    Ok(groups)
}

/// One AdamW per parameter group, stepped together at a shared learning rate.
pub struct GroupedAdamW {
    decay: AdamW,
    no_decay: AdamW,
}

impl GroupedAdamW {
    pub fn new(groups: &ParamGroups, lr: f64, eps: f64, weight_decay: f64) -> Result<Self> {
        let vars = |group: &[(String, Var)]| group.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>();
        let params = |wd: f64| ParamsAdamW {
            lr,
            eps,
            weight_decay: wd,
            ..Default::default()
        };
        Ok(Self {
            decay: AdamW::new(vars(&groups.decay), params(weight_decay))?,
            no_decay: AdamW::new(vars(&groups.no_decay), params(0.0))?,
        })
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.decay.set_learning_rate(lr);
        self.no_decay.set_learning_rate(lr);
    }

    pub fn learning_rate(&self) -> f64 {
        self.decay.learning_rate()
    }

    pub fn weight_decays(&self) -> (f64, f64) {
        (
            self.decay.params().weight_decay,
            self.no_decay.params().weight_decay,
        )
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.decay.step(grads)?;
        self.no_decay.step(grads)?;
        Ok(())
    }
}

/// Sums gradients of `factor` scaled losses before one optimizer update.
pub struct GradientAccumulator {
    vars: Vec<Var>,
    factor: usize,
    pending: usize,
    grads: Option<GradStore>,
}

impl GradientAccumulator {
    pub fn new(vars: Vec<Var>, factor: usize) -> Self {
        Self {
            vars,
            factor: factor.max(1),
            pending: 0,
            grads: None,
        }
    }

    /// Backpropagates `loss / factor` and adds the result to the running sums.
    pub fn accumulate(&mut self, loss: &Tensor) -> Result<()> {
        let scaled = loss.affine(1.0 / self.factor as f64, 0.0)?;
        let mut fresh = scaled.backward()?;
        match self.grads.as_mut() {
            None => self.grads = Some(fresh),
            Some(acc) => {
                for var in &self.vars {
                    let Some(new) = fresh.remove(var) else {
                        continue;
                    };
                    let merged = match acc.remove(var) {
                        Some(old) => (old + new)?,
                        None => new,
                    };
                    acc.insert(var, merged);
                }
            }
        }
        self.pending += 1;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.pending >= self.factor
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Hands out the summed gradients and resets the accumulator.
    pub fn take(&mut self) -> Option<GradStore> {
        self.pending = 0;
        self.grads.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn test_decay_grouping_by_name() {
        assert!(is_decay_exempt("encoder.layer.0.attention.output.LayerNorm.weight"));
        assert!(is_decay_exempt("lm_head.bias"));
        assert!(!is_decay_exempt("encoder.layer.0.attention.self.query.weight"));
        assert!(!is_decay_exempt("embeddings.LayerNorm.beta"));
    }

    #[test]
    fn test_split_param_groups() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = vb.pp("encoder.layer.0.attention");
        layer.pp("self.query").get_with_hints((2, 2), "weight", Init::Const(1.0))?;
        layer.pp("self.query").get_with_hints(2, "bias", Init::Const(0.0))?;
        layer.pp("output.LayerNorm").get_with_hints(2, "weight", Init::Const(1.0))?;

        let groups = split_param_groups(&varmap)?;
        assert_eq!(
            ParamGroups::names(&groups.decay),
            vec!["encoder.layer.0.attention.self.query.weight"]
        );
        assert_eq!(
            ParamGroups::names(&groups.no_decay),
            vec![
                "encoder.layer.0.attention.output.LayerNorm.weight",
                "encoder.layer.0.attention.self.query.bias"
            ]
        );

        let opt = GroupedAdamW::new(&groups, 1e-3, 1e-8, 0.01)?;
        assert_eq!(opt.weight_decays(), (0.01, 0.0));
        Ok(())
    }

    #[test]
    fn test_accumulated_gradients_are_averaged() -> Result<()> {
        let w = Var::new(&[1.0f32, 2.0], &Device::Cpu)?;
        let mut acc = GradientAccumulator::new(vec![w.clone()], 2);

        // d(sum(3w))/dw = 3, d(sum(5w))/dw = 5; averaged over two batches -> 4
        acc.accumulate(&(w.as_tensor() * 3.0)?.sum_all()?)?;
        assert!(!acc.is_ready());
        acc.accumulate(&(w.as_tensor() * 5.0)?.sum_all()?)?;
        assert!(acc.is_ready());

        let grads = acc.take().expect("gradients");
        let g = grads.get(&w).expect("grad for w").to_vec1::<f32>()?;
        assert_eq!(g, vec![4.0, 4.0]);
        assert_eq!(acc.pending(), 0);
        assert!(acc.take().is_none());
        Ok(())
    }
}
