use crate::error::{Error, Result};

use ndarray::Array2;
use serde::{Deserialize, Serialize};


/// Adam with bias correction, one instance per embedding table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Adam {
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: usize,
    m: Array2<f32>,
    v: Array2<f32>,
}

impl Adam {

    pub fn new(shape: (usize, usize)) -> Adam {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            t: 0,
            m: Array2::zeros(shape),
            v: Array2::zeros(shape),
        }
    }

    pub fn steps(&self) -> usize {
        self.t
    }

    /// One update of `params` along `grads`. All shapes must equal the moment shape.
    pub fn step(&mut self, params: &mut Array2<f32>, grads: &Array2<f32>, learning_rate: f32) -> Result<()> {

        if params.raw_dim() != grads.raw_dim() || params.raw_dim() != self.m.raw_dim() {
            return Err(Error::Consistency(format!(
                "adam step on params {:?} with gradients {:?}, moments are {:?}",
                params.dim(), grads.dim(), self.m.dim()
            )));
        }

        self.t += 1;

        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);

        // first and second moment estimates
        self.m.zip_mut_with(grads, |m, g| *m = beta1 * *m + (1.0 - beta1) * g);
        self.v.zip_mut_with(grads, |v, g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let t = self.t as f32;
        let b1t = 1.0 - beta1.powf(t);
        let b2t = 1.0 - beta2.powf(t);

        ndarray::Zip::from(params)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, m, v| {
                let m_hat = m / b1t;
                let v_hat = v / b2t;
                *p -= learning_rate * m_hat / (v_hat.sqrt() + eps);
            });
        Ok(())
    }
}


#[cfg(test)]
mod tests {

    use super::Adam;
    use crate::error::Error;
    use ndarray::{array, Array2};

    #[test]
    fn first_step_moves_by_learning_rate() {
        // with bias correction the first update is lr * sign(g)
        let mut params: Array2<f32> = array![[1.0, -1.0], [0.5, 0.0]];
        let grads: Array2<f32> = array![[2.0, -3.0], [0.0, 0.1]];
        let mut adam = Adam::new((2, 2));
        adam.step(&mut params, &grads, 0.01).unwrap();

        assert!((params[[0, 0]] - 0.99).abs() < 1e-5);
        assert!((params[[0, 1]] + 0.99).abs() < 1e-5);
        assert_eq!(params[[1, 0]], 0.5);
        assert!((params[[1, 1]] + 0.01).abs() < 1e-4);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let mut params: Array2<f32> = Array2::ones((2, 3));
        let mut adam = Adam::new((2, 3));
        let result = adam.step(&mut params, &Array2::ones((3, 2)), 0.1);
        assert!(matches!(result, Err(Error::Consistency(_))));

        let mut other: Array2<f32> = Array2::ones((4, 3));
        assert!(adam.step(&mut other, &Array2::ones((4, 3)), 0.1).is_err());

        assert_eq!(params, Array2::<f32>::ones((2, 3)));
        assert_eq!(adam.steps(), 0);
    }

    #[test]
    fn descends_a_quadratic() {
        // f(x) = sum(x^2), gradient 2x
        let mut params: Array2<f32> = Array2::from_elem((1, 4), 3.0);
        let mut adam = Adam::new((1, 4));
        for _ in 0..3000 {
            let grads = params.mapv(|x| 2.0 * x);
            adam.step(&mut params, &grads, 0.05).unwrap();
        }
        assert!(params.iter().all(|x| x.abs() < 0.1));
    }
}
