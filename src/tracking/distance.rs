// Exact Euclidean distance transform by separable lower envelopes of
// parabolas (Felzenszwalb & Huttenlocher, "Distance Transforms of Sampled
// Functions", 2012).

use ndarray::{Array2, ArrayView2, Axis};

// Stands in for infinity so the envelope intersections stay finite.
const FAR: f64 = 1e20;

// Squared distance transform of a 1D sampled function `f` into `d`.
// `v` and `z` are scratch buffers of length n and n + 1.
fn squared_dt_1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }

    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    let mut k = 0;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, dq) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let dx = q as f64 - v[k] as f64;
        *dq = dx * dx + f[v[k]];
    }
}

// Distance from every `true` pixel to the nearest `false` pixel; zero on
// `false` pixels. With no `false` pixel at all, distances are effectively
// infinite (about 1e10).
pub fn distance_transform(foreground: ArrayView2<bool>) -> Array2<f64> {
    let (h, w) = foreground.dim();
    let mut dist = foreground.mapv(|inside| if inside { FAR } else { 0.0 });

    let n = h.max(w);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0; n + 1];

    for axis in [Axis(0), Axis(1)] {
        for mut lane in dist.lanes_mut(axis) {
            let len = lane.len();
            for (fi, &x) in f.iter_mut().zip(lane.iter()) {
                *fi = x;
            }
            squared_dt_1d(&f[..len], &mut d[..len], &mut v[..len], &mut z[..len + 1]);
            for (x, &di) in lane.iter_mut().zip(d.iter()) {
                *x = di;
            }
        }
    }

    dist.mapv_inplace(f64::sqrt);
    dist
}

// Positive inside the region (distance to the nearest outside pixel),
// negative outside (minus the distance to the nearest inside pixel).
pub fn signed_distance(inside: ArrayView2<bool>) -> Array2<f32> {
    let outside = inside.mapv(|x| !x);
    let din = distance_transform(inside);
    let dout = distance_transform(outside.view());
    let mut signed = Array2::zeros(inside.dim());
    ndarray::Zip::from(&mut signed)
        .and(&din)
        .and(&dout)
        .for_each(|s, &a, &b| *s = (a - b) as f32);
    signed
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_distance_transform_line() {
        let fg = array![[true, true, true, true, false]];
        let dist = distance_transform(fg.view());
        assert_eq!(dist, array![[4.0, 3.0, 2.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_distance_transform_diagonal() {
        let mut fg = Array2::from_elem((5, 5), true);
        fg[[0, 0]] = false;
        let dist = distance_transform(fg.view());
        assert!((dist[[3, 4]] - 5.0).abs() < 1e-9);
        assert!((dist[[1, 1]] - 2f64.sqrt()).abs() < 1e-9);
        assert_eq!(dist[[0, 0]], 0.0);
    }

    #[test]
    fn test_signed_distance() {
        let mut inside = Array2::from_elem((5, 5), false);
        inside[[2, 2]] = true;
        inside[[2, 3]] = true;
        let signed = signed_distance(inside.view());
        assert_eq!(signed[[2, 2]], 1.0);
        assert_eq!(signed[[2, 1]], -1.0);
        assert_eq!(signed[[0, 2]], -2.0);
        assert!(signed[[0, 0]] < -2.0);
    }
}
