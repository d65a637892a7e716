//! Small numeric helpers shared by indicators and regime analysis

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator); `None` below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some(var.sqrt())
}

/// Mean over standard deviation, zero when the deviation is zero or undefined
pub fn sharpe_like(mean: Option<f64>, std: Option<f64>) -> f64 {
    match (mean, std) {
        (Some(m), Some(s)) if s > 0.0 && s.is_finite() && m.is_finite() => m / s,
        _ => 0.0,
    }
}

/// Fraction of strictly positive values; zero for an empty slice
pub fn win_rate(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| **v > 0.0).count() as f64 / values.len() as f64
}

/// Pearson correlation; `None` below two points or when either side is constant
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let mx = mean(&xs[..n])?;
    let my = mean(&ys[..n])?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()).take(n) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx <= 0.0 || vy <= 0.0 {
        return None;
    }
    let r = cov / (vx.sqrt() * vy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Percentile with linear interpolation between closest ranks.
/// `sorted` must be ascending; `q` is in [0, 100].
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(lerp(sorted[lo], sorted[hi], frac))
}

/// Point at fraction `t` between `a` and `b`; never forms `b - a`, which can overflow
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    if a == b || t <= 0.0 {
        a
    } else if t >= 1.0 {
        b
    } else {
        a * (1.0 - t) + b * t
    }
}

/// `count + 1` evenly spaced edges from `min` to `max`, last edge exactly `max`
pub fn linspace(min: f64, max: f64, count: usize) -> Vec<f64> {
    let mut edges: Vec<f64> = (0..=count)
        .map(|i| lerp(min, max, i as f64 / count as f64))
        .collect();
    if let Some(last) = edges.last_mut() {
        *last = max;
    }
    edges
}

/// Ascending copy with non-finite values removed
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, v| match acc {
        None => Some((*v, *v)),
        Some((lo, hi)) => Some((lo.min(*v), hi.max(*v))),
    })
}

/// Rolling simple mean; the first `period - 1` slots are NaN
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= period {
            sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = sum / period as f64;
        }
    }
    out
}

/// Rolling sample standard deviation; the first `period - 1` slots are NaN
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period < 2 {
        return out;
    }
    for i in (period - 1)..values.len() {
        if let Some(s) = sample_std(&values[i + 1 - period..=i]) {
            out[i] = s;
        }
    }
    out
}

/// True range per bar; the first bar falls back to its high-low span
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    (0..n)
        .map(|i| {
            let span = high[i] - low[i];
            if i == 0 {
                span
            } else {
                let prev = close[i - 1];
                span.max((high[i] - prev).abs()).max((low[i] - prev).abs())
            }
        })
        .collect()
}
