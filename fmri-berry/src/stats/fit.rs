//! 四参数 sigmoid 的最小二乘拟合.

use ndarray::{Array1, Array2};
use ndarray_linalg::Inverse;

use super::{fit_grid, MorphScores, ScoreColumn};
use crate::consts::morph::FIT_POINTS;

/// Levenberg-Marquardt 初始阻尼.
const INIT_LAMBDA: f64 = 1e-3;

/// 阻尼的放大/缩小倍率.
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;

/// 阻尼超过该值即认定不收敛.
const LAMBDA_MAX: f64 = 1e12;

/// 最大迭代次数.
const MAX_ITERATIONS: u32 = 200;

/// 代价相对下降或步长低于该值即认定收敛.
const CONVERGENCE_TOL: f64 = 1e-12;

/// 拟合的运行时错误.
#[derive(Debug, Clone)]
pub enum FitError {
    /// morph level 档位数与拟合网格点数不符.
    /// 第一个参数代表期望点数, 第二个参数代表实际点数.
    LevelCountMismatch(usize, usize),

    /// 统计结果中没有响应列.
    MissingResponseColumn,

    /// 优化器在给定迭代次数内没有收敛. 参数为已执行的迭代次数.
    DidNotConverge(u32),
}

/// 拟合结果.
pub type FitResult<T> = Result<T, FitError>;

/// 四参数 logistic 的参数向量.
#[derive(Debug, Clone, Copy)]
pub struct SigmoidParams {
    /// 幅度.
    pub l: f64,

    /// 中点.
    pub x0: f64,

    /// 陡度.
    pub k: f64,

    /// 偏移.
    pub b: f64,
}

/// 拟合完成的 sigmoid: 参数向量与拟合网格上的曲线取值.
#[derive(Debug, Clone)]
pub struct FittedSigmoid {
    /// 拟合出的参数.
    pub params: SigmoidParams,

    /// 曲线在拟合网格 ([`super::fit_grid`]) 上的取值.
    pub curve: Vec<f64>,
}

/// 数值稳定的 logistic 函数 `1 / (1 + exp(-t))`.
///
/// 大幅度自变量在 `f64` 中饱和到 0 或 1, 不会溢出.
#[inline]
fn logistic(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

/// 四参数 logistic: `L / (1 + exp(-k (x - x0))) + b`.
#[inline]
pub fn sigmoid(x: f64, l: f64, x0: f64, k: f64, b: f64) -> f64 {
    l * logistic(k * (x - x0)) + b
}

/// 在参数 `p` 处求残差平方和与残差向量.
fn residuals(p: &[f64; 4], xs: &Array1<f64>, ys: &Array1<f64>) -> (f64, Array1<f64>) {
    let r = Array1::from_iter(
        xs.iter()
            .zip(ys.iter())
            .map(|(&x, &y)| sigmoid(x, p[0], p[1], p[2], p[3]) - y),
    );
    (r.dot(&r), r)
}

/// 解析 Jacobian. 利用恒等式 `e * s^2 = s (1 - s)` 避免指数溢出.
fn jacobian(p: &[f64; 4], xs: &Array1<f64>) -> Array2<f64> {
    let [l, x0, k, _] = *p;
    let mut jac = Array2::<f64>::zeros((xs.len(), 4));
    for (i, &x) in xs.iter().enumerate() {
        let s = logistic(k * (x - x0));
        let ds = s * (1.0 - s);
        jac[(i, 0)] = s;
        jac[(i, 1)] = -l * k * ds;
        jac[(i, 2)] = l * (x - x0) * ds;
        jac[(i, 3)] = 1.0;
    }
    jac
}

/// 将 sigmoid 拟合到分组响应均值曲线上.
///
/// 自变量为 [`super::fit_grid`] 的 [`FIT_POINTS`] 个等距点
/// (CSV 的 5-95 刻度对应拟合刻度 0.05-0.95), 因变量为响应列的分组均值.
/// 初始参数取 `(L, x0, k, b) = (-1, 0, 1, 1)`, 使拟合偏向实验预期的
/// 单调递减方向.
///
/// 响应均值的档位数不是 [`FIT_POINTS`] 时返回
/// [`FitError::LevelCountMismatch`]; 优化器不收敛时返回
/// [`FitError::DidNotConverge`].
pub fn fit_sigmoid(scores: &MorphScores) -> FitResult<FittedSigmoid> {
    let ys = scores
        .mean_of(ScoreColumn::Response)
        .ok_or(FitError::MissingResponseColumn)?;
    if ys.len() != FIT_POINTS {
        return Err(FitError::LevelCountMismatch(FIT_POINTS, ys.len()));
    }

    let xs = fit_grid();
    let ys = ys.to_owned();

    // 预设初值以获得正确的曲线朝向.
    let mut params = [-1.0, 0.0, 1.0, 1.0];
    let mut lambda = INIT_LAMBDA;
    let (mut cost, mut r) = residuals(&params, &xs, &ys);

    for iteration in 1..=MAX_ITERATIONS {
        let jac = jacobian(&params, &xs);
        let hessian = jac.t().dot(&jac);
        let gradient = jac.t().dot(&r);

        // 阻尼正规方程: (H + lambda * diag(H)) delta = -g.
        let mut damped = hessian.clone();
        for d in 0..4 {
            damped[(d, d)] += lambda * hessian[(d, d)];
        }

        let step = match damped.inv() {
            Ok(inv) => inv.dot(&gradient),
            Err(_) => {
                // 病态矩阵: 增大阻尼后重试.
                lambda *= LAMBDA_UP;
                if lambda > LAMBDA_MAX {
                    return Err(FitError::DidNotConverge(iteration));
                }
                continue;
            }
        };

        let trial = [
            params[0] - step[0],
            params[1] - step[1],
            params[2] - step[2],
            params[3] - step[3],
        ];
        let (trial_cost, trial_r) = residuals(&trial, &xs, &ys);

        if trial_cost <= cost {
            let improvement = cost - trial_cost;
            let step_norm = step.dot(&step).sqrt();
            params = trial;
            cost = trial_cost;
            r = trial_r;
            lambda = (lambda * LAMBDA_DOWN).max(f64::MIN_POSITIVE);

            if improvement <= CONVERGENCE_TOL * (cost + CONVERGENCE_TOL)
                || step_norm <= CONVERGENCE_TOL.sqrt()
            {
                let curve = xs
                    .iter()
                    .map(|&x| sigmoid(x, params[0], params[1], params[2], params[3]))
                    .collect();
                return Ok(FittedSigmoid {
                    params: SigmoidParams {
                        l: params[0],
                        x0: params[1],
                        k: params[2],
                        b: params[3],
                    },
                    curve,
                });
            }
        } else {
            lambda *= LAMBDA_UP;
            if lambda > LAMBDA_MAX {
                return Err(FitError::DidNotConverge(iteration));
            }
        }
    }

    Err(FitError::DidNotConverge(MAX_ITERATIONS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{compute_morph_scores, ScoreColumn};
    use crate::table::{TrialRecord, TrialTable};

    #[test]
    fn test_sigmoid_step_function_limit() {
        // 超大陡度下近似 x = 0 处的阶跃函数.
        assert!(sigmoid(-0.01, 1.0, 0.0, 1e6, 0.0).abs() < 1e-12);
        assert!((sigmoid(0.01, 1.0, 0.0, 1e6, 0.0) - 1.0).abs() < 1e-12);
        assert!((sigmoid(0.0, 1.0, 0.0, 1e6, 0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_saturates_without_overflow() {
        let far = sigmoid(-1e6, -1.0, 0.0, 1e6, 1.0);
        assert!(far.is_finite());
        assert!((far - 1.0).abs() < 1e-12);
    }

    /// 以给定参数生成档位均值表.
    fn synthetic_scores(l: f64, x0: f64, k: f64, b: f64) -> crate::stats::MorphScores {
        let trials = TrialTable::from_records((0..10).map(|i| {
            let x = 0.05 + 0.1 * i as f64;
            TrialRecord {
                run: 1,
                morph_level: x * 100.0,
                run_time_ms: 0.0,
                response: Some(sigmoid(x, l, x0, k, b)),
                response_time_ms: None,
            }
        }));
        compute_morph_scores(&trials, &[ScoreColumn::Response])
    }

    #[test]
    fn test_fit_recovers_decreasing_sigmoid() {
        let scores = synthetic_scores(-0.9, 0.5, 8.0, 0.95);
        let fitted = fit_sigmoid(&scores).unwrap();

        let expected = scores.mean_of(ScoreColumn::Response).unwrap();
        for (got, want) in fitted.curve.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "curve mismatch: {got} vs {want}");
        }
        assert!((fitted.params.x0 - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_fit_level_count_mismatch() {
        let trials = TrialTable::from_records([TrialRecord {
            run: 1,
            morph_level: 5.0,
            run_time_ms: 0.0,
            response: Some(1.0),
            response_time_ms: None,
        }]);
        let scores = compute_morph_scores(&trials, &[ScoreColumn::Response]);

        assert!(matches!(
            fit_sigmoid(&scores),
            Err(FitError::LevelCountMismatch(_, 1))
        ));
    }

    #[test]
    fn test_fit_missing_response_column() {
        let trials = TrialTable::default();
        let scores = compute_morph_scores(&trials, &[ScoreColumn::ResponseTime]);
        assert!(matches!(
            fit_sigmoid(&scores),
            Err(FitError::MissingResponseColumn)
        ));
    }
}
