//! 心理物理统计.
//!
//! 按 morph level 分组的行为统计、sigmoid 拟合与拐点检测.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1};
use ordered_float::NotNan;

use crate::consts::morph::{FIT_POINTS, FIT_X_MAX, FIT_X_MIN, INTERP_POINTS};
use crate::table::{TrialRecord, TrialTable};

mod fit;

#[cfg(feature = "plot")]
mod plot;

pub use fit::{fit_sigmoid, sigmoid, FitError, FitResult, FittedSigmoid, SigmoidParams};

#[cfg(feature = "plot")]
pub use plot::plot_behavioral;

/// 可参与分组统计的行为量.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScoreColumn {
    /// 被试响应.
    Response,

    /// 响应时间 (毫秒).
    ResponseTime,
}

/// 默认统计列: 响应与响应时间.
pub const DEFAULT_SCORE_COLUMNS: [ScoreColumn; 2] =
    [ScoreColumn::Response, ScoreColumn::ResponseTime];

impl ScoreColumn {
    /// 列的展示名.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::ResponseTime => "response time",
        }
    }

    /// 从 trial 记录取出该列的值. 缺失单元格读为 NaN.
    #[inline]
    fn extract(&self, r: &TrialRecord) -> f64 {
        match self {
            Self::Response => r.response.unwrap_or(f64::NAN),
            Self::ResponseTime => r.response_time_ms.unwrap_or(f64::NAN),
        }
    }
}

/// 按 morph level 分组后的行为统计结果.
///
/// 每个不同的 morph level 恰好对应一行, level 按升序排列,
/// 无缺失也无重复.
#[derive(Debug, Clone)]
pub struct MorphScores {
    levels: Vec<f64>,
    columns: Vec<ScoreColumn>,
    mean: Array2<f64>,
    std_err: Array2<f64>,
}

impl MorphScores {
    /// 所有 morph level, 按升序.
    #[inline]
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// 统计列集合.
    #[inline]
    pub fn columns(&self) -> &[ScoreColumn] {
        &self.columns
    }

    /// 不同 morph level 的个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// 是否没有任何分组.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[inline]
    fn col_index(&self, col: ScoreColumn) -> Option<usize> {
        self.columns.iter().position(|c| *c == col)
    }

    /// 某列的分组均值, 与 [`Self::levels`] 对齐.
    /// 该列未参与统计时返回 `None`.
    pub fn mean_of(&self, col: ScoreColumn) -> Option<ArrayView1<'_, f64>> {
        self.col_index(col).map(|i| self.mean.column(i))
    }

    /// 某列的分组标准误, 与 [`Self::levels`] 对齐.
    /// 该列未参与统计时返回 `None`.
    pub fn std_err_of(&self, col: ScoreColumn) -> Option<ArrayView1<'_, f64>> {
        self.col_index(col).map(|i| self.std_err.column(i))
    }
}

/// 按 morph level 分组, 计算每个 `columns` 列的均值和标准误.
///
/// NaN 单元格按列跳过. morph level 本身为 NaN 的行被忽略.
///
/// # 注意
///
/// 此处的 "标准误" 沿用上游观测到的算法: 样本标准差 (ddof = 1)
/// 除以 **分组和** 的平方根, 而非分组个数的平方根.
/// 其统计学意图未经验证, 按原样保留; 负的分组和会产生 NaN.
pub fn compute_morph_scores(trials: &TrialTable, columns: &[ScoreColumn]) -> MorphScores {
    let mut groups: BTreeMap<NotNan<f64>, Vec<usize>> = BTreeMap::new();
    for (i, r) in trials.records().iter().enumerate() {
        if let Ok(level) = NotNan::new(r.morph_level) {
            groups.entry(level).or_default().push(i);
        }
    }

    let levels: Vec<f64> = groups.keys().map(|k| k.into_inner()).collect();
    let mut mean = Array2::<f64>::zeros((levels.len(), columns.len()));
    let mut std_err = Array2::<f64>::zeros((levels.len(), columns.len()));

    for (row, indices) in groups.values().enumerate() {
        for (c, col) in columns.iter().enumerate() {
            let values: Vec<f64> = indices
                .iter()
                .map(|&i| col.extract(&trials.records()[i]))
                .filter(|v| !v.is_nan())
                .collect();

            let (m, s, sum) = mean_std_sum(&values);
            mean[(row, c)] = m;
            std_err[(row, c)] = s / sum.sqrt();
        }
    }

    MorphScores {
        levels,
        columns: columns.to_vec(),
        mean,
        std_err,
    }
}

/// 计算 (均值, 样本标准差 (ddof = 1), 和). 空集的均值与标准差为 NaN,
/// 单元素集的标准差为 NaN.
fn mean_std_sum(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN, 0.0);
    }

    let sum: f64 = values.iter().sum();
    let mean = sum / n as f64;
    let std = if n >= 2 {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        f64::NAN
    };

    (mean, std, sum)
}

/// 拟合自变量网格: `[FIT_X_MIN, FIT_X_MAX]` 上的 [`FIT_POINTS`] 个等距点.
#[inline]
pub fn fit_grid() -> Array1<f64> {
    Array1::linspace(FIT_X_MIN, FIT_X_MAX, FIT_POINTS)
}

/// 在拟合曲线上查找穿越 `threshold` 的拐点.
///
/// 曲线先被线性插值上采样到 [`INTERP_POINTS`] 个点,
/// 再扫描 `值 - threshold` 的第一次变号; 返回变号前一点的横坐标.
/// 曲线从未穿越阈值时返回 `None`.
///
/// `fitted_curve` 的长度必须为 [`FIT_POINTS`], 否则程序 panic.
pub fn find_inflexion(fitted_curve: &[f64], threshold: f64) -> Option<f64> {
    assert_eq!(fitted_curve.len(), FIT_POINTS, "拟合曲线点数不符");

    let xs = fit_grid();
    let x_fine = Array1::linspace(FIT_X_MIN, FIT_X_MAX, INTERP_POINTS);
    let interp: Vec<f64> = x_fine
        .iter()
        .map(|&x| lerp_at(xs.as_slice().unwrap(), fitted_curve, x))
        .collect();

    for i in 0..interp.len() - 1 {
        if (interp[i] > threshold) != (interp[i + 1] > threshold) {
            return Some(x_fine[i]);
        }
    }
    None
}

/// 在单调递增网格 `xs` 上对 `(xs, ys)` 做线性插值, 求 `x` 处的值.
/// 区间外的 `x` 取端点值.
fn lerp_at(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());

    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }

    // x 落在内部, 必有右邻.
    let hi = xs.partition_point(|&v| v < x);
    let (x0, x1) = (xs[hi - 1], xs[hi]);
    let (y0, y1) = (ys[hi - 1], ys[hi]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// 线性插值百分位数 (numpy 语义). `p` 取 \[0, 100\].
///
/// `values` 为空或 `p` 越界时 panic.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    assert!(!values.is_empty(), "百分位数需要非空输入");
    assert!((0.0..=100.0).contains(&p), "百分位数位于 [0, 100]");

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let h = (sorted.len() - 1) as f64 * p / 100.0;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TrialRecord;

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn trial(run: u32, level: f64, resp: Option<f64>, time: Option<f64>) -> TrialRecord {
        TrialRecord {
            run,
            morph_level: level,
            run_time_ms: 0.0,
            response: resp,
            response_time_ms: time,
        }
    }

    #[test]
    fn test_morph_scores_one_row_per_level() {
        let trials = TrialTable::from_records([
            trial(1, 15.0, Some(1.0), Some(300.0)),
            trial(1, 5.0, Some(1.0), Some(400.0)),
            trial(2, 5.0, Some(0.0), Some(500.0)),
            trial(2, 15.0, Some(1.0), Some(350.0)),
        ]);

        let scores = compute_morph_scores(&trials, &DEFAULT_SCORE_COLUMNS);
        assert_eq!(scores.levels(), &[5.0, 15.0]);
        assert_eq!(scores.len(), 2);

        let mean = scores.mean_of(ScoreColumn::Response).unwrap();
        assert!(float_eq(mean[0], 0.5));
        assert!(float_eq(mean[1], 1.0));
    }

    #[test]
    fn test_std_err_divides_by_sqrt_of_sum() {
        let trials = TrialTable::from_records([
            trial(1, 5.0, Some(2.0), None),
            trial(1, 5.0, Some(4.0), None),
        ]);

        let scores = compute_morph_scores(&trials, &[ScoreColumn::Response]);
        let err = scores.std_err_of(ScoreColumn::Response).unwrap();

        // 样本标准差 sqrt(2), 除以分组和 (6) 的平方根 — 不是个数的平方根.
        assert!(float_eq(err[0], 2.0_f64.sqrt() / 6.0_f64.sqrt()));
    }

    #[test]
    fn test_singleton_group_std_is_nan() {
        let trials = TrialTable::from_records([trial(1, 95.0, Some(1.0), Some(320.0))]);
        let scores = compute_morph_scores(&trials, &DEFAULT_SCORE_COLUMNS);
        assert!(scores.std_err_of(ScoreColumn::Response).unwrap()[0].is_nan());
        assert!(float_eq(
            scores.mean_of(ScoreColumn::ResponseTime).unwrap()[0],
            320.0
        ));
    }

    #[test]
    fn test_missing_cells_skipped_per_column() {
        let trials = TrialTable::from_records([
            trial(1, 5.0, Some(1.0), None),
            trial(1, 5.0, Some(0.0), Some(200.0)),
        ]);

        let scores = compute_morph_scores(&trials, &DEFAULT_SCORE_COLUMNS);
        assert!(float_eq(scores.mean_of(ScoreColumn::Response).unwrap()[0], 0.5));
        // 响应时间列只剩一个有效值.
        assert!(float_eq(
            scores.mean_of(ScoreColumn::ResponseTime).unwrap()[0],
            200.0
        ));
    }

    #[test]
    fn test_find_inflexion_monotonic_crossing() {
        let curve: Vec<f64> = (0..10).map(|i| i as f64 / 9.0).collect();
        let point = find_inflexion(&curve, 0.5).unwrap();
        // 真实穿越点 x = 0.5, 允许插值网格分辨率内的偏差.
        assert!((point - 0.5).abs() < 2e-3);
    }

    #[test]
    fn test_find_inflexion_no_crossing() {
        let curve = vec![0.2; 10];
        assert_eq!(find_inflexion(&curve, 0.5), None);
    }

    #[test]
    fn test_lerp_endpoints_clamped() {
        let xs = [0.0, 1.0];
        let ys = [1.0, 3.0];
        assert!(float_eq(lerp_at(&xs, &ys, -1.0), 1.0));
        assert!(float_eq(lerp_at(&xs, &ys, 2.0), 3.0));
        assert!(float_eq(lerp_at(&xs, &ys, 0.5), 2.0));
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert!(float_eq(percentile(&values, 25.0), 1.75));
        assert!(float_eq(percentile(&values, 50.0), 2.5));
        assert!(float_eq(percentile(&values, 0.0), 1.0));
        assert!(float_eq(percentile(&values, 100.0), 4.0));
    }
}
