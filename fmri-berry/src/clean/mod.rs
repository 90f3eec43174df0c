//! BOLD 信号清洗管线.
//!
//! 清洗 = 混淆变量回归 + 线性去趋势 + 0.009-0.08 Hz 带通滤波,
//! 逐体素时间序列进行. 上游已完成运动校正与空间配准 (fmriprep),
//! 本模块只负责时间维的信号清理.

use log::debug;
use ndarray::{Array1, Array2, ArrayViewMut1, Axis};
use ndarray_linalg::Inverse;

use crate::consts::{HIGH_PASS_HZ, LOW_PASS_HZ};
use crate::table::ConfoundMatrix;
use crate::BoldScan;

mod bandpass;

pub use bandpass::{BandpassFilter, Biquad, BiquadCoeffs};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 清洗整个 4D BOLD 序列, 返回同形状、同 header 元信息的新序列.
///
/// 每个体素的时间序列依次经过:
///
/// 1. 混淆变量回归 (设计矩阵 = 截距列 + `confounds` 的各列);
/// 2. 线性去趋势;
/// 3. 前向-后向 Butterworth 带通滤波
///    ([`HIGH_PASS_HZ`] - [`LOW_PASS_HZ`]), 采样率取 `1 / t_r`.
///
/// `confounds` 的时间点个数必须与序列一致, 否则程序 panic.
/// 开启 `rayon` feature 时按体素并行.
pub fn clean_series(scan: &BoldScan, confounds: &ConfoundMatrix) -> BoldScan {
    let n_t = scan.n_volumes();
    assert_eq!(
        confounds.n_timepoints(),
        n_t,
        "confounds 时间点个数与 BOLD 序列不一致"
    );

    let sample_rate = 1.0 / scan.t_r();
    let design = design_matrix(confounds, n_t);
    let proj = projector(&design);

    let (t, z, h, w) = scan.data().dim();
    let n_voxels = z * h * w;
    debug!("cleaning {n_voxels} voxel series of length {t}");

    // (t, z, h, w) -> (t, voxel). 标准布局下该变形不复制数据.
    let mut flat = scan
        .data()
        .to_owned()
        .into_shape((t, n_voxels))
        .unwrap();

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            flat.axis_iter_mut(Axis(1))
                .into_par_iter()
                .for_each(|col| clean_column(col, &design, &proj, sample_rate));
        } else {
            flat.axis_iter_mut(Axis(1))
                .for_each(|col| clean_column(col, &design, &proj, sample_rate));
        }
    }

    let cleaned = flat.into_shape((t, z, h, w)).unwrap();
    scan.with_data(cleaned)
}

/// 单个体素时间序列的完整清洗.
fn clean_column(
    mut col: ArrayViewMut1<'_, f32>,
    design: &Array2<f64>,
    proj: &Array2<f64>,
    sample_rate: f64,
) {
    let y = Array1::from_iter(col.iter().map(|&v| v as f64));

    // 回归: 残差 = y - X (X^T X)^{-1} X^T y.
    let theta = proj.dot(&y);
    let mut resid = y - design.dot(&theta);

    let buf = resid.as_slice_mut().unwrap();
    detrend_in_place(buf);
    bandpass::filtfilt(buf, sample_rate, HIGH_PASS_HZ, LOW_PASS_HZ);

    for (dst, src) in col.iter_mut().zip(resid.iter()) {
        *dst = *src as f32;
    }
}

/// 组装回归设计矩阵: 第一列为截距, 其余为混淆变量列.
fn design_matrix(confounds: &ConfoundMatrix, n_t: usize) -> Array2<f64> {
    let mut design = Array2::<f64>::ones((n_t, confounds.len() + 1));
    for (c, src) in confounds.data().columns().into_iter().enumerate() {
        design.column_mut(c + 1).assign(&src);
    }
    design
}

/// 预计算最小二乘投影 `(X^T X)^{-1} X^T`, 供所有体素共用.
fn projector(design: &Array2<f64>) -> Array2<f64> {
    let xt = design.t();
    // 截距 + 白名单混淆变量彼此不共线, 正规方程矩阵可逆.
    xt.dot(design).inv().unwrap().dot(&xt)
}

/// 原地去除最小二乘直线趋势 (含均值).
fn detrend_in_place(y: &mut [f64]) {
    let n = y.len();
    if n < 2 {
        if n == 1 {
            y[0] = 0.0;
        }
        return;
    }

    let nf = n as f64;
    let t_mean = (nf - 1.0) / 2.0;
    let y_mean = y.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, v) in y.iter().enumerate() {
        let dt = i as f64 - t_mean;
        cov += dt * (v - y_mean);
        var += dt * dt;
    }
    let slope = cov / var;
    let intercept = y_mean - slope * t_mean;

    for (i, v) in y.iter_mut().enumerate() {
        *v -= intercept + slope * i as f64;
    }
}
