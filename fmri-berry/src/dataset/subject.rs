//! subject 级数据聚合.

use itertools::izip;
use ndarray::{concatenate, Array4, Axis};

use super::{
    AnalysisError, AnalysisResult, FuncRun, LoadError, LoadResult, ResolveResult, StudyLayout,
};
use crate::stats::{
    self, compute_morph_scores, fit_sigmoid, percentile, DEFAULT_SCORE_COLUMNS,
};
use crate::table::{ConfoundMatrix, TrialTable};
use crate::{BoldScan, MaskVolume, NiftiHeaderAttr};

/// 一个 run 的全部已加载数据.
#[derive(Debug, Clone)]
pub struct RunData {
    /// 本 run 的行为记录.
    pub labels: TrialTable,

    /// 脑 mask.
    pub brain_mask: MaskVolume,

    /// 白名单交集后的混淆变量矩阵.
    pub confounds: ConfoundMatrix,

    /// 清洗后的 BOLD 序列.
    pub series: BoldScan,
}

/// subject 级拼接数据.
///
/// `series` 按 TR 对齐 (时间点 = 各 run 时间点之和);
/// `timeline_s` 与 `morph_levels` 按 trial 对齐, 二者一一对应.
#[derive(Debug, Clone)]
pub struct SubjectData {
    /// 各 run 清洗序列沿时间轴的拼接, 按 run 编号顺序.
    pub series: Array4<f32>,

    /// 重复时间 (秒), 取自首个 run.
    pub t_r: f64,

    /// 全局时间轴 (秒): 各 trial 的 run 内时刻加上先前
    /// run 的末尾时刻累计偏移, 再由毫秒转换为秒.
    pub timeline_s: Vec<f64>,

    /// 与 `timeline_s` 对齐的 morph level (CSV 刻度).
    pub morph_levels: Vec<f64>,
}

/// 一个 subject 的全部 run 访问器, 按 run 编号顺序.
#[derive(Debug, Clone)]
pub struct Subject {
    id: u32,
    runs: Vec<FuncRun>,
}

impl Subject {
    /// 按 `layout` 的命名约定急切解析 subject 的每个 run.
    ///
    /// `run_ids` 不能为空, 否则程序 panic.
    pub fn resolve<I: IntoIterator<Item = u32>>(
        layout: &StudyLayout,
        id: u32,
        run_ids: I,
    ) -> ResolveResult<Self> {
        let runs = run_ids
            .into_iter()
            .map(|r| FuncRun::resolve(layout, id, r))
            .collect::<ResolveResult<Vec<_>>>()?;
        assert!(!runs.is_empty(), "至少需要一个 run 编号");

        Ok(Self { id, runs })
    }

    /// subject 编号.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 所有 run 访问器, 按 run 编号顺序.
    #[inline]
    pub fn runs(&self) -> &[FuncRun] {
        &self.runs
    }

    /// 急切加载每个 run 的全部数据. 任一文件缺失或损坏时
    /// 在第一个错误处立刻失败.
    pub fn load(&self) -> LoadResult<Vec<RunData>> {
        self.runs
            .iter()
            .map(|r| {
                Ok(RunData {
                    labels: r.labels()?,
                    brain_mask: r.brain_mask()?,
                    confounds: r.confounds()?,
                    series: r.data()?,
                })
            })
            .collect()
    }

    /// 聚合所有 run 的行为记录, 按 run 编号顺序拼接.
    pub fn trials(&self) -> LoadResult<TrialTable> {
        let mut all = TrialTable::default();
        for run in &self.runs {
            all.extend(&run.labels()?);
        }
        Ok(all)
    }

    /// 获取 subject 级拼接数据: 清洗序列沿时间轴拼接,
    /// 行为时间轴加偏移后从毫秒转换为秒, morph level 对应拼接.
    pub fn data(&self) -> LoadResult<SubjectData> {
        let mut series = Vec::with_capacity(self.runs.len());
        let mut run_times = Vec::with_capacity(self.runs.len());
        let mut morph_levels = Vec::new();

        for run in &self.runs {
            let labels = run.labels()?;
            series.push(run.data()?);
            run_times.push(labels.run_times_ms());
            morph_levels.extend(labels.morph_levels());
        }

        let spatial = series[0].spatial_shape();
        for s in &series[1..] {
            if s.spatial_shape() != spatial {
                return Err(LoadError::ShapeMismatch(spatial, s.spatial_shape()));
            }
        }

        // 空间形状已校验一致, 拼接不会失败.
        let views: Vec<_> = series.iter().map(|s| s.data()).collect();
        let concatenated = concatenate(Axis(0), &views).unwrap();

        Ok(SubjectData {
            series: concatenated,
            t_r: series[0].t_r(),
            timeline_s: concat_timeline(&run_times),
            morph_levels,
        })
    }

    /// 计算行为曲线的拐点对.
    ///
    /// 聚合所有 run 的行为记录, 按 morph level 分组统计,
    /// 拟合 sigmoid, 然后以拟合曲线取值范围的
    /// `low_percentile` / `high_percentile` 百分位数为两个阈值,
    /// 分别查找拐点. 曲线未穿越某阈值时对应项为 `None`.
    pub fn compute_inflexions(
        &self,
        low_percentile: f64,
        high_percentile: f64,
    ) -> AnalysisResult<(Option<f64>, Option<f64>)> {
        let trials = self.trials().map_err(AnalysisError::Load)?;
        let scores = compute_morph_scores(&trials, &DEFAULT_SCORE_COLUMNS);
        let fitted = fit_sigmoid(&scores).map_err(AnalysisError::Fit)?;

        let low = percentile(&fitted.curve, low_percentile);
        let high = percentile(&fitted.curve, high_percentile);

        Ok((
            stats::find_inflexion(&fitted.curve, low),
            stats::find_inflexion(&fitted.curve, high),
        ))
    }
}

/// 拼接多 run 行为时间轴.
///
/// 每个 run 的 trial 时刻 (毫秒) 加上先前所有 run 的末尾时刻累计偏移,
/// 然后整体从毫秒转换为秒.
fn concat_timeline(run_times_ms: &[Vec<f64>]) -> Vec<f64> {
    let mut timeline = Vec::with_capacity(run_times_ms.iter().map(Vec::len).sum());
    let mut offset_ms = 0.0;

    for times in run_times_ms {
        timeline.extend(times.iter().map(|t| (t + offset_ms) / 1000.0));
        offset_ms += times.last().copied().unwrap_or(0.0);
    }
    timeline
}

/// 将 `(timeline, morph_levels)` 对齐打包迭代. 调试辅助.
pub fn aligned_trials(data: &SubjectData) -> impl Iterator<Item = (f64, f64)> + '_ {
    izip!(data.timeline_s.iter().copied(), data.morph_levels.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_concat_timeline_two_runs() {
        // run 1 的末尾时刻为 2000 ms; run 2 的局部时刻相应平移.
        let run1 = vec![0.0, 1.0, 2.0, 2000.0];
        let run2 = vec![0.0, 1.0, 2.0];

        let timeline = concat_timeline(&[run1, run2]);
        let expected = [0.0, 0.001, 0.002, 2.0, 2.0, 2.001, 2.002];

        assert_eq!(timeline.len(), expected.len());
        for (got, want) in timeline.iter().zip(expected.iter()) {
            assert!(float_eq(*got, *want), "{got} vs {want}");
        }
    }

    #[test]
    fn test_concat_timeline_offset_accumulates() {
        let timeline = concat_timeline(&[vec![1000.0], vec![500.0], vec![250.0]]);
        // 偏移依次累计: 0, 1000, 1500.
        assert!(float_eq(timeline[0], 1.0));
        assert!(float_eq(timeline[1], 1.5));
        assert!(float_eq(timeline[2], 1.75));
    }

    #[test]
    fn test_concat_timeline_empty_run_is_neutral() {
        let timeline = concat_timeline(&[vec![], vec![100.0]]);
        assert_eq!(timeline.len(), 1);
        assert!(float_eq(timeline[0], 0.1));
    }
}
