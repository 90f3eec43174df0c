//! 行为记录表与混淆变量表.
//!
//! 行为记录来自 `labels/labels_{subject}.csv`, 每行一个 trial;
//! 混淆变量来自 fmriprep 输出的 `*desc-confounds_timeseries.tsv`.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

mod confounds;

pub use confounds::{ConfoundMatrix, ConfoundTable};

/// 表格数据的读取错误.
#[derive(Debug)]
pub enum TableError {
    /// CSV / TSV 打开或解析错误. 文件缺失也会落入该类.
    Csv(csv::Error),

    /// 数值单元格解析错误. 参数为 (列名, 原始内容).
    BadCell(String, String),
}

/// 表格操作结果.
pub type TableResult<T> = Result<T, TableError>;

/// 单个 trial 的行为记录.
///
/// 缺失的数值单元格 (被试未作答等) 读为 `None`,
/// 统计时按 NaN 跳过.
#[derive(Debug, Clone, Deserialize)]
pub struct TrialRecord {
    /// 所属 run 编号.
    pub run: u32,

    /// morph 等级, 按 CSV 刻度 (5-95).
    #[serde(rename = "morph level")]
    pub morph_level: f64,

    /// trial 在 run 内的发生时刻, 以毫秒为单位.
    #[serde(rename = "run time")]
    pub run_time_ms: f64,

    /// 被试响应 (0 或 1).
    pub response: Option<f64>,

    /// 响应时间, 以毫秒为单位.
    #[serde(rename = "response time")]
    pub response_time_ms: Option<f64>,
}

/// 行为记录表. 行按文件内原始顺序存储.
#[derive(Debug, Clone, Default)]
pub struct TrialTable {
    records: Vec<TrialRecord>,
}

impl TrialTable {
    /// 从 CSV 文件读取完整行为记录表.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> TableResult<Self> {
        let reader = csv::Reader::from_path(path.as_ref()).map_err(TableError::Csv)?;
        Self::from_csv_reader(reader)
    }

    /// 从任意 `Read` 读取完整行为记录表. CSV 格式与文件版本一致.
    pub fn from_reader<R: Read>(rdr: R) -> TableResult<Self> {
        Self::from_csv_reader(csv::Reader::from_reader(rdr))
    }

    fn from_csv_reader<R: Read>(mut reader: csv::Reader<R>) -> TableResult<Self> {
        let mut records = Vec::new();
        for rec in reader.deserialize::<TrialRecord>() {
            records.push(rec.map_err(TableError::Csv)?);
        }
        Ok(Self { records })
    }

    /// 直接由记录序列构建.
    #[inline]
    pub fn from_records<I: IntoIterator<Item = TrialRecord>>(it: I) -> Self {
        Self {
            records: it.into_iter().collect(),
        }
    }

    /// 返回 `run` 编号与 `run_id` 相同的行组成的子表. 行序保持不变.
    pub fn filter_run(&self, run_id: u32) -> Self {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| r.run == run_id)
                .cloned()
                .collect(),
        }
    }

    /// 将 `other` 的所有行追加到 `self` 之后.
    pub fn extend(&mut self, other: &Self) {
        self.records.extend(other.records.iter().cloned());
    }

    /// 获取所有记录.
    #[inline]
    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    /// trial 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 表是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 获取各 trial 的 `run time` 列 (毫秒).
    pub fn run_times_ms(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.run_time_ms).collect()
    }

    /// 获取各 trial 的 morph 等级列 (CSV 刻度).
    pub fn morph_levels(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.morph_level).collect()
    }

    /// 本表最后一个 trial 的 `run time` (毫秒). 表为空时返回 0.
    ///
    /// 拼接多 run 时间轴时以该值为下一 run 的偏移.
    #[inline]
    pub fn final_run_time_ms(&self) -> f64 {
        self.records.last().map_or(0.0, |r| r.run_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
,run,block,stim,morph level,side,response,response time,run time
0,1,0,a,5,L,1,432,100
1,1,0,b,15,R,0,501,200
2,2,0,c,5,L,,,50
3,2,1,d,95,R,1,389,150
";

    #[test]
    fn test_filter_run_keeps_matching_rows() {
        let table = TrialTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 4);

        let run1 = table.filter_run(1);
        assert_eq!(run1.len(), 2);
        assert!(run1.records().iter().all(|r| r.run == 1));
        assert_eq!(run1.run_times_ms(), vec![100.0, 200.0]);
        assert_eq!(run1.final_run_time_ms(), 200.0);

        let run3 = table.filter_run(3);
        assert!(run3.is_empty());
        assert_eq!(run3.final_run_time_ms(), 0.0);
    }

    #[test]
    fn test_missing_cells_become_none() {
        let table = TrialTable::from_reader(CSV.as_bytes()).unwrap();
        let binding = table.filter_run(2);
        let r = &binding.records()[0];
        assert_eq!(r.response, None);
        assert_eq!(r.response_time_ms, None);
        assert_eq!(r.morph_level, 5.0);
    }

    #[test]
    fn test_extend_concatenates_in_order() {
        let table = TrialTable::from_reader(CSV.as_bytes()).unwrap();
        let mut all = table.filter_run(1);
        all.extend(&table.filter_run(2));
        assert_eq!(all.len(), 4);
        assert_eq!(all.morph_levels(), vec![5.0, 15.0, 5.0, 95.0]);
    }
}
