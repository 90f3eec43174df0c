//! fmriprep confounds 表.

use std::io::Read;
use std::path::Path;

use ndarray::Array2;

use super::{TableError, TableResult};
use crate::consts::confounds::{WHITELIST, WHITELIST_SET};

/// fmriprep 输出的完整 confounds 表 (tab 分隔).
///
/// 列集合随 fmriprep 版本漂移, 因此完整表仅作为中间结构,
/// 实际回归使用 [`ConfoundTable::select_whitelist`] 的结果.
#[derive(Debug, Clone)]
pub struct ConfoundTable {
    columns: Vec<String>,
    /// (时间点, 列). 缺失单元格 (`n/a` 或空) 以 NaN 存储.
    data: Array2<f64>,
}

impl ConfoundTable {
    /// 从 TSV 文件读取完整 confounds 表.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> TableResult<Self> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path.as_ref())
            .map_err(TableError::Csv)?;
        Self::from_tsv_reader(reader)
    }

    /// 从任意 `Read` 读取完整 confounds 表. 格式与文件版本一致.
    pub fn from_reader<R: Read>(rdr: R) -> TableResult<Self> {
        Self::from_tsv_reader(csv::ReaderBuilder::new().delimiter(b'\t').from_reader(rdr))
    }

    fn from_tsv_reader<R: Read>(mut reader: csv::Reader<R>) -> TableResult<Self> {
        let columns: Vec<String> = reader
            .headers()
            .map_err(TableError::Csv)?
            .iter()
            .map(str::to_owned)
            .collect();

        let mut values = Vec::new();
        let mut n_rows = 0usize;
        for rec in reader.records() {
            let rec = rec.map_err(TableError::Csv)?;
            n_rows += 1;
            for (name, cell) in columns.iter().zip(rec.iter()) {
                values.push(parse_cell(name, cell)?);
            }
        }

        // 行列个数此时必然一致, 可直接 unwrap.
        let data = Array2::from_shape_vec((n_rows, columns.len()), values).unwrap();
        Ok(Self { columns, data })
    }

    /// 获取列名.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// 时间点个数.
    #[inline]
    pub fn n_timepoints(&self) -> usize {
        self.data.nrows()
    }

    /// 取规范白名单与实际列的交集, 生成回归用的混淆变量矩阵.
    ///
    /// 结果列按白名单顺序排列; 白名单中不存在于本表的列被静默丢弃
    /// (fmriprep 版本漂移下的已知可选列). 交集结果是不可变配置值,
    /// 之后不再回查原表.
    pub fn select_whitelist(&self) -> ConfoundMatrix {
        let selected: Vec<usize> = WHITELIST
            .iter()
            .filter_map(|want| self.columns.iter().position(|c| c == want))
            .collect();

        let names = selected
            .iter()
            .map(|&i| self.columns[i].clone())
            .collect();
        let mut data = Array2::<f64>::zeros((self.n_timepoints(), selected.len()));
        for (out_c, &in_c) in selected.iter().enumerate() {
            data.column_mut(out_c).assign(&self.data.column(in_c));
        }

        ConfoundMatrix { names, data }
    }

    /// 本表中位于白名单之外的列名. 仅用于诊断.
    pub fn extra_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .filter(|c| !WHITELIST_SET.contains(c))
            .collect()
    }
}

#[inline]
fn parse_cell(name: &str, cell: &str) -> TableResult<f64> {
    match cell {
        "n/a" | "" => Ok(f64::NAN),
        other => other
            .parse::<f64>()
            .map_err(|_| TableError::BadCell(name.to_owned(), other.to_owned())),
    }
}

/// 白名单交集后的混淆变量矩阵. 行是时间点, 列是选中的混淆变量.
///
/// 该结构是只读的; 列集合在构建时一次性确定.
#[derive(Debug, Clone)]
pub struct ConfoundMatrix {
    names: Vec<String>,
    data: Array2<f64>,
}

impl ConfoundMatrix {
    /// 选中的列名, 按白名单顺序.
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 选中的列个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 是否没有任何选中列.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// 时间点个数.
    #[inline]
    pub fn n_timepoints(&self) -> usize {
        self.data.nrows()
    }

    /// 矩阵数据视图, 形状 (时间点, 列).
    #[inline]
    pub fn data(&self) -> ndarray::ArrayView2<'_, f64> {
        self.data.view()
    }

    /// 直接由列名和数据构建. 仅用于实验目的.
    ///
    /// `data` 列数与 `names` 长度不一致时 panic.
    pub fn from_parts(names: Vec<String>, data: Array2<f64>) -> Self {
        assert_eq!(names.len(), data.ncols(), "列名与数据列数不一致");
        Self { names, data }
    }
}
