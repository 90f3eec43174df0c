//! 运行时错误.

use std::path::PathBuf;

use crate::stats::FitError;
use crate::table::TableError;
use crate::Idx3d;

/// 按命名约定解析文件的错误.
///
/// 缺失与多重匹配是两种不同的结果: 后者代表数据完整性问题,
/// 不应被误当作缺失处理.
#[derive(Debug)]
pub enum ResolveError {
    /// 目录下没有匹配模式的文件. 参数为 (目录, 模式).
    NotFound(PathBuf, String),

    /// 目录下匹配模式的文件多于一个. 参数为 (目录, 模式, 匹配个数).
    Ambiguous(PathBuf, String, usize),

    /// 扫描目录时的底层 I/O 错误.
    Io(std::io::Error),
}

/// 解析结果.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// 数据加载错误.
#[derive(Debug)]
pub enum LoadError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// nifti 文件读写错误.
    Nifti(nifti::NiftiError),

    /// 表格数据错误.
    Table(TableError),

    /// 路径解析错误.
    Resolve(ResolveError),

    /// 多 run 拼接时空间形状不一致.
    /// 参数为 (期望空间形状, 实际空间形状).
    ShapeMismatch(Idx3d, Idx3d),
}

/// 加载结果.
pub type LoadResult<T> = Result<T, LoadError>;

/// subject 级分析错误.
#[derive(Debug)]
pub enum AnalysisError {
    /// 数据加载阶段错误.
    Load(LoadError),

    /// 曲线拟合阶段错误.
    Fit(FitError),
}

/// 分析结果.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
