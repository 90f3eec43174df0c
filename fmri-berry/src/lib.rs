#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 morph 实验 fMRI 数据 (fmriprep 输出) 与行为记录的结构化信息和基础处理算法.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 按照本实验室 Familiarity 研究的目录约定组织数据
//!   (但如果新数据按照同样模式进行组织, 也可以工作).
//! 2. 在非期望情况下, 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### 4D BOLD 序列与 3D 体数据结构 ✅
//!
//! nifti 文件的读取、写回与 header 通用属性.
//!
//! 实现位于 `fmri-berry/src/data`.
//!
//! ### 行为记录表与混淆变量表 ✅
//!
//! labels CSV 的按 run 过滤; fmriprep confounds TSV 的白名单交集.
//!
//! 实现位于 `fmri-berry/src/table`.
//!
//! ### 信号清洗管线 ✅
//!
//! 混淆变量回归、线性去趋势、0.009-0.08 Hz Butterworth 带通滤波.
//!
//! 实现位于 `fmri-berry/src/clean`.
//!
//! ### 数据集布局与 run/subject 访问器 ✅
//!
//! 固定命名约定的路径解析 (区分 NotFound 与 Ambiguous)、
//! 清洗结果的磁盘缓存、跨 run 的时间轴拼接.
//!
//! 实现位于 `fmri-berry/src/dataset`.
//!
//! ### 心理物理统计 ✅
//!
//! 按 morph level 分组统计、四参数 sigmoid 最小二乘拟合、
//! 拐点 (inflexion) 检测.
//!
//! 参考论文: "The distributed human neural system for face perception".
//! 实验范式从该方向的 morph 连续体研究得出.
//!
//! 实现位于 `fmri-berry/src/stats`.
//!
//! ### 脑区标签查询 ✅
//!
//! MNI 坐标到图谱 (atlas) 体素标签/名称的映射. 独立工具, 不接入主管线.
//!
//! 实现位于 `fmri-berry/src/atlas.rs`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private
//! API 提供文档.

/// 三维体素索引, 按 (z, h, w) 组织.
pub type Idx3d = (usize, usize, usize);

/// 四维索引, 按 (t, z, h, w) 组织.
pub type Idx4d = (usize, usize, usize, usize);

/// 世界坐标系 (MNI 空间) 中的一个点.
pub type WorldCoord = (f64, f64, f64);

/// fMRI nii 文件基础数据结构.
mod data;

pub use data::{AnatVolume, AtlasVolume, BoldScan, MaskVolume, NiftiHeaderAttr};

pub mod consts;

pub mod atlas;
pub mod clean;
pub mod dataset;
pub mod prelude;
pub mod stats;
pub mod table;
