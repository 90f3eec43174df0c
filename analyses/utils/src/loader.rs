//! 对 `fmri-berry::dataset` 的更一层封装. 提供更直接的研究数据访问.

use fmri_berry::dataset::{self, StudyLayout, SubjectLoader};
use std::env;
use std::path::PathBuf;

/// 获取研究项目根目录.
///
/// 1. 若环境变量 `$FMRI_STUDY_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/familiarity`.
pub fn study_root_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("FMRI_STUDY_DIR") {
        PathBuf::from(d)
    } else {
        dataset::home_study_dir_with(["familiarity"]).unwrap()
    }
}

/// 获取研究目录布局. 根目录解析规则同 [`study_root_from_env_or_home`].
#[inline]
pub fn layout_from_env_or_home() -> StudyLayout {
    StudyLayout::new(study_root_from_env_or_home())
}

/// 获取待分析的 subject 编号.
///
/// 1. 若环境变量 `$FMRI_SUBJECTS` 非空, 则按逗号分隔解析其值;
/// 2. 否则, 返回 `[1]`.
///
/// 解析失败的片段导致程序 panic.
pub fn subjects_from_env() -> Vec<u32> {
    ids_from_env("FMRI_SUBJECTS", &[1])
}

/// 获取每个 subject 待分析的 run 编号.
///
/// 1. 若环境变量 `$FMRI_RUNS` 非空, 则按逗号分隔解析其值;
/// 2. 否则, 返回 `[1, 2, 3]`.
///
/// 解析失败的片段导致程序 panic.
pub fn runs_from_env() -> Vec<u32> {
    ids_from_env("FMRI_RUNS", &[1, 2, 3])
}

fn ids_from_env(key: &str, default: &[u32]) -> Vec<u32> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .split(',')
            .map(|s| {
                s.trim()
                    .parse()
                    .unwrap_or_else(|_| panic!("${key} 中存在非法编号: `{s}`"))
            })
            .collect(),
        _ => default.to_vec(),
    }
}

/// 按环境变量配置创建 subject 加载器.
pub fn subject_loader_from_env_or_home() -> SubjectLoader {
    dataset::subject_loader(
        subjects_from_env(),
        layout_from_env_or_home(),
        runs_from_env(),
    )
}
