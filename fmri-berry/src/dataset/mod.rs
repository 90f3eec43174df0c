//! 数据集操作.
//!
//! 研究目录布局、按命名约定的文件解析 (区分缺失与多重匹配)、
//! run/subject 访问器与迭代器风格的 subject 加载器.

use std::fs;
use std::path::{Path, PathBuf};

mod error;
mod run;
mod subject;

pub use error::{
    AnalysisError, AnalysisResult, LoadError, LoadResult, ResolveError, ResolveResult,
};
pub use run::FuncRun;
pub use subject::{aligned_trials, RunData, Subject, SubjectData};

use crate::consts::naming;

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_study_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_study_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 研究目录布局. 项目根目录下依约定存放:
///
/// - `labels/labels_{subject}.csv` — 行为记录;
/// - `Familiarity/sub-{subject}/func/` — fmriprep 功能像输出;
/// - `Familiarity/sub-{subject}/anat/` — 解剖背景像;
/// - `cache/sub-{subject}-run-{run}.nii.gz` — 清洗结果缓存.
#[derive(Debug, Clone)]
pub struct StudyLayout {
    root: PathBuf,
}

impl StudyLayout {
    /// 由项目根目录构建.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_owned(),
        }
    }

    /// 项目根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 某 subject 的行为记录 CSV 路径.
    pub fn labels_csv(&self, subject: u32) -> PathBuf {
        self.root.join("labels").join(format!("labels_{subject}.csv"))
    }

    /// 某 subject 的功能像目录.
    pub fn func_dir(&self, subject: u32) -> PathBuf {
        self.root
            .join("Familiarity")
            .join(format!("sub-{subject}"))
            .join("func")
    }

    /// 某 subject 的解剖背景像 (MNI 空间 T1w) 路径.
    pub fn anat_t1w(&self, subject: u32) -> PathBuf {
        self.root
            .join("Familiarity")
            .join(format!("sub-{subject}"))
            .join("anat")
            .join(format!("sub-{subject}_{}", naming::ANAT_T1W_SUFFIX))
    }

    /// 清洗结果缓存目录.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// 某 (subject, run) 的清洗结果缓存文件路径.
    pub fn cache_file(&self, subject: u32, run: u32) -> PathBuf {
        self.cache_dir()
            .join(format!("sub-{subject}-run-{run}.nii.gz"))
    }
}

/// 在 `dir` 下解析唯一匹配 `{prefix}*{suffix}` 的文件.
///
/// 恰好一个匹配时返回其全路径; 零个匹配返回
/// [`ResolveError::NotFound`]; 多于一个返回 [`ResolveError::Ambiguous`] —
/// 多重匹配是独立的数据完整性问题, 不与缺失混同.
pub fn resolve_one(dir: &Path, prefix: &str, suffix: &str) -> ResolveResult<PathBuf> {
    let pattern = format!("{prefix}*{suffix}");
    let mut matches = Vec::new();

    for entry in fs::read_dir(dir).map_err(ResolveError::Io)? {
        let entry = entry.map_err(ResolveError::Io)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(prefix) && name.ends_with(suffix) {
            matches.push(entry.path());
        }
    }

    match matches.len() {
        0 => Err(ResolveError::NotFound(dir.to_owned(), pattern)),
        1 => Ok(matches.pop().unwrap()),
        n => Err(ResolveError::Ambiguous(dir.to_owned(), pattern, n)),
    }
}

/// 从指定 subject 编号与研究布局创建 [`Subject`] 加载器.
///
/// # 注意
///
/// 1. `runs` 不能为空, 否则程序 panic.
/// 2. 加载器按编号序迭代, 对每个 subject 急切解析其全部 run 文件;
///   解析失败时该项返回 `Result::Err`.
pub fn subject_loader<I: IntoIterator<Item = u32>>(
    data: I,
    layout: StudyLayout,
    runs: Vec<u32>,
) -> SubjectLoader {
    assert!(!runs.is_empty(), "至少需要一个 run 编号");

    let mut data: Vec<u32> = data.into_iter().collect();
    data.reverse();

    SubjectLoader {
        layout,
        runs,
        data_rev: data,
    }
}

/// subject 数据加载器.
#[derive(Debug)]
pub struct SubjectLoader {
    layout: StudyLayout,
    runs: Vec<u32>,
    data_rev: Vec<u32>,
}

impl Iterator for SubjectLoader {
    type Item = (u32, ResolveResult<Subject>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.data_rev.pop()?;
        let subject = Subject::resolve(&self.layout, id, self.runs.iter().copied());
        Some((id, subject))
    }
}

impl ExactSizeIterator for SubjectLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    /// 每次调用返回一个独立的临时目录.
    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "fmri-berry-test-{tag}-{}",
            std::process::id()
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_layout_paths() {
        let layout = StudyLayout::new("/proj");
        assert_eq!(
            layout.labels_csv(3),
            PathBuf::from("/proj/labels/labels_3.csv")
        );
        assert_eq!(
            layout.func_dir(3),
            PathBuf::from("/proj/Familiarity/sub-3/func")
        );
        assert_eq!(
            layout.cache_file(3, 2),
            PathBuf::from("/proj/cache/sub-3-run-2.nii.gz")
        );
        assert!(layout
            .anat_t1w(3)
            .to_str()
            .unwrap()
            .ends_with("sub-3_space-MNI152NLin2009cAsym_desc-preproc_T1w.nii.gz"));
    }

    #[test]
    fn test_resolve_distinguishes_missing_and_ambiguous() {
        let dir = scratch_dir("resolve");

        // 零个匹配.
        let err = resolve_one(&dir, "sub-1_task-morph_run-1_", "preproc_bold.nii.gz");
        assert!(matches!(err, Err(ResolveError::NotFound(..))));

        // 恰好一个匹配.
        let name = "sub-1_task-morph_run-1_space-MNI_preproc_bold.nii.gz";
        File::create(dir.join(name)).unwrap();
        let ok = resolve_one(&dir, "sub-1_task-morph_run-1_", "preproc_bold.nii.gz").unwrap();
        assert!(ok.ends_with(name));

        // 两个匹配: 与缺失区分.
        File::create(dir.join("sub-1_task-morph_run-1_space-T1w_preproc_bold.nii.gz")).unwrap();
        let err = resolve_one(&dir, "sub-1_task-morph_run-1_", "preproc_bold.nii.gz");
        assert!(matches!(err, Err(ResolveError::Ambiguous(_, _, 2))));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_resolve_prefix_must_match() {
        let dir = scratch_dir("prefix");
        File::create(dir.join("sub-1_task-morph_run-11_x_preproc_bold.nii.gz")).unwrap();

        // run-11 的文件不能匹配 run-1 之外的前缀写法.
        let err = resolve_one(&dir, "sub-1_task-morph_run-2_", "preproc_bold.nii.gz");
        assert!(matches!(err, Err(ResolveError::NotFound(..))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
