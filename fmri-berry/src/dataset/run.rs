//! 单个 (subject, run) 的扫描访问器.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::{resolve_one, LoadError, LoadResult, ResolveResult, StudyLayout};
use crate::consts::naming;
use crate::table::{ConfoundMatrix, ConfoundTable, TrialTable};
use crate::{clean, AnatVolume, BoldScan, MaskVolume};

/// 单个 (subject, run) 的文件访问器.
///
/// 所有文件路径在构建时按命名约定一次性解析完毕, 之后保持不可变;
/// 各操作按需从磁盘读取并将结果按值返回, 不做可变的内部记忆.
#[derive(Debug, Clone)]
pub struct FuncRun {
    subject: u32,
    run: u32,
    labels_csv: PathBuf,
    preproc_bold: PathBuf,
    brain_mask: PathBuf,
    confounds_tsv: PathBuf,
    anat_t1w: PathBuf,
    cache_file: PathBuf,
}

impl FuncRun {
    /// 按 `layout` 的命名约定解析 (subject, run) 的全部文件路径.
    ///
    /// 功能像目录下的三类文件 (`preproc_bold`, `brain_mask`, `confounds`)
    /// 要求唯一匹配; 缺失与多重匹配分别报告.
    pub fn resolve(layout: &StudyLayout, subject: u32, run: u32) -> ResolveResult<Self> {
        let func_dir = layout.func_dir(subject);
        let prefix = naming::func_prefix(subject, run);

        let preproc_bold = resolve_one(&func_dir, &prefix, naming::PREPROC_BOLD_SUFFIX)?;
        let brain_mask = resolve_one(&func_dir, &prefix, naming::BRAIN_MASK_SUFFIX)?;
        let confounds_tsv = resolve_one(&func_dir, &prefix, naming::CONFOUNDS_SUFFIX)?;

        Ok(Self {
            subject,
            run,
            labels_csv: layout.labels_csv(subject),
            preproc_bold,
            brain_mask,
            confounds_tsv,
            anat_t1w: layout.anat_t1w(subject),
            cache_file: layout.cache_file(subject, run),
        })
    }

    /// subject 编号.
    #[inline]
    pub fn subject(&self) -> u32 {
        self.subject
    }

    /// run 编号.
    #[inline]
    pub fn run(&self) -> u32 {
        self.run
    }

    /// 清洗结果缓存文件路径.
    #[inline]
    pub fn cache_path(&self) -> &Path {
        &self.cache_file
    }

    /// 该 run 的数据是否经过 fmriprep 预处理 (以 MNI 空间解剖像存在为准).
    pub fn is_preprocessed(&self) -> bool {
        if self.anat_t1w.exists() {
            true
        } else {
            warn!(
                "sub-{} 的文件应先经过 fmriprep 预处理: 未找到 {}",
                self.subject,
                self.anat_t1w.display()
            );
            false
        }
    }

    /// 读取该 run 的行为记录: 完整 subject 行为表中 `run` 列与本
    /// run 编号相同的行. 行为 CSV 缺失时返回 `Err`.
    pub fn labels(&self) -> LoadResult<TrialTable> {
        let full = TrialTable::from_csv(&self.labels_csv).map_err(LoadError::Table)?;
        Ok(full.filter_run(self.run))
    }

    /// 读取该 run 的脑 mask.
    pub fn brain_mask(&self) -> LoadResult<MaskVolume> {
        MaskVolume::open(&self.brain_mask).map_err(LoadError::Nifti)
    }

    /// 读取该 subject 的解剖背景像 (MNI 空间 T1w).
    pub fn background(&self) -> LoadResult<AnatVolume> {
        AnatVolume::open(&self.anat_t1w).map_err(LoadError::Nifti)
    }

    /// 读取 confounds 表并取白名单交集, 返回回归用的混淆变量矩阵.
    pub fn confounds(&self) -> LoadResult<ConfoundMatrix> {
        let table = ConfoundTable::from_tsv(&self.confounds_tsv).map_err(LoadError::Table)?;
        Ok(table.select_whitelist())
    }

    /// 获取清洗后的 BOLD 序列.
    ///
    /// 缓存文件存在时直接加载, 重复时间从缓存文件 header 恢复;
    /// 否则加载原始预处理序列并执行完整清洗管线
    /// ([`clean::clean_series`]). 本方法不会自动写回缓存 —
    /// 持久化需显式调用 [`Self::cache`].
    pub fn data(&self) -> LoadResult<BoldScan> {
        if self.cache_file.exists() {
            debug!(
                "sub-{} run-{}: 命中缓存 {}",
                self.subject,
                self.run,
                self.cache_file.display()
            );
            return BoldScan::open(&self.cache_file).map_err(LoadError::Nifti);
        }

        let raw = BoldScan::open(&self.preproc_bold).map_err(LoadError::Nifti)?;
        let confounds = self.confounds()?;
        Ok(clean::clean_series(&raw, &confounds))
    }

    /// 将清洗结果写入确定性缓存路径, 覆盖已有文件.
    /// 缓存目录不存在时先创建.
    ///
    /// 并发调用同一 (subject, run) 的写入不加锁, 最后写者胜出.
    pub fn cache(&self, cleaned: &BoldScan) -> LoadResult<()> {
        let dir = self.cache_file.parent().expect("缓存文件必有父目录");
        fs::create_dir_all(dir).map_err(LoadError::Io)?;
        cleaned.write(&self.cache_file).map_err(LoadError::Nifti)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NiftiHeaderAttr;
    use ndarray::Array4;

    fn scratch_layout(tag: &str) -> StudyLayout {
        let root = std::env::temp_dir().join(format!(
            "fmri-berry-run-{tag}-{}",
            std::process::id()
        ));
        if root.exists() {
            fs::remove_dir_all(&root).unwrap();
        }
        fs::create_dir_all(&root).unwrap();
        StudyLayout::new(root)
    }

    fn fake_run(layout: &StudyLayout, subject: u32, run: u32) -> FuncRun {
        FuncRun {
            subject,
            run,
            labels_csv: layout.labels_csv(subject),
            preproc_bold: layout.root().join("unused_bold.nii.gz"),
            brain_mask: layout.root().join("unused_mask.nii.gz"),
            confounds_tsv: layout.root().join("unused_confounds.tsv"),
            anat_t1w: layout.anat_t1w(subject),
            cache_file: layout.cache_file(subject, run),
        }
    }

    #[test]
    fn test_cache_round_trip_preserves_t_r_and_data() {
        let layout = scratch_layout("cache");
        let run = fake_run(&layout, 7, 2);

        let mut data = Array4::<f32>::zeros((4, 2, 3, 3));
        for (i, v) in data.iter_mut().enumerate() {
            *v = i as f32 * 0.25;
        }
        let cleaned = BoldScan::fake(data.clone(), 2.5);

        run.cache(&cleaned).unwrap();
        assert!(run.cache_path().exists());

        // 新访问器读取 data() 应命中缓存.
        let reread = run.data().unwrap();
        assert!((reread.t_r() - 2.5).abs() < 1e-6);
        assert_eq!(reread.spatial_shape(), (2, 3, 3));
        assert_eq!(reread.data(), data.view());

        fs::remove_dir_all(layout.root()).unwrap();
    }

    #[test]
    fn test_missing_labels_csv_is_reported() {
        let layout = scratch_layout("labels");
        let run = fake_run(&layout, 1, 1);
        assert!(matches!(run.labels(), Err(LoadError::Table(_))));
        fs::remove_dir_all(layout.root()).unwrap();
    }

    #[test]
    fn test_is_preprocessed_without_anat() {
        let layout = scratch_layout("anat");
        let run = fake_run(&layout, 1, 1);
        assert!(!run.is_preprocessed());
        fs::remove_dir_all(layout.root()).unwrap();
    }
}
