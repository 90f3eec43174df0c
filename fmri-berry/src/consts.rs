//! 通用常量.

/// 混淆变量 (confounds) 相关常量.
pub mod confounds {
    use once_cell::sync::Lazy;
    use std::collections::HashSet;

    /// fmriprep confounds 表的规范白名单列.
    ///
    /// 列名随 fmriprep 版本有漂移. 加载时会取白名单与实际列的交集,
    /// 缺失列被静默丢弃.
    pub const WHITELIST: [&str; 18] = [
        "a_comp_cor_00",
        "a_comp_cor_01",
        "a_comp_cor_02",
        "a_comp_cor_03",
        "a_comp_cor_04",
        "a_comp_cor_05",
        "cosine00",
        "cosine01",
        "cosine02",
        "cosine03",
        "cosine04",
        "cosine05",
        "trans_x",
        "trans_y",
        "trans_z",
        "rot_x",
        "rot_y",
        "rot_z",
    ];

    /// 白名单的查询集合.
    pub static WHITELIST_SET: Lazy<HashSet<&'static str>> =
        Lazy::new(|| WHITELIST.into_iter().collect());
}

/// 带通滤波的低通截止频率 (Hz).
pub const LOW_PASS_HZ: f64 = 0.08;

/// 带通滤波的高通截止频率 (Hz).
pub const HIGH_PASS_HZ: f64 = 0.009;

/// morph 行为曲线拟合相关常量.
pub mod morph {
    /// 拟合自变量区间下界. CSV 中的 morph level 以 5-95 为刻度,
    /// 拟合刻度为其 1/100.
    pub const FIT_X_MIN: f64 = 0.05;

    /// 拟合自变量区间上界.
    pub const FIT_X_MAX: f64 = 0.95;

    /// 拟合曲线的采样点个数. 与实验的 morph level 档位数一致.
    pub const FIT_POINTS: usize = 10;

    /// 查找拐点时线性插值的上采样点数.
    pub const INTERP_POINTS: usize = 1000;

    /// 拐点判定的默认响应阈值.
    pub const RESPONSE_THRESHOLD: f64 = 0.5;

    /// CSV morph level 刻度 (5-95) 到拟合刻度 (0.05-0.95) 的分母.
    pub const CSV_MORPH_SCALE: f64 = 100.0;
}

/// 文件命名约定常量.
pub mod naming {
    /// 预处理 BOLD 序列文件的模式后缀.
    pub const PREPROC_BOLD_SUFFIX: &str = "preproc_bold.nii.gz";

    /// 脑 mask 文件的模式后缀.
    pub const BRAIN_MASK_SUFFIX: &str = "brain_mask.nii.gz";

    /// confounds 表文件的模式后缀.
    pub const CONFOUNDS_SUFFIX: &str = "desc-confounds_timeseries.tsv";

    /// 解剖背景像 (T1w, MNI 空间) 文件名尾部.
    pub const ANAT_T1W_SUFFIX: &str = "space-MNI152NLin2009cAsym_desc-preproc_T1w.nii.gz";

    /// 功能像目录下, 单个 run 的文件名前缀.
    #[inline]
    pub fn func_prefix(subject: u32, run: u32) -> String {
        format!("sub-{subject}_task-morph_run-{run}_")
    }
}
