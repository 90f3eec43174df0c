//! morph 行为曲线分析程序.
//!
//! 对每个 subject 聚合行为记录、按 morph level 分组统计、拟合
//! sigmoid 并定位拐点. subject 之间并行执行.
//!
//! 配置通过环境变量给出: `$FMRI_STUDY_DIR` (研究根目录),
//! `$FMRI_SUBJECTS` / `$FMRI_RUNS` (编号, 逗号分隔).
//! 设置 `$FMRI_WRITE_CACHE=1` 时同时清洗各 run 的 BOLD
//! 序列并写入磁盘缓存.

mod report;

use std::{env, thread};

use fmri_berry::consts::morph::RESPONSE_THRESHOLD;
use fmri_berry::dataset::{aligned_trials, StudyLayout, Subject};
use fmri_berry::stats::{
    compute_morph_scores, find_inflexion, fit_sigmoid, DEFAULT_SCORE_COLUMNS,
};
use log::{debug, info};

use report::{AnalysisResult, SubjectSummary};

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    let layout = utils::loader::layout_from_env_or_home();
    assert!(layout.root().is_dir(), "研究根目录不存在");

    let subjects = utils::loader::subjects_from_env();
    let runs = utils::loader::runs_from_env();
    let write_cache = env::var("FMRI_WRITE_CACHE").is_ok_and(|v| v == "1");

    info!(
        "analyzing {} subject(s) on {} core(s)",
        subjects.len(),
        utils::cpus()
    );

    println!("Running morph analyses...");
    let results = thread::scope(|s| {
        let layout = &layout;
        let runs = runs.as_slice();

        let handles: Vec<_> = subjects
            .iter()
            .map(|&id| s.spawn(move || analyze(layout, id, runs, write_cache)))
            .collect();

        AnalysisResult::from_iter(
            handles
                .into_iter()
                .map(|th| th.join().expect("Thread joining error")),
        )
    });

    results.analyze();
}

/// 单个 subject 的完整分析.
fn analyze(
    layout: &StudyLayout,
    id: u32,
    runs: &[u32],
    write_cache: bool,
) -> Result<SubjectSummary, String> {
    let subject = Subject::resolve(layout, id, runs.iter().copied())
        .map_err(|e| format!("Subject `{id}`: resolve error: {e:?}"))?;

    let trials = subject
        .trials()
        .map_err(|e| format!("Subject `{id}`: load error: {e:?}"))?;
    let scores = compute_morph_scores(&trials, &DEFAULT_SCORE_COLUMNS);
    let fitted =
        fit_sigmoid(&scores).map_err(|e| format!("Subject `{id}`: fit error: {e:?}"))?;

    let inflexion = find_inflexion(&fitted.curve, RESPONSE_THRESHOLD);
    let inflexion_pair = subject
        .compute_inflexions(25.0, 75.0)
        .map_err(|e| format!("Subject `{id}`: analysis error: {e:?}"))?;

    if write_cache {
        cache_cleaned_runs(&subject).map_err(|e| format!("Subject `{id}`: {e}"))?;
    }

    #[cfg(feature = "plot")]
    {
        let fig = format!("sub-{id}-behavior.png");
        fmri_berry::stats::plot_behavioral(
            &scores,
            Some(&fitted),
            inflexion,
            Some(&format!("sub-{id}")),
            &fig,
        )
        .map_err(|e| format!("Subject `{id}`: plot error: {e}"))?;
        info!("sub-{id}: figure saved to {fig}");
    }

    Ok(SubjectSummary {
        subject: id,
        n_trials: trials.len(),
        n_levels: scores.len(),
        params: fitted.params,
        inflexion,
        inflexion_pair,
    })
}

/// 清洗 subject 的每个 run 并写入磁盘缓存, 然后做一次拼接自检.
fn cache_cleaned_runs(subject: &Subject) -> Result<(), String> {
    let loaded = subject.load().map_err(|e| format!("load error: {e:?}"))?;

    for (run, data) in subject.runs().iter().zip(loaded.iter()) {
        run.cache(&data.series)
            .map_err(|e| format!("cache error: {e:?}"))?;
        info!(
            "sub-{} run-{}: cleaned series cached at {}",
            run.subject(),
            run.run(),
            run.cache_path().display()
        );
    }

    // 缓存写入后的拼接自检: data() 应全部命中缓存.
    let concat = subject.data().map_err(|e| format!("concat error: {e:?}"))?;
    for (t, level) in aligned_trials(&concat).take(3) {
        debug!("trial @ {t:.3}s -> morph {level}");
    }
    Ok(())
}
