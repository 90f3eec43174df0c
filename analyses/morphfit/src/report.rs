//! 分析结果.

use fmri_berry::stats::SigmoidParams;
use std::io::{self, Write};

/// 单个 subject 的心理物理分析汇总.
pub struct SubjectSummary {
    /// subject 编号.
    pub subject: u32,

    /// 聚合后的 trial 个数.
    pub n_trials: usize,

    /// 不同 morph level 的个数.
    pub n_levels: usize,

    /// 拟合出的 sigmoid 参数.
    pub params: SigmoidParams,

    /// 0.5 阈值下的拐点 (morph 分数刻度).
    pub inflexion: Option<f64>,

    /// 拟合曲线 25/75 百分位阈值下的拐点对.
    pub inflexion_pair: (Option<f64>, Option<f64>),
}

/// 将 `summary` 的结果写进 `w` 中.
fn describe_into<W: Write>(s: &SubjectSummary, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn point_to_display(p: Option<f64>) -> String {
        match p {
            Some(p) => format!("{p:.4}"),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Subject `{}`:", s.subject)?;
    writeln!(w, "{S4}Trials: {} ({} morph levels)", s.n_trials, s.n_levels)?;
    writeln!(
        w,
        "{S4}Sigmoid: L = {:.4}, x0 = {:.4}, k = {:.4}, b = {:.4}",
        s.params.l, s.params.x0, s.params.k, s.params.b
    )?;
    writeln!(
        w,
        "{S4}Inflexion (>50%): {}",
        point_to_display(s.inflexion)
    )?;
    write!(
        w,
        "{S4}Inflexion pair (p25/p75): {} / {}",
        point_to_display(s.inflexion_pair.0),
        point_to_display(s.inflexion_pair.1)
    )?;
    Ok(())
}

/// 全部 subject 的最终结果.
pub struct AnalysisResult {
    data: Vec<Result<SubjectSummary, String>>,
}

impl AnalysisResult {
    /// 由各 subject 的结果构建.
    pub fn from_iter<I: IntoIterator<Item = Result<SubjectSummary, String>>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 打印运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for item in self.data.iter() {
            match item {
                Ok(summary) => {
                    describe_into(summary, &mut buf).unwrap();
                    println!("{}", std::str::from_utf8(&buf).unwrap());
                    buf.clear();
                }
                Err(msg) => println!("{msg}"),
            }

            utils::sep();
        }
    }
}
