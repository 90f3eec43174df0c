//! 行为数据诊断图.

use std::error::Error;
use std::path::Path;

use plotters::prelude::*;

use super::{FittedSigmoid, MorphScores, ScoreColumn};
use crate::consts::morph::CSV_MORPH_SCALE;

/// 渲染两面板行为数据诊断图并保存为 PNG.
///
/// 左面板: 响应均值随 morph level 的变化, 带 ±标准误阴影带;
/// 若给出 `fitted` 与 `inflexion`, 叠加拟合曲线与拐点竖线.
/// 右面板: 响应时间均值随 morph level 的变化, 带 ±标准误阴影带.
///
/// 该函数是纯副作用的可视化工具, 不属于任何计算契约.
pub fn plot_behavioral<P: AsRef<Path>>(
    scores: &MorphScores,
    fitted: Option<&FittedSigmoid>,
    inflexion: Option<f64>,
    title: Option<&str>,
    path: P,
) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path.as_ref(), (1500, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let root = match title {
        Some(t) => root.titled(t, ("sans-serif", 26))?,
        None => root,
    };
    let panels = root.split_evenly((1, 2));

    draw_response_panel(&panels[0], scores, fitted, inflexion)?;
    draw_panel(
        &panels[1],
        scores,
        ScoreColumn::ResponseTime,
        "response time (ms)",
        &[],
    )?;

    root.present()?;
    Ok(())
}

type Panel<'a> = DrawingArea<BitMapBackend<'a>, plotters::coord::Shift>;

/// 左面板: 响应曲线 + 拟合 sigmoid + 拐点.
fn draw_response_panel(
    panel: &Panel<'_>,
    scores: &MorphScores,
    fitted: Option<&FittedSigmoid>,
    inflexion: Option<f64>,
) -> Result<(), Box<dyn Error>> {
    let mut overlays: Vec<Overlay> = Vec::new();
    if let Some(f) = fitted {
        overlays.push(Overlay::Curve(
            scores
                .levels()
                .iter()
                .copied()
                .zip(f.curve.iter().copied())
                .collect(),
        ));
    }
    if let Some(x) = inflexion {
        overlays.push(Overlay::VLine(x * CSV_MORPH_SCALE, x));
    }
    draw_panel(panel, scores, ScoreColumn::Response, "response", &overlays)
}

/// 面板叠加元素.
enum Overlay {
    /// 拟合曲线的 (morph, 值) 点列.
    Curve(Vec<(f64, f64)>),

    /// 拐点竖线: (morph 刻度横坐标, 拟合刻度原值).
    VLine(f64, f64),
}

fn draw_panel(
    panel: &Panel<'_>,
    scores: &MorphScores,
    column: ScoreColumn,
    y_desc: &str,
    overlays: &[Overlay],
) -> Result<(), Box<dyn Error>> {
    let levels = scores.levels();
    let mean = scores
        .mean_of(column)
        .ok_or("column missing from scores")?;
    let std_err = scores
        .std_err_of(column)
        .ok_or("column missing from scores")?;

    // 阴影带端点, 跳过 NaN.
    let upper: Vec<(f64, f64)> = levels
        .iter()
        .zip(mean.iter().zip(std_err.iter()))
        .filter(|(_, (m, s))| m.is_finite() && s.is_finite())
        .map(|(&x, (m, s))| (x, m + s))
        .collect();
    let lower: Vec<(f64, f64)> = levels
        .iter()
        .zip(mean.iter().zip(std_err.iter()))
        .filter(|(_, (m, s))| m.is_finite() && s.is_finite())
        .map(|(&x, (m, s))| (x, m - s))
        .collect();

    let (x_min, x_max) = min_max(levels.iter().copied());
    let (y_min, y_max) = min_max(
        upper
            .iter()
            .chain(lower.iter())
            .map(|(_, y)| *y)
            .chain(mean.iter().copied().filter(|v| v.is_finite())),
    );
    let y_pad = ((y_max - y_min) * 0.1).max(1e-6);

    let mut chart = ChartBuilder::on(panel)
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, (y_min - y_pad)..(y_max + y_pad))?;

    chart
        .configure_mesh()
        .x_desc("% morph (alpha)")
        .y_desc(y_desc)
        .draw()?;

    // 阴影带: 上界路径 + 反转的下界路径围成的多边形.
    let mut band = upper.clone();
    band.extend(lower.iter().rev().copied());
    chart.draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.3))))?;

    let series: Vec<(f64, f64)> = levels
        .iter()
        .zip(mean.iter())
        .filter(|(_, m)| m.is_finite())
        .map(|(&x, &m)| (x, m))
        .collect();
    chart
        .draw_series(LineSeries::new(series, &BLUE))?
        .label(column.name())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    for overlay in overlays {
        match overlay {
            Overlay::Curve(points) => {
                chart
                    .draw_series(LineSeries::new(points.clone(), &RED))?
                    .label("fitted sigmoid")
                    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
            }
            Overlay::VLine(x, raw) => {
                chart
                    .draw_series(LineSeries::new(
                        vec![(*x, y_min - y_pad), (*x, y_max + y_pad)],
                        &BLACK,
                    ))?
                    .label(format!("Inflexion threshold (>50%): {raw:.2}"))
                    .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));
            }
        }
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()?;

    Ok(())
}

/// 有限值序列的 (最小值, 最大值). 空序列退化为 (0, 1).
fn min_max<I: Iterator<Item = f64>>(it: I) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in it.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        (0.0, 1.0)
    } else {
        (min, max)
    }
}
