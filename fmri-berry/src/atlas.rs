//! 脑区标签查询.
//!
//! 将 MNI 空间坐标映射到图谱 (atlas) 体素标签与脑区名称.
//! 独立工具, 不接入 run/subject 主管线.

use std::path::Path;

use log::warn;
use ndarray_linalg::Inverse;
use serde::Deserialize;

use crate::table::{TableError, TableResult};
use crate::{AtlasVolume, NiftiHeaderAttr, WorldCoord};

/// 标签查询的运行时错误.
#[derive(Debug)]
pub enum AtlasError {
    /// sform 仿射矩阵不可逆.
    SingularAffine,

    /// 坐标变换后落在图谱体素网格之外. 参数为原始世界坐标.
    OutOfBounds(WorldCoord),

    /// 体素标签在名称列表中没有对应项. 参数为标签值.
    UnknownLabel(i64),
}

/// 标签查询结果.
pub type AtlasResult<T> = Result<T, AtlasError>;

/// 切割坐标 CSV 的一行. 文件中未命名的行索引列被忽略.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordRecord {
    /// MNI x 坐标.
    pub x: f64,

    /// MNI y 坐标.
    pub y: f64,

    /// MNI z 坐标.
    pub z: f64,
}

/// 从 CSV 读取切割坐标, 返回 (x, y, z) 三元组列表与原始表.
///
/// CSV 需包含 `x`, `y`, `z` 三列; 开头未命名的行索引列被丢弃.
pub fn load_cut_coords<P: AsRef<Path>>(path: P) -> TableResult<(Vec<WorldCoord>, Vec<CoordRecord>)> {
    let mut reader = csv::Reader::from_path(path.as_ref()).map_err(TableError::Csv)?;

    let mut records = Vec::new();
    for rec in reader.deserialize::<CoordRecord>() {
        records.push(rec.map_err(TableError::Csv)?);
    }

    let coords = records.iter().map(|r| (r.x, r.y, r.z)).collect();
    Ok((coords, records))
}

/// 区域标签查询结果.
#[derive(Debug, Clone)]
pub struct RegionLookup {
    /// 每个输入坐标对应的整数标签.
    pub labels: Vec<i64>,

    /// 每个标签对应的脑区名称. 仅在查询时提供了名称列表时存在.
    pub names: Option<Vec<String>>,
}

/// 查询一组 MNI 坐标对应的图谱标签 (及名称).
///
/// 每个世界坐标经 sform 仿射矩阵的逆变换映射到图谱体素网格,
/// 四舍五入到最近体素后读取该处的整数标签. 若提供 `names`,
/// 则同时返回 `names[label]` 形式的脑区名称 (索引 0 习惯上为背景).
///
/// 图谱中出现的不同标签个数与 `names` 长度不一致时发出警告
/// (不视为错误), 查询照常进行.
pub fn find_region_names(
    coords: &[WorldCoord],
    atlas: &AtlasVolume,
    names: Option<&[String]>,
) -> AtlasResult<RegionLookup> {
    let inv = atlas
        .affine()
        .inv()
        .map_err(|_| AtlasError::SingularAffine)?;

    if let Some(names) = names {
        let unique = atlas.unique_labels().len();
        if unique != names.len() {
            warn!(
                "提供的名称个数 ({}) 与图谱中不同标签个数 ({unique}) 不一致",
                names.len()
            );
        }
    }

    let (nz, ny, nx) = atlas.spatial_shape();
    let mut labels = Vec::with_capacity(coords.len());
    let mut out_names = names.map(|_| Vec::with_capacity(coords.len()));

    for &(sx, sy, sz) in coords {
        // 世界坐标 -> 体素坐标, 取最近体素.
        let vx = inv[(0, 0)] * sx + inv[(0, 1)] * sy + inv[(0, 2)] * sz + inv[(0, 3)];
        let vy = inv[(1, 0)] * sx + inv[(1, 1)] * sy + inv[(1, 2)] * sz + inv[(1, 3)];
        let vz = inv[(2, 0)] * sx + inv[(2, 1)] * sy + inv[(2, 2)] * sz + inv[(2, 3)];

        let (ix, iy, iz) = (vx.round(), vy.round(), vz.round());
        if ix < 0.0
            || iy < 0.0
            || iz < 0.0
            || ix as usize >= nx
            || iy as usize >= ny
            || iz as usize >= nz
        {
            return Err(AtlasError::OutOfBounds((sx, sy, sz)));
        }

        let label = atlas.label_at((ix as usize, iy as usize, iz as usize));
        labels.push(label);

        if let (Some(out), Some(names)) = (out_names.as_mut(), names) {
            let name = usize::try_from(label)
                .ok()
                .and_then(|i| names.get(i))
                .ok_or(AtlasError::UnknownLabel(label))?;
            out.push(name.clone());
        }
    }

    Ok(RegionLookup {
        labels,
        names: out_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    const IDENTITY: [[f32; 4]; 3] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    fn atlas_with_label3() -> AtlasVolume {
        let mut data = Array3::<f32>::zeros((8, 8, 8));
        // 体素 (x, y, z) = (1, 2, 3), 存储序 (z, y, x).
        data[(3, 2, 1)] = 3.0;
        AtlasVolume::fake(data, IDENTITY)
    }

    #[test]
    fn test_load_cut_coords_drops_index_column() {
        let dir = std::env::temp_dir().join(format!("fmri-berry-atlas-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("coords.csv");
        std::fs::write(&path, ",x,y,z\n0,1.0,2.0,3.0\n1,-4.5,0.0,9.0\n").unwrap();

        let (coords, table) = load_cut_coords(&path).unwrap();
        assert_eq!(coords, vec![(1.0, 2.0, 3.0), (-4.5, 0.0, 9.0)]);
        assert_eq!(table.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_identity_affine_lookup() {
        let atlas = atlas_with_label3();
        let lookup = find_region_names(&[(1.0, 2.0, 3.0), (0.0, 0.0, 0.0)], &atlas, None).unwrap();

        assert_eq!(lookup.labels, vec![3, 0]);
        assert!(lookup.names.is_none());
    }

    #[test]
    fn test_lookup_with_names() {
        let atlas = atlas_with_label3();
        let names: Vec<String> = ["Background", "A", "B", "Precuneous Cortex"]
            .map(str::to_owned)
            .into();

        let lookup =
            find_region_names(&[(1.0, 2.0, 3.0)], &atlas, Some(&names)).unwrap();
        assert_eq!(lookup.labels, vec![3]);
        assert_eq!(lookup.names.unwrap(), vec!["Precuneous Cortex".to_owned()]);
    }

    #[test]
    fn test_scaled_affine_rounds_to_nearest() {
        let mut data = Array3::<f32>::zeros((8, 8, 8));
        data[(1, 1, 1)] = 7.0;
        // 2 mm 各向同体素: 世界坐标 (2, 2, 2) -> 体素 (1, 1, 1).
        let atlas = AtlasVolume::fake(
            data,
            [
                [2.0, 0.0, 0.0, 0.0],
                [0.0, 2.0, 0.0, 0.0],
                [0.0, 0.0, 2.0, 0.0],
            ],
        );

        let lookup = find_region_names(&[(2.3, 1.8, 2.0)], &atlas, None).unwrap();
        assert_eq!(lookup.labels, vec![7]);
    }

    #[test]
    fn test_out_of_bounds_coordinate() {
        let atlas = atlas_with_label3();
        let err = find_region_names(&[(100.0, 0.0, 0.0)], &atlas, None).unwrap_err();
        assert!(matches!(err, AtlasError::OutOfBounds((x, _, _)) if x == 100.0));
    }

    #[test]
    fn test_unknown_label_with_short_name_list() {
        let atlas = atlas_with_label3();
        let names = vec!["Background".to_owned(), "A".to_owned()];
        let err = find_region_names(&[(1.0, 2.0, 3.0)], &atlas, Some(&names)).unwrap_err();
        assert!(matches!(err, AtlasError::UnknownLabel(3)));
    }
}
