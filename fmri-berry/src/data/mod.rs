use std::collections::BTreeSet;
use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array2, Array3, Array4, ArrayView, ArrayView1, ArrayView3, ArrayViewMut, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, Idx4d};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn shape3_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 将 (W, H, z, t) 转换成 (t, z, H, W). 以后均按照该模式访问.
#[inline]
fn shape4_from_header(h: &NiftiHeader) -> Idx4d {
    let [_, w, h, z, t, ..] = h.dim;
    (t as usize, z as usize, h as usize, w as usize)
}

/// nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取空间维度形状大小, 按 (z, h, w).
    #[inline]
    fn spatial_shape(&self) -> Idx3d {
        shape3_from_header(self.header())
    }

    /// 获取水平切片形状大小.
    #[inline]
    fn slice_shape(&self) -> (usize, usize) {
        let (_, h, w) = self.spatial_shape();
        (h, w)
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.spatial_shape().0
    }

    /// 获取单个 3D 体的体素个数.
    #[inline]
    fn spatial_size(&self) -> usize {
        let (z, h, w) = self.spatial_shape();
        z * h * w
    }

    /// 检查空间索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.spatial_shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取 width 方向体素分辨率, 以毫米为单位.
    #[inline]
    fn width_mm(&self) -> f64 {
        self.header().pixdim[1] as f64
    }

    /// 获取 height 方向体素分辨率, 以毫米为单位.
    #[inline]
    fn height_mm(&self) -> f64 {
        self.header().pixdim[2] as f64
    }

    /// 获取空间方向 (相邻 2D 切片的方向) 体素分辨率, 以毫米为单位.
    #[inline]
    fn z_mm(&self) -> f64 {
        self.header().pixdim[3] as f64
    }

    /// 体素分辨率在三个空间维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 获取 sform 仿射矩阵 (4x4). 该矩阵将体素索引 (x, y, z) 映射到世界坐标.
    fn affine(&self) -> Array2<f64> {
        let h = self.header();
        let mut m = Array2::<f64>::zeros((4, 4));
        for (r, row) in [h.srow_x, h.srow_y, h.srow_z].iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                m[(r, c)] = *v as f64;
            }
        }
        m[(3, 3)] = 1.0;
        m
    }
}

/// nii 格式 4D BOLD 序列, 包括 header 和时间序列数据. 信号值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct BoldScan {
    header: BoxedHeader,
    data: Array4<f32>,
}

impl NiftiHeaderAttr for BoldScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx4d> for BoldScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx4d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx4d> for BoldScan {
    #[inline]
    fn index_mut(&mut self, index: Idx4d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl BoldScan {
    /// 打开 nii 文件格式的 4D BOLD 序列. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z, t] -> [t, z, H, W].
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([3, 2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array4::<f32>::from_shape_vec(shape4_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 根据裸时间序列数据和部分元信息直接创建 `BoldScan` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按照 (t, z, h, w) 组织.
    /// 2. `t_r` 为重复时间 (秒), 写入 header 的 `pixdim[4]`.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array4<f32>, t_r: f32) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };

        let (t, z, h, w) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [4, w as u16, h as u16, z as u16, t as u16, 1, 1, 1];
        header.pixdim = [1.0, 1.0, 1.0, 1.0, t_r, 1.0, 1.0, 1.0];
        header.intent_name[..4].copy_from_slice(b"fake");

        Self { header, data }
    }

    /// 判断该结构是否是由 `fake` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 获取重复时间 (repetition time, TR), 以秒为单位. 从 header 的
    /// 第四维分辨率读出.
    #[inline]
    pub fn t_r(&self) -> f64 {
        self.header.pixdim[4] as f64
    }

    /// 获取时间点个数.
    #[inline]
    pub fn n_volumes(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// 获取第 `t_index` 个时间点的 3D 体视图.
    ///
    /// 当 `t_index` 越界时 panic.
    #[inline]
    pub fn volume_at(&self, t_index: usize) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), t_index)
    }

    /// 获取空间位置 `pos` 处的体素时间序列视图.
    ///
    /// 当 `pos` 越界时 panic.
    #[inline]
    pub fn time_series_at(&self, (z, h, w): Idx3d) -> ArrayView1<'_, f32> {
        self.data.slice(ndarray::s![.., z, h, w])
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix4> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix4> {
        self.data.view_mut()
    }

    /// 以与 `self` 相同的 header 元信息、不同的数据构建新序列.
    ///
    /// `data` 的形状必须与 `self` 一致, 否则程序 panic.
    pub fn with_data(&self, data: Array4<f32>) -> Self {
        assert_eq!(self.data.dim(), data.dim(), "BOLD 序列形状不一致");
        Self {
            header: self.header.clone(),
            data,
        }
    }

    /// 将序列按 nifti 惯用的 \[W, H, z, t\] 顺序写入 `path`.
    /// 以 `.nii.gz` 结尾的路径会自动压缩.
    ///
    /// header 元信息 (含重复时间) 以 `self` 的 header 为参考.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // [t, z, H, W] -> [W, H, z, t].
        let disk = self.data.view().permuted_axes([3, 2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&disk)
    }
}

/// nii 格式 3D 脑 mask, 包括 header 和掩膜数据. 掩膜值以 `u8` 保存,
/// 非零值代表脑内体素.
#[derive(Debug, Clone)]
pub struct MaskVolume {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for MaskVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MaskVolume {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl MaskVolume {
    /// 打开 nii 文件格式的 3D 脑 mask. 如果打开成功,
    /// 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        let data = obj
            .into_volume()
            .into_ndarray::<u8>()?
            .permuted_axes([2, 1, 0].as_slice());

        debug_assert!(data.is_standard_layout());

        let data =
            Array3::<u8>::from_shape_vec(shape3_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 体素是否在脑内?
    #[inline]
    pub fn in_brain(&self, pos: Idx3d) -> bool {
        self.data[pos] != 0
    }

    /// 获取脑内体素个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.data.iter().filter(|p| **p != 0).count()
    }

    /// 收集满足谓词 `pred` 的所有体素对应的下标, 结果按行优先存储.
    pub fn filter_pos(&self, pred: fn(u8) -> bool) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(ref pos, pixel)| pred(*pixel).then_some(*pos))
            .collect()
    }

    /// 收集所有脑内体素对应的下标. 结果按行优先存储.
    #[inline]
    pub fn brain_pos(&self) -> Vec<Idx3d> {
        self.filter_pos(|p| p != 0)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }
}

/// nii 格式 3D 解剖背景像 (MNI 空间 T1w). 灰度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct AnatVolume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for AnatVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for AnatVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl AnatVolume {
    /// 打开 nii 文件格式的 3D 解剖像. 如果打开成功,
    /// 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([2, 1, 0].as_slice());

        debug_assert!(data.is_standard_layout());

        let data =
            Array3::<f32>::from_shape_vec(shape3_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

/// nii 格式 3D 脑图谱 (atlas). 每个体素是一个整数区域标签,
/// 按图谱惯例以浮点存储, 读取时取整.
#[derive(Debug, Clone)]
pub struct AtlasVolume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for AtlasVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl AtlasVolume {
    /// 打开 nii 文件格式的 3D 图谱. 如果打开成功,
    /// 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([2, 1, 0].as_slice());

        debug_assert!(data.is_standard_layout());

        let data =
            Array3::<f32>::from_shape_vec(shape3_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 根据裸标签数据和 sform 仿射矩阵直接创建 `AtlasVolume` 实体.
    ///
    /// `data` 按照 (z, h, w) 组织; `srow` 为 sform 的前三行.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<f32>, srow: [[f32; 4]; 3]) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };

        let (z, h, w) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        header.pixdim = [1.0; 8];
        header.sform_code = 1;
        [header.srow_x, header.srow_y, header.srow_z] = srow;
        header.intent_name[..4].copy_from_slice(b"fake");

        Self { header, data }
    }

    /// 读取体素 (x, y, z) 处的整数区域标签.
    ///
    /// 当索引越界时 panic. 调用方应先用 [`NiftiHeaderAttr::check`]
    /// 以 (z, y, x) 形式检查.
    #[inline]
    pub fn label_at(&self, (x, y, z): (usize, usize, usize)) -> i64 {
        self.data[(z, y, x)].round() as i64
    }

    /// 收集图谱中出现过的所有不同标签, 按升序排列.
    pub fn unique_labels(&self) -> BTreeSet<i64> {
        self.data.iter().map(|v| v.round() as i64).collect()
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_fake_bold_header_attr() {
        let data = Array4::<f32>::zeros((5, 2, 3, 4));
        let scan = BoldScan::fake(data, 2.0);

        assert!(scan.is_faked());
        assert_eq!(scan.spatial_shape(), (2, 3, 4));
        assert_eq!(scan.slice_shape(), (3, 4));
        assert_eq!(scan.n_volumes(), 5);
        assert_eq!(scan.spatial_size(), 24);
        assert!((scan.t_r() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_bold_time_series_layout() {
        let mut data = Array4::<f32>::zeros((3, 2, 2, 2));
        for t in 0..3 {
            data[(t, 1, 0, 1)] = t as f32;
        }
        let scan = BoldScan::fake(data, 1.5);

        let series = scan.time_series_at((1, 0, 1));
        assert_eq!(series.len(), 3);
        assert_eq!(series[0], 0.0);
        assert_eq!(series[2], 2.0);

        assert_eq!(scan[(2, 1, 0, 1)], 2.0);
        assert_eq!(scan.volume_at(2)[(1, 0, 1)], 2.0);
    }

    #[test]
    fn test_atlas_fake_affine() {
        let data = ndarray::Array3::<f32>::zeros((4, 4, 4));
        let atlas = AtlasVolume::fake(
            data,
            [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
        );

        let aff = atlas.affine();
        for r in 0..4 {
            for c in 0..4 {
                let expected = if r == c { 1.0 } else { 0.0 };
                assert!((aff[(r, c)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_atlas_label_round() {
        let mut data = ndarray::Array3::<f32>::zeros((4, 4, 4));
        // 体素 (x, y, z) = (1, 2, 3), 存储序 (z, y, x).
        data[(3, 2, 1)] = 3.0002;
        let atlas = AtlasVolume::fake(
            data,
            [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
        );

        assert_eq!(atlas.label_at((1, 2, 3)), 3);
        assert_eq!(atlas.unique_labels().len(), 2);
    }
}
