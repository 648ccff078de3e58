use ndarray::{Array3, ArrayD, Axis, IxDyn, ShapeError, s};

use super::{Tensor, mean_squared_distance};

/// 交换最后两个维度（要求至少2维）
pub fn transpose_last2(t: &Tensor) -> Tensor {
    let ndim = t.ndim();
    assert!(ndim >= 2, "交换最后两个维度时，张量维度须≥2");
    let mut view = t.view();
    view.swap_axes(ndim - 2, ndim - 1);
    view.as_standard_layout().into_owned()
}

/// 按最后两个维度做批量矩阵乘法：`[..., m, k] × [..., k, n] -> [..., m, n]`
///
/// 两个张量的前导维度须完全一致（不做广播）。
pub fn batched_mat_mul(a: &Tensor, b: &Tensor) -> Result<Tensor, ShapeError> {
    let (a_ndim, b_ndim) = (a.ndim(), b.ndim());
    assert!(a_ndim >= 2 && a_ndim == b_ndim, "批量矩阵乘法要求两个张量维度相同且≥2");
    let (lead, m, k) = split_matrix_dims(a.shape());
    let (b_lead, k2, n) = split_matrix_dims(b.shape());
    assert!(
        lead == b_lead && k == k2,
        "批量矩阵乘法形状不兼容：{:?} 与 {:?}",
        a.shape(),
        b.shape()
    );
    let batch: usize = lead.iter().product();

    let a3 = a.as_standard_layout().into_owned().into_shape((batch, m, k))?;
    let b3 = b.as_standard_layout().into_owned().into_shape((batch, k, n))?;
    let mut out = Array3::<f32>::zeros((batch, m, n));
    for i in 0..batch {
        let product = a3.slice(s![i, .., ..]).dot(&b3.slice(s![i, .., ..]));
        out.slice_mut(s![i, .., ..]).assign(&product);
    }

    let mut out_shape = lead.to_vec();
    out_shape.extend([m, n]);
    out.into_shape(IxDyn(&out_shape))
}

fn split_matrix_dims(shape: &[usize]) -> (&[usize], usize, usize) {
    let n = shape.len();
    (&shape[..n - 2], shape[n - 2], shape[n - 1])
}

/// 对`[N, H, W, C]`图像做面积平均缩放（只缩小）
///
/// 目标第`i`行覆盖原图`[i*H/out_h, (i+1)*H/out_h)`，列同理。
pub fn area_downsample(t: &Tensor, out_h: usize, out_w: usize) -> Tensor {
    assert!(t.ndim() == 4, "面积缩放只接受 NHWC 四维张量");
    let (n, h, w, c) = (t.shape()[0], t.shape()[1], t.shape()[2], t.shape()[3]);
    assert!(out_h >= 1 && out_h <= h && out_w >= 1 && out_w <= w, "面积缩放只能缩小");

    let mut out = ArrayD::<f32>::zeros(IxDyn(&[n, out_h, out_w, c]));
    for oy in 0..out_h {
        let (y0, y1) = (oy * h / out_h, ((oy + 1) * h / out_h).max(oy * h / out_h + 1));
        for ox in 0..out_w {
            let (x0, x1) = (ox * w / out_w, ((ox + 1) * w / out_w).max(ox * w / out_w + 1));
            let block = t.slice(s![.., y0..y1, x0..x1, ..]);
            let area = ((y1 - y0) * (x1 - x0)) as f32;
            let mean = block.sum_axis(Axis(1)).sum_axis(Axis(1)) / area;
            out.slice_mut(s![.., oy, ox, ..]).assign(&mean);
        }
    }
    out
}

/// 重建误差：`mean((x - g)²)`
pub fn reconstruction_loss(x: &Tensor, g: &Tensor) -> f32 {
    mean_squared_distance(x, g)
}

/// 多分辨率重建误差
///
/// 从`1×1`起逐级翻倍（严格小于原分辨率），每级对两者做面积缩放后累加均方差，
/// 最后再加上原分辨率的均方差。非四维输入退化为普通重建误差。
///
/// 注意：缩放用的是面积平均（见[`area_downsample`]），不是最近邻取样；
/// 两者在低分辨率层上的误差不同，与按最近邻缩放算出的数值不可直接比较。
pub fn pyramid_reconstruction_loss(x: &Tensor, g: &Tensor) -> f32 {
    if x.ndim() != 4 {
        return reconstruction_loss(x, g);
    }
    let (h, w) = (x.shape()[1], x.shape()[2]);
    let mut loss = 0.0;
    let (mut cur_h, mut cur_w) = (1, 1);
    while cur_h < h && cur_w < w {
        loss += reconstruction_loss(
            &area_downsample(x, cur_h, cur_w),
            &area_downsample(g, cur_h, cur_w),
        );
        cur_h *= 2;
        cur_w *= 2;
    }
    loss + reconstruction_loss(x, g)
}
