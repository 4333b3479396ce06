use ndarray as nd;
use num_traits::Zero;

//ndarray has select() but it needs the index type and axis spelled out at
// every call site, these read closer to dst=src[indices]
pub trait GatherRows<T: Zero + Copy> {
    fn gather_rows(&self, indices: &[usize]) -> nd::Array2<T>; //dst=src[indices, :]
}
impl<T: Zero + Copy> GatherRows<T> for nd::Array2<T> {
    fn gather_rows(&self, indices: &[usize]) -> nd::Array2<T> {
        let mut res = nd::Array2::<T>::zeros((indices.len(), self.ncols()));
        for (i_out, &i_in) in indices.iter().enumerate() {
            res.row_mut(i_out).assign(&self.row(i_in));
        }
        res
    }
}

/// Per-frame gather on batched arrays of shape [T, N, C]
pub trait GatherPerFrame<T: Zero + Copy> {
    fn gather_per_frame(&self, indices: &[usize]) -> nd::Array3<T>; //dst=src[:, indices, :]
}
impl<T: Zero + Copy> GatherPerFrame<T> for nd::Array3<T> {
    fn gather_per_frame(&self, indices: &[usize]) -> nd::Array3<T> {
        let (nr_frames, _, nr_channels) = self.dim();
        let mut res = nd::Array3::<T>::zeros((nr_frames, indices.len(), nr_channels));
        for (i_out, &i_in) in indices.iter().enumerate() {
            res.index_axis_mut(nd::Axis(1), i_out).assign(&self.index_axis(nd::Axis(1), i_in));
        }
        res
    }
}

/// Returns the largest index, used to bounds check before gathering
pub fn max_index(indices: &[usize]) -> Option<usize> {
    indices.iter().copied().max()
}
