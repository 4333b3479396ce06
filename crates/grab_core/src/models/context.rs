use crate::common::error::{GrabError, GrabResult};
use log::info;
use ndarray as nd;
use rayon::prelude::*;
use std::sync::Arc;

/// Where model evaluation runs. Passed explicitly to the adapter, nothing
/// reads a process wide device setting.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext").field("num_threads", &self.num_threads()).finish()
    }
}

impl ExecutionContext {
    /// Frames are evaluated one after the other on the calling thread
    pub fn sequential() -> Self {
        Self { pool: None }
    }

    /// Frames are evaluated on a dedicated pool. ``None`` uses one thread per
    /// core, ``Some(1)`` is the same as [`ExecutionContext::sequential`].
    pub fn with_threads(num_threads: Option<usize>) -> GrabResult<Self> {
        if num_threads == Some(1) {
            return Ok(Self::sequential());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.unwrap_or(0))
            .thread_name(|i| format!("grab-eval-{i}"))
            .build()
            .map_err(|e| GrabError::Config(format!("cannot create the evaluation thread pool: {e}")))?;
        info!("evaluating frames on {} threads", pool.current_num_threads());
        Ok(Self { pool: Some(Arc::new(pool)) })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Runs ``f`` for every frame index and returns the results in frame order
    pub fn map_frames<R, F>(&self, nr_frames: usize, f: F) -> Vec<R>
    where
        F: Fn(usize) -> R + Sync + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| (0..nr_frames).into_par_iter().map(&f).collect()),
            None => (0..nr_frames).map(f).collect(),
        }
    }
}

/// Stacks per frame [N,C] arrays into [T,N,C]
pub fn stack_frames(frames: &[nd::Array2<f32>]) -> nd::Array3<f32> {
    let (rows, cols) = frames.first().map_or((0, 0), nd::Array2::dim);
    let mut out = nd::Array3::<f32>::zeros((frames.len(), rows, cols));
    for (mut dst, src) in out.outer_iter_mut().zip(frames) {
        dst.assign(src);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_and_sequential_agree() {
        let seq = ExecutionContext::sequential();
        let pooled = ExecutionContext::with_threads(Some(3)).unwrap();
        let f = |t: usize| (t * t) as f32;
        assert_eq!(seq.map_frames(50, f), pooled.map_frames(50, f));
        assert_eq!(pooled.num_threads(), 3);
        assert_eq!(seq.num_threads(), 1);
    }

    #[test]
    fn stack_keeps_frame_order() {
        let frames = vec![nd::Array2::from_elem((2, 3), 0.0_f32), nd::Array2::from_elem((2, 3), 1.0)];
        let stacked = stack_frames(&frames);
        assert_eq!(stacked.dim(), (2, 2, 3));
        assert_eq!(stacked[[1, 1, 2]], 1.0);
        assert_eq!(stack_frames(&[]).dim(), (0, 0, 0));
    }
}
