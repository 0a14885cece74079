use crate::task::{GCellBox, StageTask, sort_by_priority};
use rayon::prelude::*;

/// Bin size of the wave scheduler, in GCells.
pub const WAVE_BIN_CELLS: u32 = 2;

/// Bin-marking set over GCell space; a bin holds the id of the last batch
/// that marked it, so resetting is O(1).
pub struct SpatialSet {
    grid: Vec<u32>,
    w: u32,
    h: u32,
    bin_size: u32,
    current_batch: u32,
}

impl SpatialSet {
    pub fn new(x_cells: u32, y_cells: u32, bin_size: u32) -> Self {
        let bin_size = bin_size.max(1);
        let w = x_cells.max(1).div_ceil(bin_size);
        let h = y_cells.max(1).div_ceil(bin_size);
        Self {
            grid: vec![0; (w * h) as usize],
            w,
            h,
            bin_size,
            current_batch: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current_batch = self.current_batch.wrapping_add(1);
        if self.current_batch == 0 {
            self.grid.fill(0);
            self.current_batch = 1;
        }
    }

    fn bins(&self, b: &GCellBox) -> (u32, u32, u32, u32) {
        (
            (b.x0 / self.bin_size).min(self.w - 1),
            (b.x1 / self.bin_size).min(self.w - 1),
            (b.y0 / self.bin_size).min(self.h - 1),
            (b.y1 / self.bin_size).min(self.h - 1),
        )
    }

    pub fn overlaps(&self, b: &GCellBox) -> bool {
        let (x0, x1, y0, y1) = self.bins(b);
        (y0..=y1).any(|y| (x0..=x1).any(|x| self.grid[(y * self.w + x) as usize] == self.current_batch))
    }

    pub fn mark(&mut self, b: &GCellBox) {
        let (x0, x1, y0, y1) = self.bins(b);
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.grid[(y * self.w + x) as usize] = self.current_batch;
            }
        }
    }

    pub fn try_insert(&mut self, b: &GCellBox) -> bool {
        if self.overlaps(b) {
            return false;
        }
        self.mark(b);
        true
    }
}

/// Splits tasks into waves of pairwise non-overlapping windows.
///
/// Tasks are taken in priority order. A task that collides with the current
/// wave is deferred and still marks its bins, so nothing below it that it
/// overlaps can overtake it. Within and across waves every pair of
/// overlapping tasks therefore runs in priority order.
pub fn plan_waves<T: StageTask>(mut tasks: Vec<T>, x_cells: u32, y_cells: u32) -> Vec<Vec<T>> {
    sort_by_priority(&mut tasks);
    let mut set = SpatialSet::new(x_cells, y_cells, WAVE_BIN_CELLS);
    let mut waves = Vec::new();
    let mut remaining = tasks;

    while !remaining.is_empty() {
        set.reset();
        let mut wave = Vec::new();
        let mut deferred = Vec::new();
        for task in remaining {
            let window = task.window();
            if set.try_insert(&window) {
                wave.push(task);
            } else {
                set.mark(&window);
                deferred.push(task);
            }
        }
        waves.push(wave);
        remaining = deferred;
    }
    waves
}

/// Runs `work` over each wave in parallel with one `init` clone per worker,
/// then hands every result to `commit` in priority order before the next
/// wave starts.
pub fn run_waves<T, S, R, F, C>(
    stage: &str,
    tasks: Vec<T>,
    x_cells: u32,
    y_cells: u32,
    init: S,
    work: F,
    mut commit: C,
) where
    T: StageTask + Sync,
    S: Clone + Send,
    R: Send,
    F: Fn(&mut S, &T) -> R + Sync + Send,
    C: FnMut(T, R),
{
    let total = tasks.len();
    let waves = plan_waves(tasks, x_cells, y_cells);
    log::debug!("{}: {} tasks in {} waves", stage, total, waves.len());

    for (i, wave) in waves.into_iter().enumerate() {
        let results: Vec<R> = wave
            .par_iter()
            .map_with(init.clone(), |state, task| work(state, task))
            .collect();
        log::trace!("{} wave {}: {} tasks", stage, i, results.len());
        for (task, result) in wave.into_iter().zip(results) {
            commit(task, result);
        }
    }
}
