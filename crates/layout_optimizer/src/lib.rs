//! Genetic search for a command-to-code layout.
//!
//! Every command of a c-VEP speller flickers with the same base sequence
//! shifted by its own lag. Commands that sit next to each other on screen
//! should have lags that are far apart on the code circle, so the search
//! arranges the lag array on the grid to maximise the circular distance
//! between neighbouring cells.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

mod operators;

pub use operators::{crossover_pair, mutate, order_crossover, tournament_selection};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("matrix shape must have at least one row and one column")]
    EmptyShape,
    #[error("a {rows}x{cols} matrix cannot hold {lags} lags")]
    ShapeMismatch { rows: usize, cols: usize, lags: usize },
    #[error("sequence length must be positive")]
    EmptySequence,
    #[error("lag {lag} is outside [0, {seq_len})")]
    LagOutOfRange { lag: u32, seq_len: u32 },
    #[error("initial state is not an arrangement of the lag array")]
    InvalidInitialState,
    #[error("invalid hyperparameter `{0}`")]
    InvalidHyperparameter(&'static str),
    #[error("crossover produced a chromosome that is not a permutation of its parents")]
    BrokenPermutation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixShape {
    pub rows: usize,
    pub cols: usize,
}

impl MatrixShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lags arranged row-major on a grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    shape: MatrixShape,
    cells: Vec<u32>,
}

impl Layout {
    pub fn new(shape: MatrixShape, cells: Vec<u32>) -> Result<Self, LayoutError> {
        if shape.is_empty() {
            return Err(LayoutError::EmptyShape);
        }
        if shape.len() != cells.len() {
            return Err(LayoutError::ShapeMismatch {
                rows: shape.rows,
                cols: shape.cols,
                lags: cells.len(),
            });
        }
        Ok(Self { shape, cells })
    }

    pub fn shape(&self) -> MatrixShape {
        self.shape
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u32> {
        if row >= self.shape.rows || col >= self.shape.cols {
            return None;
        }
        self.cells.get(row * self.shape.cols + col).copied()
    }

    pub fn rows(&self) -> Vec<Vec<u32>> {
        self.cells
            .chunks(self.shape.cols)
            .map(<[u32]>::to_vec)
            .collect()
    }

    pub fn fitness(&self, seq_len: u32) -> u64 {
        fitness(&self.cells, self.shape, seq_len)
    }
}

pub fn circular_distance(a: u32, b: u32, seq_len: u32) -> u32 {
    let diff = a.abs_diff(b);
    diff.min(seq_len.saturating_sub(diff))
}

/// Sum over every cell of the circular distance to each of its up to eight
/// neighbours. Each adjacent pair is therefore counted twice.
pub fn fitness(cells: &[u32], shape: MatrixShape, seq_len: u32) -> u64 {
    let mut total = 0u64;
    for row in 0..shape.rows {
        for col in 0..shape.cols {
            let here = cells[row * shape.cols + col];
            for dr in -1isize..=1 {
                for dc in -1isize..=1 {
                    if dr == 0 && dc == 0 {
                        continue;
                    }
                    let (Some(r), Some(c)) = (
                        row.checked_add_signed(dr),
                        col.checked_add_signed(dc),
                    ) else {
                        continue;
                    };
                    if r >= shape.rows || c >= shape.cols {
                        continue;
                    }
                    let there = cells[r * shape.cols + c];
                    total += u64::from(circular_distance(here, there, seq_len));
                }
            }
        }
    }
    total
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub population_size: usize,
    pub tournament_k: usize,
    /// Per-cell swap probability. `None` means `1 / cells`.
    pub mutation_prob: Option<f64>,
    pub crossover_prob: f64,
    pub generations: usize,
    /// Fixes the random stream so runs are reproducible.
    pub seed: Option<u64>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            population_size: 50,
            tournament_k: 2,
            mutation_prob: None,
            crossover_prob: 0.9,
            generations: 1000,
            seed: None,
        }
    }
}

impl Hyperparameters {
    fn validate(&self) -> Result<(), LayoutError> {
        if self.population_size < 2 {
            return Err(LayoutError::InvalidHyperparameter("population_size"));
        }
        if self.tournament_k == 0 {
            return Err(LayoutError::InvalidHyperparameter("tournament_k"));
        }
        if !(0.0..=1.0).contains(&self.crossover_prob) {
            return Err(LayoutError::InvalidHyperparameter("crossover_prob"));
        }
        if let Some(p) = self.mutation_prob {
            if !(0.0..=1.0).contains(&p) {
                return Err(LayoutError::InvalidHyperparameter("mutation_prob"));
            }
        }
        Ok(())
    }
}

pub struct LayoutOptimizer {
    seq_len: u32,
    lags: Vec<u32>,
    shape: MatrixShape,
    params: Hyperparameters,
    initial_state: Option<Vec<u32>>,
    history: Vec<u64>,
}

impl LayoutOptimizer {
    pub fn new(
        seq_len: u32,
        lags: Vec<u32>,
        shape: MatrixShape,
        params: Hyperparameters,
    ) -> Result<Self, LayoutError> {
        if seq_len == 0 {
            return Err(LayoutError::EmptySequence);
        }
        // Validates the shape against the lag count.
        Layout::new(shape, lags.clone())?;
        if let Some(&lag) = lags.iter().find(|&&lag| lag >= seq_len) {
            return Err(LayoutError::LagOutOfRange { lag, seq_len });
        }
        params.validate()?;
        Ok(Self {
            seq_len,
            lags,
            shape,
            params,
            initial_state: None,
            history: Vec::new(),
        })
    }

    /// Seeds the first chromosome with a previously found layout.
    pub fn with_initial_state(mut self, layout: Layout) -> Result<Self, LayoutError> {
        if layout.shape() != self.shape || !operators::same_multiset(layout.cells(), &self.lags)
        {
            return Err(LayoutError::InvalidInitialState);
        }
        self.initial_state = Some(layout.cells);
        Ok(self)
    }

    /// Best-ever fitness after each generation of the last run.
    pub fn fitness_history(&self) -> &[u64] {
        &self.history
    }

    /// Runs the search for the configured number of generations and returns
    /// the best layout ever seen with its fitness.
    pub fn start(&mut self, verbose: bool) -> Result<(Layout, u64), LayoutError> {
        let mut rng = match self.params.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        let n = self.lags.len();
        let size = self.params.population_size;
        let mutation_prob = self.params.mutation_prob.unwrap_or(1.0 / n as f64);
        let pool_size = size.div_ceil(2);

        let mut population: Vec<Vec<u32>> = (0..size)
            .map(|_| {
                let mut chromosome = self.lags.clone();
                rng.shuffle(&mut chromosome);
                chromosome
            })
            .collect();
        if let Some(initial) = &self.initial_state {
            population[0] = initial.clone();
        }
        let mut scores = self.score(&population);

        let (mut best, mut best_score) = fittest(&population, &scores);
        self.history.clear();

        for generation in 0..self.params.generations {
            let fathers = tournament_selection(&scores, self.params.tournament_k, pool_size, &mut rng);
            let mothers = tournament_selection(&scores, self.params.tournament_k, pool_size, &mut rng);

            let mut children = Vec::with_capacity(pool_size * 2);
            for (&f, &m) in fathers.iter().zip(&mothers) {
                let (mut first, mut second) = crossover_pair(
                    &population[f],
                    &population[m],
                    self.params.crossover_prob,
                    &mut rng,
                )?;
                mutate(&mut first, mutation_prob, &mut rng);
                mutate(&mut second, mutation_prob, &mut rng);
                children.push(first);
                children.push(second);
            }
            children.truncate(size - 1);
            children.push(best.clone());

            population = children;
            scores = self.score(&population);
            let (candidate, candidate_score) = fittest(&population, &scores);
            if candidate_score > best_score {
                best = candidate;
                best_score = candidate_score;
            }
            self.history.push(best_score);

            if verbose {
                info!(generation, best_fitness = best_score, "layout search progress");
            } else {
                debug!(generation, best_fitness = best_score, "layout search progress");
            }
        }

        Ok((Layout::new(self.shape, best)?, best_score))
    }

    fn score(&self, population: &[Vec<u32>]) -> Vec<u64> {
        population
            .iter()
            .map(|chromosome| fitness(chromosome, self.shape, self.seq_len))
            .collect()
    }
}

fn fittest(population: &[Vec<u32>], scores: &[u64]) -> (Vec<u32>, u64) {
    let mut best = 0;
    for (idx, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = idx;
        }
    }
    (population[best].clone(), scores[best])
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
