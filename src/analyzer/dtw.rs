use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AlignmentError {
    #[error("Cannot align an empty feature sequence (lengths {len_a} and {len_b})")]
    Empty { len_a: usize, len_b: usize },
    #[error("Feature dimension mismatch: expected {expected}, found {found}")]
    Dimension { expected: usize, found: usize },
}

/// Ordered `(i, j)` pairs, `i` indexing sequence A and `j` sequence B.
pub type WarpingPath = Vec<(usize, usize)>;

/// Above this many cells the aligner switches to a diagonal band.
pub const DEFAULT_CELL_CEILING: usize = 25_000_000;

#[derive(Debug, Clone, Copy)]
pub struct AlignmentOptions {
    /// Largest `len_a * len_b` computed in full.
    pub cell_ceiling: usize,
    /// Minimum half-width of the band used beyond the ceiling.
    pub band_radius: usize,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self {
            cell_ceiling: DEFAULT_CELL_CEILING,
            band_radius: 64,
        }
    }
}

/// Accumulated-cost matrix of shape `(len_a + 1) x (len_b + 1)`.
///
/// Each row keeps only a contiguous run of columns; everything outside it
/// reads as +inf. The full matrix is the degenerate case where row `i >= 1`
/// spans columns `1..=len_b`.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    rows: usize,
    cols: usize,
    bands: Vec<Band>,
}

#[derive(Debug, Clone)]
struct Band {
    start: usize,
    values: Vec<f64>,
}

impl CostMatrix {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let band = &self.bands[i];
        if j < band.start {
            return f64::INFINITY;
        }
        band.values
            .get(j - band.start)
            .copied()
            .unwrap_or(f64::INFINITY)
    }

    /// Cost of the optimal alignment, `D[len_a][len_b]`.
    pub fn total_cost(&self) -> f64 {
        self.get(self.rows - 1, self.cols - 1)
    }

    /// Number of cells actually stored.
    pub fn stored_cells(&self) -> usize {
        self.bands.iter().map(|b| b.values.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Alignment {
    pub cost: CostMatrix,
    pub path: WarpingPath,
}

/// Cosine distance `1 - cos(u, v)`, defined as 1.0 when either vector is zero.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        1.0
    } else {
        1.0 - dot / denom
    }
}

fn check_dimensions(a: &[Vec<f32>], b: &[Vec<f32>]) -> Result<(), AlignmentError> {
    if a.is_empty() || b.is_empty() {
        return Err(AlignmentError::Empty {
            len_a: a.len(),
            len_b: b.len(),
        });
    }
    let expected = a[0].len();
    if let Some(bad) = a.iter().chain(b).find(|v| v.len() != expected) {
        return Err(AlignmentError::Dimension {
            expected,
            found: bad.len(),
        });
    }
    Ok(())
}

/// Column range `[lo, hi]` computed for row `i >= 1`.
fn row_span(i: usize, n: usize, m: usize, radius: Option<usize>) -> (usize, usize) {
    match radius {
        None => (1, m),
        Some(r) => {
            let center = (i * m + n / 2) / n;
            (center.saturating_sub(r).max(1), (center + r).min(m))
        }
    }
}

/// Align with the default options.
pub fn align<F>(a: &[Vec<f32>], b: &[Vec<f32>], distance: F) -> Result<Alignment, AlignmentError>
where
    F: Fn(&[f32], &[f32]) -> f64,
{
    align_with(a, b, distance, AlignmentOptions::default())
}

/// Dynamic time warping between two feature sequences.
///
/// `D[0][0] = 0`, the rest of row and column 0 is +inf, and
/// `D[i][j] = dist(a[i-1], b[j-1]) + min(D[i-1][j], D[i][j-1], D[i-1][j-1])`.
/// Beyond `options.cell_ceiling` only a band around the diagonal is filled; the
/// band is wide enough that `(len_a, len_b)` stays reachable.
pub fn align_with<F>(
    a: &[Vec<f32>],
    b: &[Vec<f32>],
    distance: F,
    options: AlignmentOptions,
) -> Result<Alignment, AlignmentError>
where
    F: Fn(&[f32], &[f32]) -> f64,
{
    check_dimensions(a, b)?;
    let (n, m) = (a.len(), b.len());

    let radius = if n.saturating_mul(m) > options.cell_ceiling {
        let slope = m.div_ceil(n);
        let r = options.band_radius.max(slope + 1);
        log::debug!("DTW {n}x{m} exceeds ceiling, using band radius {r}");
        Some(r)
    } else {
        None
    };

    let mut cost = CostMatrix {
        rows: n + 1,
        cols: m + 1,
        bands: Vec::with_capacity(n + 1),
    };
    cost.bands.push(Band {
        start: 0,
        values: vec![0.0],
    });

    for i in 1..=n {
        let (lo, hi) = row_span(i, n, m, radius);
        let mut values = Vec::with_capacity(hi + 1 - lo);
        for j in lo..=hi {
            let left = if j > lo { values[j - 1 - lo] } else { f64::INFINITY };
            let best = cost
                .get(i - 1, j)
                .min(left)
                .min(cost.get(i - 1, j - 1));
            values.push(distance(&a[i - 1], &b[j - 1]) + best);
        }
        cost.bands.push(Band { start: lo, values });
    }

    let path = backtrack(&cost);
    Ok(Alignment { cost, path })
}

/// Walk back from `(len_a, len_b)` to the origin. Ties prefer the diagonal,
/// then `(i-1, j)`, then `(i, j-1)`.
fn backtrack(cost: &CostMatrix) -> WarpingPath {
    let (mut i, mut j) = (cost.rows - 1, cost.cols - 1);
    let mut path = Vec::with_capacity(i + j);

    while i > 0 && j > 0 {
        path.push((i - 1, j - 1));

        let diag = cost.get(i - 1, j - 1);
        let row = cost.get(i - 1, j);
        let col = cost.get(i, j - 1);

        if diag <= row && diag <= col {
            i -= 1;
            j -= 1;
        } else if row <= col {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    path.reverse();
    path
}
