/// Inputs for scoring one `(term, doc, field)` triple.
#[derive(Debug, Clone, Copy)]
pub struct TermDocStats {
    pub tf: u32,                // Term frequency in the field
    pub df: u64,                // Documents containing the term
    pub total_docs: u64,
    pub field_length: u32,      // Tokens in this doc's field
    pub avg_field_length: f64,
}

pub trait Scorer: Send + Sync {
    fn score(&self, stats: &TermDocStats, field_boost: f64) -> f64;

    fn name(&self) -> &str;
}

/// BM25 with per-field boosts.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Scorer {
    pub k1: f64,  // Term frequency saturation
    pub b: f64,   // Length normalization strength
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Bm25Scorer { k1: 1.2, b: 0.75 }
    }
}

impl Scorer for Bm25Scorer {
    fn score(&self, stats: &TermDocStats, field_boost: f64) -> f64 {
        if stats.tf == 0 || stats.df == 0 || stats.avg_field_length == 0.0 {
            return 0.0;
        }

        let tf = stats.tf as f64;
        let df = stats.df as f64;
        let n = stats.total_docs as f64;

        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        let norm = tf + self.k1 * (1.0 - self.b
            + self.b * (stats.field_length as f64 / stats.avg_field_length));

        idf * (tf * (self.k1 + 1.0) / norm) * field_boost
    }

    fn name(&self) -> &str {
        "bm25"
    }
}
