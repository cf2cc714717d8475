use std::fmt::Debug;

/// Feature description used for association. Tracks own one instance each and
/// overwrite it in place when their storage is reused.
pub trait TupleDesc: Clone + Debug {
    /// Copies `other` into `self` without reallocating when the sizes agree
    fn set_to(&mut self, other: &Self);

    /// Association score, lower is a better match
    fn distance(&self, other: &Self) -> f64;
}

/// Real valued description compared with the euclidean distance
#[derive(Clone, Debug, PartialEq)]
pub struct TupleDescF64 {
    pub data: Vec<f64>,
}

impl TupleDescF64 {
    pub fn new(len: usize) -> Self {
        Self { data: vec![0.; len] }
    }

    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            data: values.to_vec(),
        }
    }
}

impl TupleDesc for TupleDescF64 {
    fn set_to(&mut self, other: &Self) {
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    fn distance(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.data.len(), other.data.len());
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}
