use log::{debug, warn};

use crate::descriptor::TupleDesc;
use crate::my_types::*;

/// A point taking part in association
#[derive(Debug)]
pub struct Candidate<'a, D> {
    pub pixel: Vector2d,
    pub descriptor: &'a D,
}

impl<'a, D> Clone for Candidate<'a, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, D> Copy for Candidate<'a, D> {}

/// Pairs a source index with a destination index
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AssociatedIndex {
    pub src: usize,
    pub dst: usize,
    pub fit_score: f64,
}

/// Associates two sets of described points using their descriptions and
/// image locations
pub trait AssociateDescription2D<D> {
    /// Called once with the image shape before the first association
    fn initialize(&mut self, width: usize, height: usize);

    /// Replaces the content of `matches` with the associations between
    /// `source` and `destination`
    fn associate(&mut self, source: &[Candidate<'_, D>], destination: &[Candidate<'_, D>], matches: &mut Vec<AssociatedIndex>);

    /// True if a source index appears at most once in the matches
    fn unique_source(&self) -> bool;

    /// True if a destination index appears at most once in the matches
    fn unique_destination(&self) -> bool;
}

#[derive(Clone, Debug)]
pub struct AssociateConfig {
    /// descriptions further apart than this are never matched
    pub max_score: f64,
    /// pixel gate expressed for a 1000 pixel image scale, disabled if <= 0
    pub max_distance: f64,
    /// best score must be below `ratio` times the second best, disabled if >= 1
    pub ratio: f64,
}

impl Default for AssociateConfig {
    fn default() -> Self {
        Self {
            max_score: 0.5,
            max_distance: 60.,
            ratio: 1.,
        }
    }
}

/// Greedy best-first association. Candidate pairs are accepted in order of
/// increasing score while neither side has been used, so matches are unique
/// in both directions.
pub struct AssociateNearest2D {
    config: AssociateConfig,
    max_distance2: f64,
    pairs: Vec<AssociatedIndex>,
    src_used: Vec<bool>,
    dst_used: Vec<bool>,
}

impl AssociateNearest2D {
    pub fn new(config: AssociateConfig) -> Self {
        Self {
            max_distance2: f64::INFINITY,
            config,
            pairs: vec![],
            src_used: vec![],
            dst_used: vec![],
        }
    }

    /// Passes the ratio test against every other candidate of `src`
    fn distinctive(&self, pair: &AssociatedIndex, first: usize, last: usize) -> bool {
        if self.config.ratio >= 1. {
            return true;
        }
        self.pairs[first..last]
            .iter()
            .filter(|p| p.dst != pair.dst)
            .all(|p| pair.fit_score < self.config.ratio * p.fit_score)
    }
}

impl<D: TupleDesc> AssociateDescription2D<D> for AssociateNearest2D {
    fn initialize(&mut self, width: usize, height: usize) {
        self.max_distance2 = if self.config.max_distance > 0. {
            // linear image scale, 1 for a 500x500 image
            let scale = (width + height) as f64 / 1000.;
            (self.config.max_distance * scale).powi(2)
        } else {
            f64::INFINITY
        };
    }

    fn associate(&mut self, source: &[Candidate<'_, D>], destination: &[Candidate<'_, D>], matches: &mut Vec<AssociatedIndex>) {
        matches.clear();
        self.pairs.clear();
        for (src, s) in source.iter().enumerate() {
            for (dst, d) in destination.iter().enumerate() {
                if (s.pixel - d.pixel).norm_squared() > self.max_distance2 {
                    continue;
                }
                let fit_score = s.descriptor.distance(d.descriptor);
                if fit_score <= self.config.max_score {
                    self.pairs.push(AssociatedIndex { src, dst, fit_score });
                }
            }
        }

        // pairs are grouped by source, apply the ratio test inside each group
        let mut keep = Vec::with_capacity(self.pairs.len());
        let mut first = 0;
        while first < self.pairs.len() {
            let src = self.pairs[first].src;
            let mut last = first;
            while last < self.pairs.len() && self.pairs[last].src == src {
                last += 1;
            }
            for i in first..last {
                if self.distinctive(&self.pairs[i], first, last) {
                    keep.push(self.pairs[i]);
                }
            }
            first = last;
        }

        keep.sort_by(|a, b| a.fit_score.total_cmp(&b.fit_score));
        self.src_used.clear();
        self.src_used.resize(source.len(), false);
        self.dst_used.clear();
        self.dst_used.resize(destination.len(), false);
        for pair in keep {
            if self.src_used[pair.src] || self.dst_used[pair.dst] {
                continue;
            }
            self.src_used[pair.src] = true;
            self.dst_used[pair.dst] = true;
            matches.push(pair);
        }
    }

    fn unique_source(&self) -> bool {
        true
    }

    fn unique_destination(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct SetMembers {
    src: Vec<usize>,
    dst: Vec<usize>,
}

/// Splits both sides of the association by set id and runs the wrapped
/// associator once per set, so points only match within their own set.
pub struct AssociateDescriptionSets2D<D> {
    associator: Box<dyn AssociateDescription2D<D>>,
    sets: Vec<SetMembers>,
    set_matches: Vec<AssociatedIndex>,
    matches: Vec<AssociatedIndex>,
    unassociated_destination: Vec<usize>,
    dst_matched: Vec<bool>,
}

impl<D> AssociateDescriptionSets2D<D> {
    pub fn new(associator: Box<dyn AssociateDescription2D<D>>) -> Self {
        Self {
            associator,
            sets: vec![],
            set_matches: vec![],
            matches: vec![],
            unassociated_destination: vec![],
            dst_matched: vec![],
        }
    }

    pub fn unique_source(&self) -> bool {
        self.associator.unique_source()
    }

    pub fn unique_destination(&self) -> bool {
        self.associator.unique_destination()
    }

    /// Declares how many sets there are. More are added on demand if a larger
    /// set id shows up.
    pub fn initialize_sets(&mut self, count: usize) {
        self.sets.truncate(count);
        while self.sets.len() < count {
            self.sets.push(SetMembers::default());
        }
    }

    pub fn initialize_associator(&mut self, width: usize, height: usize) {
        self.associator.initialize(width, height);
    }

    fn set_mut(&mut self, set_id: usize) -> &mut SetMembers {
        if set_id >= self.sets.len() {
            warn!("set id {} is outside of the {} declared sets", set_id, self.sets.len());
            self.initialize_sets(set_id + 1);
        }
        &mut self.sets[set_id]
    }

    /// Associates `source` with `destination`. `source_sets[i]` is the set of
    /// `source[i]`, same for the destination.
    pub fn associate(
        &mut self,
        source: &[Candidate<'_, D>],
        source_sets: &[usize],
        destination: &[Candidate<'_, D>],
        destination_sets: &[usize],
    ) {
        assert_eq!(source.len(), source_sets.len());
        assert_eq!(destination.len(), destination_sets.len());

        for set in self.sets.iter_mut() {
            set.src.clear();
            set.dst.clear();
        }
        for (i, &set_id) in source_sets.iter().enumerate() {
            self.set_mut(set_id).src.push(i);
        }
        for (i, &set_id) in destination_sets.iter().enumerate() {
            self.set_mut(set_id).dst.push(i);
        }

        self.matches.clear();
        let mut set_source = vec![];
        let mut set_destination = vec![];
        for set in &self.sets {
            if set.src.is_empty() || set.dst.is_empty() {
                continue;
            }
            set_source.clear();
            set_source.extend(set.src.iter().map(|&i| source[i]));
            set_destination.clear();
            set_destination.extend(set.dst.iter().map(|&i| destination[i]));

            self.associator
                .associate(&set_source, &set_destination, &mut self.set_matches);

            // convert back into the original indexes
            for m in &self.set_matches {
                self.matches.push(AssociatedIndex {
                    src: set.src[m.src],
                    dst: set.dst[m.dst],
                    fit_score: m.fit_score,
                });
            }
        }

        self.dst_matched.clear();
        self.dst_matched.resize(destination.len(), false);
        for m in &self.matches {
            self.dst_matched[m.dst] = true;
        }
        self.unassociated_destination.clear();
        self.unassociated_destination
            .extend((0..destination.len()).filter(|&i| !self.dst_matched[i]));

        debug!(
            "associated {} of {} destinations across {} sets",
            self.matches.len(),
            destination.len(),
            self.sets.len()
        );
    }

    /// Forgets the results of the last `associate`
    pub fn clear(&mut self) {
        self.matches.clear();
        self.unassociated_destination.clear();
        self.dst_matched.clear();
    }

    pub fn matches(&self) -> &[AssociatedIndex] {
        &self.matches
    }

    /// Destination indexes which were not matched to anything
    pub fn unassociated_destination(&self) -> &[usize] {
        &self.unassociated_destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TupleDescF64;

    fn desc(v: f64) -> TupleDescF64 {
        TupleDescF64::from_slice(&[v])
    }

    fn candidates<'a>(pixels: &[(f64, f64)], descs: &'a [TupleDescF64]) -> Vec<Candidate<'a, TupleDescF64>> {
        pixels
            .iter()
            .zip(descs.iter())
            .map(|(&(x, y), d)| Candidate {
                pixel: Vector2d::new(x, y),
                descriptor: d,
            })
            .collect()
    }

    fn nearest(max_distance: f64) -> AssociateNearest2D {
        let mut assoc = AssociateNearest2D::new(AssociateConfig {
            max_score: 0.5,
            max_distance,
            ratio: 1.,
        });
        // scale of 1 for a 500x500 image
        AssociateDescription2D::<TupleDescF64>::initialize(&mut assoc, 500, 500);
        assoc
    }

    #[test]
    fn test_nearest_is_unique() {
        let src_desc = vec![desc(0.), desc(0.1)];
        let dst_desc = vec![desc(0.05), desc(0.12), desc(5.)];
        let src = candidates(&[(0., 0.), (1., 0.)], &src_desc);
        let dst = candidates(&[(0., 1.), (1., 1.), (2., 2.)], &dst_desc);

        let mut matches = vec![];
        nearest(0.).associate(&src, &dst, &mut matches);
        matches.sort_by_key(|m| m.src);
        let pairs: Vec<_> = matches.iter().map(|m| (m.src, m.dst)).collect();
        // best pair (1, 1) wins first, then (0, 0)
        assert_eq!(pairs, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_nearest_pixel_gate() {
        let src_desc = vec![desc(0.)];
        let dst_desc = vec![desc(0.), desc(0.1)];
        let src = candidates(&[(0., 0.)], &src_desc);
        let dst = candidates(&[(100., 0.), (5., 0.)], &dst_desc);

        let mut matches = vec![];
        nearest(10.).associate(&src, &dst, &mut matches);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].dst, 1);
    }

    #[test]
    fn test_ratio_test() {
        let mut assoc = AssociateNearest2D::new(AssociateConfig {
            max_score: 1.,
            max_distance: 0.,
            ratio: 0.8,
        });
        let src_desc = vec![desc(0.)];
        let dst_desc = vec![desc(0.5), desc(0.55)];
        let src = candidates(&[(0., 0.)], &src_desc);
        let dst = candidates(&[(0., 0.), (0., 0.)], &dst_desc);
        let mut matches = vec![];
        AssociateDescription2D::<TupleDescF64>::initialize(&mut assoc, 100, 100);
        assoc.associate(&src, &dst, &mut matches);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_sets_are_separated() {
        let mut assoc = AssociateDescriptionSets2D::new(Box::new(nearest(0.)));
        assoc.initialize_sets(2);

        let src_desc = vec![desc(0.), desc(1.)];
        let dst_desc = vec![desc(1.), desc(0.), desc(0.)];
        let src = candidates(&[(0., 0.), (0., 0.)], &src_desc);
        let dst = candidates(&[(0., 0.), (0., 0.), (0., 0.)], &dst_desc);

        // the perfect match for source 0 is destination 1, but it is in another set
        assoc.associate(&src, &[0, 1], &dst, &[1, 1, 0]);
        let mut pairs: Vec<_> = assoc.matches().iter().map(|m| (m.src, m.dst)).collect();
        pairs.sort();
        assert_eq!(pairs, vec![(0, 2), (1, 0)]);
        assert_eq!(assoc.unassociated_destination(), &[1]);
    }

    #[test]
    fn test_sets_grow_on_demand() {
        let mut assoc = AssociateDescriptionSets2D::new(Box::new(nearest(0.)));
        assoc.initialize_sets(1);
        let src_desc = vec![desc(0.)];
        let dst_desc = vec![desc(0.)];
        let src = candidates(&[(0., 0.)], &src_desc);
        let dst = candidates(&[(0., 0.)], &dst_desc);
        assoc.associate(&src, &[3], &dst, &[3]);
        assert_eq!(assoc.matches().len(), 1);
        assert!(assoc.unassociated_destination().is_empty());
    }

    #[test]
    fn test_clear_forgets_results() {
        let mut assoc = AssociateDescriptionSets2D::new(Box::new(nearest(0.)));
        assoc.initialize_sets(1);
        let src_desc = vec![desc(0.)];
        let dst_desc = vec![desc(0.), desc(3.)];
        let src = candidates(&[(0., 0.)], &src_desc);
        let dst = candidates(&[(0., 0.), (1., 1.)], &dst_desc);
        assoc.associate(&src, &[0], &dst, &[0, 0]);
        assert_eq!(assoc.matches().len(), 1);
        assert_eq!(assoc.unassociated_destination(), &[1]);

        assoc.clear();
        assert!(assoc.matches().is_empty());
        assert!(assoc.unassociated_destination().is_empty());
    }

    #[test]
    fn test_nothing_detected() {
        let mut assoc = AssociateDescriptionSets2D::new(Box::new(nearest(0.)));
        assoc.initialize_sets(2);
        let src_desc = vec![desc(0.)];
        let src = candidates(&[(0., 0.)], &src_desc);
        assoc.associate(&src, &[0], &[], &[]);
        assert!(assoc.matches().is_empty());
        assert!(assoc.unassociated_destination().is_empty());
    }
}
