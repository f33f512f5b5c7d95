use crate::graph::neighborhood::BoxModelHypotheses;
use crate::graph::{BoxModel, SensorState};
use crate::utils::angle::normalize_theta;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::FRAC_PI_2;

/// Box model moving along a straight line, one step per scan, with optional
/// uniform position drift.
///
pub struct BoxModelGen {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    width: f64,
    length: f64,
    class_id: u64,
    gen: StdRng,
    dist_pos: Uniform<f64>,
}

impl BoxModelGen {
    pub fn new(x: f64, y: f64, vx: f64, vy: f64, pos_drift: f64, seed: u64) -> Self {
        Self {
            x,
            y,
            vx,
            vy,
            width: 1.8,
            length: 4.5,
            class_id: 0,
            gen: StdRng::seed_from_u64(seed),
            dist_pos: Uniform::new_inclusive(-pos_drift, pos_drift),
        }
    }

    pub fn class_id(mut self, class_id: u64) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn size(mut self, width: f64, length: f64) -> Self {
        self.width = width;
        self.length = length;
        self
    }
}

impl Iterator for BoxModelGen {
    type Item = BoxModel;

    fn next(&mut self) -> Option<Self::Item> {
        let b = BoxModel::new(
            self.x + self.gen.sample(self.dist_pos),
            self.y + self.gen.sample(self.dist_pos),
            self.vy.atan2(self.vx),
            self.width,
            self.length,
            self.class_id,
        );
        self.x += self.vx;
        self.y += self.vy;
        Some(b)
    }
}

/// Scans of several [BoxModelGen] objects, one cluster per object.
///
/// With `alternatives` every cluster also carries the box fitted the other
/// way round (rotated by 90° with swapped sides), as an ambiguous box fitter
/// would report it.
///
pub struct ScanGen {
    objects: Vec<BoxModelGen>,
    timestamp: f64,
    period: f64,
    sensor: SensorState,
    alternatives: bool,
}

impl ScanGen {
    pub fn new(objects: Vec<BoxModelGen>, period: f64) -> Self {
        Self {
            objects,
            timestamp: 0.0,
            period,
            sensor: SensorState::default(),
            alternatives: false,
        }
    }

    pub fn sensor(mut self, sensor: SensorState) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn alternatives(mut self, alternatives: bool) -> Self {
        self.alternatives = alternatives;
        self
    }
}

impl Iterator for ScanGen {
    type Item = BoxModelHypotheses;

    fn next(&mut self) -> Option<Self::Item> {
        let alternatives = self.alternatives;
        let clusters = self
            .objects
            .iter_mut()
            .filter_map(|o| o.next())
            .map(|b| {
                if alternatives {
                    let mut rotated = b;
                    rotated.pose.theta = normalize_theta(b.pose.theta + FRAC_PI_2);
                    rotated.width = b.length;
                    rotated.length = b.width;
                    vec![b, rotated]
                } else {
                    vec![b]
                }
            })
            .collect();
        let scan = BoxModelHypotheses {
            timestamp: self.timestamp,
            sensor: self.sensor,
            clusters,
        };
        self.timestamp += self.period;
        Some(scan)
    }
}

/// `n` scans of one object moving at 1 m/s along x from (10, 5); node `k` of a
/// graph built from them is the detection of scan `k`.
///
pub fn chain_scans(n: usize) -> Vec<BoxModelHypotheses> {
    ScanGen::new(vec![BoxModelGen::new(10.0, 5.0, 1.0, 0.0, 0.0, 0)], 1.0)
        .take(n)
        .collect()
}

/// `n` scans of two objects whose paths cross 3 m apart: the first climbs
/// from y = 0, the second descends from y = 3. In a graph built from them
/// the first object's detections get even node ids, the second's odd ones.
///
pub fn crossing_scans(n: usize) -> Vec<BoxModelHypotheses> {
    let vy = if n > 1 { 3.0 / (n - 1) as f64 } else { 0.0 };
    ScanGen::new(
        vec![
            BoxModelGen::new(10.0, 0.0, 1.0, vy, 0.0, 0),
            BoxModelGen::new(10.0, 3.0, 1.0, -vy, 0.0, 1),
        ],
        1.0,
    )
    .take(n)
    .collect()
}

#[cfg(test)]
mod tests {
    use crate::examples::{chain_scans, crossing_scans, BoxModelGen, ScanGen};

    #[test]
    fn chain_is_linear() {
        let scans = chain_scans(3);
        assert_eq!(scans.len(), 3);
        assert_eq!(scans[2].timestamp, 2.0);
        assert_eq!(scans[2].clusters.len(), 1);
        assert_eq!(scans[2].clusters[0][0].pose.x, 12.0);
        assert_eq!(scans[2].clusters[0][0].pose.y, 5.0);
    }

    #[test]
    fn crossing_objects_swap_sides() {
        let scans = crossing_scans(4);
        let first = &scans[0].clusters;
        let last = &scans[3].clusters;
        assert!(first[0][0].pose.y < first[1][0].pose.y);
        assert!(last[0][0].pose.y > last[1][0].pose.y);
    }

    #[test]
    fn alternatives_and_drift() {
        let scan = ScanGen::new(vec![BoxModelGen::new(0.0, 0.0, 1.0, 0.0, 0.2, 3)], 0.1)
            .alternatives(true)
            .nth(5)
            .unwrap();
        assert!((scan.timestamp - 0.5).abs() < 1e-12);
        let cluster = &scan.clusters[0];
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster[0].width, cluster[1].length);
        assert!((cluster[0].pose.x - 5.0).abs() <= 0.2);
    }
}
