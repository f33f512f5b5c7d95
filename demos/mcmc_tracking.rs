use anyhow::Result;
use vscan::examples::{BoxModelGen, ScanGen};
use vscan::graph::{Pose, SensorState};
use vscan::tracker::options::TrackerOptions;
use vscan::tracker::Tracker;

fn main() -> Result<()> {
    env_logger::init();

    let objects = vec![
        BoxModelGen::new(5.0, 10.0, 0.8, 0.0, 0.05, 1),
        BoxModelGen::new(5.0, -10.0, 0.6, 0.3, 0.05, 2).class_id(1),
        BoxModelGen::new(40.0, 0.0, -0.5, 0.0, 0.05, 3).size(0.8, 0.8),
    ];
    // sensor drives along x at 2 m/s, scans every 0.5 s
    let scans = ScanGen::new(objects, 0.5).alternatives(true);

    let mut tracker = Tracker::new(
        &TrackerOptions::default()
            .n_mc(500)
            .seed(7)
            .window(3.0),
    )?;

    for (i, mut scan) in scans.take(20).enumerate() {
        scan.sensor = SensorState {
            pose: Pose::new(i as f64, 0.0, 0.0),
            velocity: 2.0,
        };
        let n_tracks = tracker.track(&scan)?.len();
        let stats = tracker.stats();
        eprintln!(
            "t={:.1}s tracks={} log_p={:.2} accepted={}/{}",
            scan.timestamp,
            n_tracks,
            tracker.log_p_star(),
            stats.accepted,
            stats.iterations
        );
        for o in tracker.tracks_star().moving_objects() {
            eprintln!(
                "    #{} class={} pos=({:.2}, {:.2}) v=({:.2}, {:.2}) w={:.3} conf={:.3} model={:?}",
                o.track_id,
                o.class_id,
                o.pose.x,
                o.pose.y,
                o.velocity.0,
                o.velocity.1,
                o.turn_rate,
                o.confidence,
                o.model
            );
        }
    }
    Ok(())
}
