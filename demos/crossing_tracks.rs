use anyhow::Result;
use vscan::examples::crossing_scans;
use vscan::tracker::options::TrackerOptions;
use vscan::tracker::Tracker;

/// Two objects of the same class cross each other; the sampler has to keep
/// each detection chain on its own track.
///
fn main() -> Result<()> {
    env_logger::init();

    let mut tracker = Tracker::new(&TrackerOptions::default().n_mc(300).seed(3))?;
    for scan in crossing_scans(8) {
        tracker.track(&scan)?;
    }

    let best = tracker.tracks_star();
    eprintln!("Best scene: log_p={:.2}", tracker.log_p_star());
    for track in best.tracks() {
        let nodes = track.nodes().map(|n| n.0).collect::<Vec<_>>();
        eprintln!("Track #{}: nodes {:?}", track.get_id(), nodes);
        for o in track.obstacles() {
            eprintln!(
                "    t={:.1} ({:.2}, {:.2}) conf={:?}",
                o.timestamp,
                o.pose.x,
                o.pose.y,
                o.confidence()
            );
        }
    }
    for o in best.moving_objects() {
        eprintln!(
            "#{}: speed {:.2} m/s, heading {:.2} rad, model {:?}",
            o.track_id,
            o.speed(),
            o.velocity.1.atan2(o.velocity.0),
            o.model
        );
    }
    Ok(())
}
