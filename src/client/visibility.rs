use crate::world::chunk_coord::SectionKey;
use std::collections::{HashSet, VecDeque};

/// Sections reachable from `camera` through non-solid sections.
///
/// Breadth-first over face-adjacent sections. A reached section is
/// visible; solid sections are visible but the fill does not pass through
/// them. The camera's own section is always expanded. Sections that are not
/// loaded, or whose column is farther than `radius` columns from the
/// camera's, are never reached. Each section is visited at most once.
pub fn compute_visibility<L, S>(camera: SectionKey, is_loaded: L, is_solid: S, radius: i32) -> HashSet<SectionKey>
where
    L: Fn(SectionKey) -> bool,
    S: Fn(SectionKey) -> bool,
{
    let mut visible = HashSet::new();
    if !is_loaded(camera) {
        return visible;
    }
    let r2 = radius as i64 * radius as i64;
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(camera);
    visible.insert(camera);
    queue.push_back(camera);

    while let Some(key) = queue.pop_front() {
        for next in key.neighbors6() {
            if !seen.insert(next) {
                continue;
            }
            if camera.column.distance_squared(&next.column) > r2 || !is_loaded(next) {
                continue;
            }
            visible.insert(next);
            if !is_solid(next) {
                queue.push_back(next);
            }
        }
    }
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::chunk_coord::ChunkCoord;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const SECTIONS: i32 = 6;

    fn loaded(key: SectionKey) -> bool {
        key.column.x().abs() <= 3 && key.column.y().abs() <= 3 && (0..SECTIONS).contains(&key.section)
    }

    /// Reachability by repeated relaxation, independent of queue order.
    fn reference(camera: SectionKey, solid: &HashSet<SectionKey>, radius: i32) -> HashSet<SectionKey> {
        let r2 = radius as i64 * radius as i64;
        let mut all = Vec::new();
        for x in -3..=3 {
            for y in -3..=3 {
                for s in 0..SECTIONS {
                    let key = SectionKey::new(ChunkCoord::new(x, y), s);
                    if camera.column.distance_squared(&key.column) <= r2 {
                        all.push(key);
                    }
                }
            }
        }
        let mut reached: HashSet<SectionKey> = [camera].into_iter().collect();
        loop {
            let before = reached.len();
            for key in &all {
                if reached.contains(key) {
                    continue;
                }
                let via_open = key.neighbors6().iter().any(|n| {
                    reached.contains(n) && (*n == camera || !solid.contains(n))
                });
                if via_open {
                    reached.insert(*key);
                }
            }
            if reached.len() == before {
                return reached;
            }
        }
    }

    #[test]
    fn test_matches_reachability() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for round in 0..40 {
            let density = 0.2 + 0.02 * (round % 20) as f64;
            let mut solid = HashSet::new();
            for x in -3..=3 {
                for y in -3..=3 {
                    for s in 0..SECTIONS {
                        if rng.gen_bool(density) {
                            solid.insert(SectionKey::new(ChunkCoord::new(x, y), s));
                        }
                    }
                }
            }
            let camera = SectionKey::new(
                ChunkCoord::new(rng.gen_range(-1..=1), rng.gen_range(-1..=1)),
                rng.gen_range(0..SECTIONS),
            );
            let radius = rng.gen_range(1..=3);
            let visible = compute_visibility(camera, loaded, |k| solid.contains(&k), radius);
            assert_eq!(visible, reference(camera, &solid, radius), "round {}", round);
        }
    }

    #[test]
    fn test_solid_wall_blocks_view() {
        let camera = SectionKey::new(ChunkCoord::new(0, 0), 2);
        // Everything in column x = 1 is solid.
        let visible = compute_visibility(camera, loaded, |k| k.column.x() == 1, 3);
        assert!(visible.contains(&SectionKey::new(ChunkCoord::new(1, 0), 2)));
        assert!(!visible.contains(&SectionKey::new(ChunkCoord::new(2, 0), 2)));
        assert!(visible.contains(&SectionKey::new(ChunkCoord::new(-3, 0), 5)));
    }

    #[test]
    fn test_camera_inside_solid_still_expands() {
        let camera = SectionKey::new(ChunkCoord::new(0, 0), 0);
        let visible = compute_visibility(camera, loaded, |_| true, 2);
        assert_eq!(visible.len(), 1 + 5);
        assert!(compute_visibility(SectionKey::new(ChunkCoord::new(9, 9), 0), loaded, |_| false, 2).is_empty());
    }
}
