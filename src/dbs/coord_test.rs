use arbitrary::{Arbitrary, Unstructured};
use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

#[test]
fn test_coordinate_new() {
    let c = Coordinate::new(1.0, 2.0, TAU + 0.5).unwrap();
    assert!((c.theta - 0.5).abs() < 1e-12, "{}", c.theta);

    let c = Coordinate::new(1.0, 2.0, -0.5).unwrap();
    assert!((c.theta - (TAU - 0.5)).abs() < 1e-12, "{}", c.theta);

    assert!(Coordinate::new(0.0, -1.0, 0.0).is_err());
    assert!(Coordinate::new(f64::NAN, 0.0, 0.0).is_err());
}

#[test]
fn test_distance() {
    let w = Weights::default();

    let a = Coordinate::new(0.0, 1.0, 0.0).unwrap();
    let b = Coordinate::new(3.0, 1.0, 0.0).unwrap();
    assert!((a.distance(&b, &w) - 3.0).abs() < 1e-12);

    // chordal angular distance at r=1: d² = 1·1·(1 − cos Δθ).
    let b = Coordinate::new(0.0, 1.0, std::f64::consts::PI).unwrap();
    assert!((a.distance2(&b, &w) - 2.0).abs() < 1e-12);

    // symmetric across the 2π seam, shorter arc either way.
    let p = Coordinate::new(0.0, 1.0, 0.1).unwrap();
    let q = Coordinate::new(0.0, 1.0, TAU - 0.1).unwrap();
    let r = Coordinate::new(0.0, 1.0, 0.3).unwrap();
    assert!((p.distance(&q, &w) - p.distance(&r, &w)).abs() < 1e-12);

    // weights scale their terms.
    let w = Weights::from((4.0, 1.0, 1.0));
    let b = Coordinate::new(3.0, 1.0, 0.0).unwrap();
    assert!((a.distance(&b, &w) - 6.0).abs() < 1e-12);
}

#[test]
fn test_rectangle_new() {
    assert!(Rectangle::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0).is_ok());
    assert!(Rectangle::new(1.0, 0.0, 0.0, 1.0, 0.0, 1.0).is_err());
    assert!(Rectangle::new(0.0, 1.0, 1.0, 0.0, 0.0, 1.0).is_err());
    assert!(Rectangle::new(0.0, 1.0, -1.0, 1.0, 0.0, 1.0).is_err());
    // wrapping θ interval is legal.
    assert!(Rectangle::new(0.0, 1.0, 0.0, 1.0, 6.0, 0.2).is_ok());
}

#[test]
fn test_rectangle_contains_wrap() {
    let rect = Rectangle::new(0.0, 10.0, 0.0, 5.0, TAU - 0.2, 0.2).unwrap();
    assert!(rect.is_wrapping());

    let inside1 = Coordinate::new(5.0, 2.0, 0.1).unwrap();
    let inside2 = Coordinate::new(5.0, 2.0, TAU - 0.1).unwrap();
    let outside = Coordinate::new(5.0, 2.0, 1.0).unwrap();
    assert!(rect.contains(&inside1));
    assert!(rect.contains(&inside2));
    assert!(!rect.contains(&outside));

    let (low, high) = rect.split_wrap();
    let high = high.unwrap();
    assert!(!low.is_wrapping() && !high.is_wrapping());
    for c in [inside1, inside2].iter() {
        assert!(low.contains(c) || high.contains(c));
    }
    assert!(!low.contains(&outside) && !high.contains(&outside));
}

#[test]
fn test_rectangle_merge_volume() {
    let a = Rectangle::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0).unwrap();
    let b = Rectangle::new(2.0, 3.0, 0.0, 2.0, 0.5, 1.5).unwrap();
    let m = a.merge(&b);
    assert_eq!(m.t_min, 0.0);
    assert_eq!(m.t_max, 3.0);
    assert_eq!(m.r_max, 2.0);
    assert_eq!(m.theta_max, 1.5);
    assert!((a.volume() - 1.0).abs() < 1e-12);
    assert!((a.margin() - 3.0).abs() < 1e-12);
    assert!(a.enlargement(&b) > 0.0);
    assert!((a.enlargement(&a) - 0.0).abs() < 1e-12);

    let c = Coordinate::new(-1.0, 0.5, 0.5).unwrap();
    let e = a.enlarge_to_include(&c);
    assert_eq!(e.t_min, -1.0);
    assert!(e.contains(&c));
}

#[test]
fn test_rectangle_intersects() {
    let a = Rectangle::new(0.0, 2.0, 0.0, 2.0, 0.0, 1.0).unwrap();
    let b = Rectangle::new(1.0, 3.0, 1.0, 3.0, 0.5, 2.0).unwrap();
    let c = Rectangle::new(3.0, 4.0, 0.0, 2.0, 0.0, 1.0).unwrap();
    assert!(a.intersects(&b));
    assert!(b.intersects(&a));
    assert!(!a.intersects(&c));
}

#[test]
fn test_min_dist2_bound() {
    let seed: u64 = random();
    println!("test_min_dist2_bound {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);
    let w = Weights::default();

    // the bound never exceeds the distance to any contained point.
    for _ in 0..1000 {
        let bytes: Vec<u8> = (0..64).map(|_| rng.gen::<u8>()).collect();
        let mut uns = Unstructured::new(&bytes);
        let probe = Coordinate::arbitrary(&mut uns).unwrap();
        let a = Coordinate::arbitrary(&mut uns).unwrap();
        let b = Coordinate::arbitrary(&mut uns).unwrap();

        let rect = Rectangle::from_point(&a).enlarge_to_include(&b);
        for point in [a, b].iter() {
            let d2 = probe.distance2(point, &w);
            let bound = rect.min_dist2(&probe, &w);
            assert!(
                bound <= d2 + 1e-9,
                "bound {} dist {} probe {} point {}",
                bound,
                d2,
                probe,
                point
            );
        }
    }

    // inside the rectangle the bound collapses to zero.
    let rect = Rectangle::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0).unwrap();
    let probe = Coordinate::new(0.5, 0.5, 0.5).unwrap();
    assert_eq!(rect.min_dist2(&probe, &w), 0.0);
}
