//! Tests for the interpolation weight tables.

use subsurf_ccg::weights::WeightTable;

#[test]
fn test_rows_sum_to_one() {
    for grid_cuts in [1, 3, 7] {
        let mut table = WeightTable::new(grid_cuts);
        let g = table.grid_size();
        for valence in 3..=20 {
            let weights = table.weights(valence).unwrap();
            for corner in 0..valence {
                for y in 0..g {
                    for x in 0..g {
                        let sum = weights.row(corner, x, y).iter().sum::<f32>();
                        assert!(
                            (sum - 1.0).abs() < 1.0e-4,
                            "valence {valence}, grid ({corner}, {x}, {y}) sums to {sum}"
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_outer_corners_are_the_face_corners() {
    let mut table = WeightTable::new(3);
    let g = table.grid_size();
    for valence in 3..=8 {
        let weights = table.weights(valence).unwrap();
        for corner in 0..valence {
            let row = weights.row(corner, g - 1, g - 1);
            for (i, &w) in row.iter().enumerate() {
                assert_eq!(w, if i == corner { 1.0 } else { 0.0 });
            }
        }
    }
}

#[test]
fn test_center_weighs_corners_equally() {
    let mut table = WeightTable::new(1);
    for valence in 3..=12 {
        let weights = table.weights(valence).unwrap();
        for &w in weights.center() {
            assert!((w - 1.0 / valence as f32).abs() < 1.0e-6);
        }
    }
}

#[test]
fn test_quad_weights_are_bilinear() {
    let mut table = WeightTable::new(3);
    let quad = table.weights(4).unwrap();

    // Seam point halfway between the center and the midpoint of edge 0.
    assert_eq!(quad.seam(0, 2), &[0.375, 0.375, 0.125, 0.125]);
    // Grid points of neighboring grids along their shared border agree.
    for y in 0..5 {
        assert_eq!(quad.row(1, 0, y), quad.row(0, y, 0));
    }
}

#[test]
fn test_cell_weights_follow_loop_order() {
    let mut table = WeightTable::new(1);
    let weights = table.weights(5).unwrap();
    let cell = weights.cell(2, 1, 1);
    assert_eq!(cell[0], weights.row(2, 1, 1));
    assert_eq!(cell[1], weights.row(2, 1, 2));
    assert_eq!(cell[2], weights.row(2, 2, 2));
    assert_eq!(cell[3], weights.row(2, 2, 1));
}
