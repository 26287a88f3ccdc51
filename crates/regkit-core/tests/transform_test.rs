use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use regkit_core::spatial::{Point3, Vector3};
use regkit_core::transform::{
    CompositeTransform, RigidTransform, SimilarityTransform, SpatialTransform, Transform, TransformKind,
};
use std::f64::consts::PI;

type B = NdArray<f32>;

fn apply_tensor<T: Transform<B, 3>>(transform: &T, point: [f32; 3]) -> Vec<f32> {
    let device = Default::default();
    let points = Tensor::<B, 2>::from_data(TensorData::from([point]), &device);
    transform.transform_points(points).into_data().to_vec::<f32>().unwrap()
}

fn assert_close(actual: &[f32], expected: &Point3) {
    for c in 0..3 {
        assert!(
            (actual[c] as f64 - expected[c]).abs() < 1e-4,
            "axis {} mismatch: got {}, expected {}",
            c,
            actual[c],
            expected[c]
        );
    }
}

#[test]
fn test_rigid_transform_3d() {
    // Rotate 90 degrees around Z, then translate by (1, 2, 3):
    // (1, 0, 0) -> (0, 1, 0) -> (1, 3, 3)
    let transform = RigidTransform::from_euler_zyx([0.0, 0.0, PI / 2.0], Vector3::new(1.0, 2.0, 3.0), Point3::origin());

    let expected = Point3::new(1.0, 3.0, 3.0);
    assert!((transform.transform_point(&Point3::new(1.0, 0.0, 0.0)) - expected).norm() < 1e-12);
    assert_close(&apply_tensor(&transform, [1.0, 0.0, 0.0]), &expected);
}

#[test]
fn test_rigid_transform_about_center() {
    // The center is a fixed point of the rotation.
    let center = Point3::new(10.0, -4.0, 7.0);
    let transform = RigidTransform::from_euler_zxy([0.3, -0.2, 1.1], Vector3::zeros(), center);
    assert!((transform.transform_point(&center) - center).norm() < 1e-12);
    assert_close(&apply_tensor(&transform, [10.0, -4.0, 7.0]), &center);
}

#[test]
fn test_similarity_tensor_matches_point() {
    let transform = SimilarityTransform::new(
        *RigidTransform::from_euler_zyx([0.1, 0.2, 0.3], Vector3::zeros(), Point3::origin()).rotation(),
        Vector3::new(-3.0, 0.5, 2.0),
        Point3::new(20.0, 30.0, 40.0),
        Vector3::repeat(1.25),
    )
    .unwrap();

    let p = Point3::new(12.0, -8.0, 3.0);
    assert_close(&apply_tensor(&transform, [12.0, -8.0, 3.0]), &transform.transform_point(&p));
}

#[test]
fn test_composite_applies_last_member_first() {
    let shift = RigidTransform::from_translation(Vector3::new(1.0, 0.0, 0.0));
    let double = SimilarityTransform::uniform_scaling(2.0, Point3::origin());

    // [double, shift]: shift first, then scale: (1,0,0) -> (2,0,0) -> (4,0,0)
    let composite = CompositeTransform::from_transforms(vec![TransformKind::from(double), TransformKind::from(shift)]);
    let expected = Point3::new(4.0, 0.0, 0.0);

    assert!((composite.transform_point(&Point3::new(1.0, 0.0, 0.0)) - expected).norm() < 1e-12);
    assert_close(&apply_tensor(&composite, [1.0, 0.0, 0.0]), &expected);
}
