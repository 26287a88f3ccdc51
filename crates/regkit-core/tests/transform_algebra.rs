//! Algebraic properties of compose, decompose and flatten.

use proptest::prelude::*;
use regkit_core::image::ImageGeometry;
use regkit_core::spatial::{Direction3, Matrix3, Point3, Spacing3, Vector3};
use regkit_core::transform::{
    compose, decompose, flatten, CompositeTransform, RigidTransform, SimilarityTransform, SpatialTransform,
};

prop_compose! {
    fn arb_rigid()(
        angles in prop::array::uniform3(-3.1f64..3.1),
        t in prop::array::uniform3(-50.0f64..50.0),
        c in prop::array::uniform3(-100.0f64..100.0),
    ) -> RigidTransform {
        RigidTransform::from_euler_zyx(angles, Vector3::from(t), Point3::from(c))
    }
}

prop_compose! {
    fn arb_point()(p in prop::array::uniform3(-100.0f64..100.0)) -> Point3 {
        Point3::from(p)
    }
}

fn fixed_geometry() -> ImageGeometry<3> {
    ImageGeometry::new([181, 217, 181], Point3::new(-90.0, 126.0, -72.0), Spacing3::repeat(1.0), Direction3::identity())
}

proptest! {
    #[test]
    fn compose_with_inverse_is_identity(t in arb_rigid()) {
        let composed = compose(&[t, t.inverse()]).unwrap();
        prop_assert!((composed.rotation() - Matrix3::identity()).amax() < 1e-6);
        prop_assert!(composed.translation().amax() < 1e-6);
        prop_assert_eq!(composed.center(), &Point3::origin());
    }

    #[test]
    fn compose_matches_pointwise_application(
        a in arb_rigid(),
        b in arb_rigid(),
        c in arb_rigid(),
        points in prop::collection::vec(arb_point(), 10),
    ) {
        let composed = compose(&[a, b, c]).unwrap();
        for p in &points {
            let expected = a.transform_point(&b.transform_point(&c.transform_point(p)));
            let actual = composed.transform_point(p);
            prop_assert!((actual - expected).norm() < 1e-6, "{:?} vs {:?}", actual, expected);
        }
    }

    #[test]
    fn decompose_inverse_scale_undoes_forward_scale(rigid in arb_rigid(), p in arb_point()) {
        let similarity = SimilarityTransform::from_rigid(&rigid, Vector3::repeat(2.0));
        let parts = decompose(&similarity, &fixed_geometry()).unwrap();

        // Forward scaling about the same (offset) center.
        let forward = SimilarityTransform::scaling(*similarity.scale(), *parts.inverse_scale.center());
        let recovered = parts.inverse_scale.transform_point(&forward.transform_point(&p));
        prop_assert!((recovered - p).norm() < 1e-9);
    }

    #[test]
    fn decompose_unit_scale_yields_identity_scale(rigid in arb_rigid(), p in arb_point()) {
        let similarity = SimilarityTransform::from_rigid(&rigid, Vector3::repeat(1.0));
        let parts = decompose(&similarity, &fixed_geometry()).unwrap();

        prop_assert_eq!(parts.inverse_scale.scale(), &Vector3::repeat(1.0));
        prop_assert!((parts.inverse_scale.transform_point(&p) - p).norm() < 1e-9);
        prop_assert!(parts.rigid.approx_eq(&rigid, 1e-9));
        prop_assert_eq!(parts.rigid.center(), rigid.center());
    }

    #[test]
    fn flatten_single_rigid_is_unchanged(rigid in arb_rigid()) {
        let mut composite = CompositeTransform::new();
        composite.push(rigid);
        prop_assert_eq!(flatten(&composite).unwrap(), rigid);
    }
}

#[test]
fn flatten_two_members_fails() {
    let mut composite = CompositeTransform::new();
    composite.push(RigidTransform::identity());
    composite.push(RigidTransform::from_translation(Vector3::new(1.0, 0.0, 0.0)));
    assert!(flatten(&composite).is_err());
}
